//! # Publisher Testing Utils
//!
//! Shared testing utilities for the content publishing scheduler.
//! This crate provides in-memory mock implementations and test data
//! builders that can be used across all other crates in the workspace.
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! publisher-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! Then use the mocks and builders in your tests:
//!
//! ```rust
//! use publisher_testing_utils::builders::PublishConfigBuilder;
//! use publisher_testing_utils::mocks::MockConfigRepository;
//! ```

pub mod builders;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use mocks::*;
