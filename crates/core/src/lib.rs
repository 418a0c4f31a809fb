pub mod config;
pub mod errors;
pub mod logging;

pub use config::{load_config, AppConfig, DatabaseConfig, DispatcherConfig, ObservabilityConfig, QueueConfig};
pub use errors::{PublisherError, PublisherResult};
pub use logging::init_logging;
