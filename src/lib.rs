//! 内容发布调度系统的嵌入式装配层
//!
//! 库侧暴露 [`app::PublisherApp`]（单进程装配）与
//! [`service::PublisherService`]（对外门面），供宿主进程嵌入使用；
//! 二进制入口只是在此之上加了CLI与信号处理。

pub mod app;
pub mod service;
pub mod shutdown;

pub use app::PublisherApp;
pub use service::PublisherService;
pub use shutdown::ShutdownManager;
