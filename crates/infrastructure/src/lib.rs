//! 基础设施层实现。
//!
//! 提供外部协作者的内存实现，以及文件传输使用的限速流。

pub mod repository;
pub mod throttle;

pub use repository::InMemoryChatStore;
pub use throttle::{bytes_per_second, ThrottledStream, TransferDirection, TransferSummary};
