//! 外部协作者接口定义
//!
//! 消息持久化与用户最后在线时间由外部存储负责，中继层只通过这里的窄接口访问它们。

pub mod message_repository;
pub mod user_repository;

pub use message_repository::MessageStore;
pub use user_repository::UserStore;

#[cfg(feature = "testing")]
pub use message_repository::MockMessageStore;
#[cfg(feature = "testing")]
pub use user_repository::MockUserStore;
