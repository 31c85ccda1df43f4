//! 实时聊天中继的核心领域模型
//!
//! 包含标识类型、消息实体、客户端/服务端事件词汇，以及外部协作者（消息存储、用户存储）的接口。

pub mod errors;
pub mod events;
pub mod message;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use repositories::*;
pub use value_objects::*;
