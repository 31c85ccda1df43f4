//! 应用层实现。
//!
//! 实时在线状态与消息中继：连接注册表、按用户分组的事件扇出、上线/离线广播，
//! 以及把客户端命令委托给外部消息存储的中继服务。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod presence;
pub mod registry;
pub mod relay;

pub use broadcaster::{BroadcastError, ConnectionHub, FanOut};
pub use clock::{Clock, SystemClock};
pub use error::RelayError;
pub use presence::PresenceBroadcaster;
pub use registry::{ConnectionRegistry, Registration, Removal};
pub use relay::{MessageRelay, MessageRelayDependencies};
