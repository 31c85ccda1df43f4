//! 服务端推送给客户端的事件

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{MessageId, Timestamp, UserId};

/// 服务端事件
///
/// 序列化为 `{"event": "<名称>", "data": <载荷>}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// 用户上线（第一个连接建立）
    UserOnline(UserId),
    /// 用户离线（最后一个连接断开）
    UserOffline(UserId),
    /// 发送确认，推送给发送者的所有连接
    MessageSent(Message),
    /// 新消息，推送给接收者的所有连接
    MessageReceived(Message),
    /// 消息已送达
    MessageDelivered {
        message_id: MessageId,
        delivered_at: Timestamp,
    },
    /// 消息已读
    MessageRead {
        message_id: MessageId,
        read_at: Timestamp,
        read_by: UserId,
    },
    UserStartedTyping(UserId),
    UserStoppedTyping(UserId),
    /// 操作失败，仅发送给调用方连接
    Error(String),
    OnlineUsers(Vec<UserId>),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// 事件名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserOnline(_) => "UserOnline",
            Self::UserOffline(_) => "UserOffline",
            Self::MessageSent(_) => "MessageSent",
            Self::MessageReceived(_) => "MessageReceived",
            Self::MessageDelivered { .. } => "MessageDelivered",
            Self::MessageRead { .. } => "MessageRead",
            Self::UserStartedTyping(_) => "UserStartedTyping",
            Self::UserStoppedTyping(_) => "UserStoppedTyping",
            Self::Error(_) => "Error",
            Self::OnlineUsers(_) => "OnlineUsers",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
