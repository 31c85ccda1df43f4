//! 消息实体定义
//!
//! 一条点对点消息及其送达/已读状态。

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::value_objects::{MessageId, Timestamp, UserId};

/// 默认消息类型
pub const DEFAULT_MESSAGE_TYPE: &str = "text";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

/// 已持久化的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    /// text, image, audio, video, file
    pub message_type: String,
    pub content: Option<String>,
    pub sent_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
}

impl Message {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// 客户端发送消息请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: UserId,
    #[serde(default = "default_message_type")]
    #[validate(length(min = 1, max = 20))]
    pub message_type: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl SendMessageRequest {
    pub fn text(receiver_id: UserId, content: impl Into<String>) -> Self {
        Self {
            receiver_id,
            message_type: default_message_type(),
            content: Some(content.into()),
        }
    }
}
