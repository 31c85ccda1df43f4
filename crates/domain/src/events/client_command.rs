//! 客户端发给服务端的命令

use serde::{Deserialize, Serialize};

use crate::message::SendMessageRequest;
use crate::value_objects::{MessageId, UserId};

/// 客户端命令
///
/// 以 `type` 字段区分，例如 `{"type": "StartTyping", "receiverId": 2}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    JoinChat { user_id: UserId },
    SendMessage(SendMessageRequest),
    MarkMessageAsRead { message_id: MessageId },
    StartTyping { receiver_id: UserId },
    StopTyping { receiver_id: UserId },
    GetOnlineUsers,
}

impl ClientCommand {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
