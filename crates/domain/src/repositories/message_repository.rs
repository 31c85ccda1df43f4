//! 消息存储接口定义

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::message::{Message, SendMessageRequest};
use crate::value_objects::{MessageId, UserId};

/// 消息存储接口
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 持久化一条新消息
    ///
    /// 接收者或发送者不存在时返回 `StoreError::Validation`。
    async fn create(&self, sender_id: UserId, request: SendMessageRequest) -> StoreResult<Message>;

    /// 标记消息已送达，消息不存在时返回 `false`
    async fn mark_delivered(&self, message_id: MessageId) -> StoreResult<bool>;

    /// 标记消息已读
    ///
    /// 只有消息的接收者可以标记已读，其他人调用返回 `false`。
    async fn mark_read(&self, reader_id: UserId, message_id: MessageId) -> StoreResult<bool>;

    /// 根据ID查找消息
    async fn get_by_id(&self, message_id: MessageId) -> StoreResult<Option<Message>>;
}
