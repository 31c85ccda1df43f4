//! 内存中的外部存储实现
//!
//! 关系型存储不在本服务范围内，这里提供满足 [`MessageStore`] / [`UserStore`] 契约的内存版本，
//! 供单进程部署和测试使用。用户第一次更新最后在线时间（即加入聊天）时自动登记。

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use domain::{
    Message, MessageId, MessageStore, SendMessageRequest, StoreError, StoreResult, Timestamp,
    UserId, UserStore,
};
use validator::Validate;

#[derive(Debug, Default)]
struct StoreState {
    /// 已知用户及其最后在线时间
    users: HashMap<UserId, Option<Timestamp>>,
    messages: HashMap<MessageId, Message>,
    next_message_id: i64,
}

/// 内存消息/用户存储
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    state: RwLock<StoreState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 预先登记用户
    pub fn add_user(&self, user_id: UserId) {
        self.write().users.entry(user_id).or_insert(None);
    }

    pub fn last_seen(&self, user_id: UserId) -> Option<Timestamp> {
        self.read().users.get(&user_id).copied().flatten()
    }

    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryChatStore {
    async fn create(&self, sender_id: UserId, request: SendMessageRequest) -> StoreResult<Message> {
        request
            .validate()
            .map_err(|err| StoreError::validation(err.to_string()))?;

        let mut state = self.write();
        if !state.users.contains_key(&sender_id) {
            return Err(StoreError::validation(format!("sender {sender_id} does not exist")));
        }
        if !state.users.contains_key(&request.receiver_id) {
            return Err(StoreError::validation(format!(
                "receiver {} does not exist",
                request.receiver_id
            )));
        }

        state.next_message_id += 1;
        let message = Message {
            id: MessageId(state.next_message_id),
            sender_id,
            receiver_id: request.receiver_id,
            message_type: request.message_type,
            content: request.content,
            sent_at: chrono::Utc::now(),
            delivered_at: None,
            read_at: None,
        };
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn mark_delivered(&self, message_id: MessageId) -> StoreResult<bool> {
        let mut state = self.write();
        let Some(message) = state.messages.get_mut(&message_id) else {
            return Ok(false);
        };
        message.delivered_at.get_or_insert_with(chrono::Utc::now);
        Ok(true)
    }

    async fn mark_read(&self, reader_id: UserId, message_id: MessageId) -> StoreResult<bool> {
        let mut state = self.write();
        match state.messages.get_mut(&message_id) {
            Some(message) if message.receiver_id == reader_id => {
                message.read_at.get_or_insert_with(chrono::Utc::now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_by_id(&self, message_id: MessageId) -> StoreResult<Option<Message>> {
        Ok(self.read().messages.get(&message_id).cloned())
    }
}

#[async_trait]
impl UserStore for InMemoryChatStore {
    async fn touch_last_seen(&self, user_id: UserId) -> StoreResult<()> {
        self.write().users.insert(user_id, Some(chrono::Utc::now()));
        Ok(())
    }
}
