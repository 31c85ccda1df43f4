//! 连接事件分发
//!
//! 每个在线连接持有一个有界的出站队列，由连接自己的写任务消费。
//! 按组（用户）广播时，组成员在发送时从 [`ConnectionRegistry`] 读取，逐个连接 `try_send`：
//! 单个连接队列已满或已关闭只影响它自己，失败会被记录并吞掉。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::{ConnectionId, ServerEvent, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::registry::ConnectionRegistry;

/// 单个连接投递失败
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("connection {0} is not attached")]
    NotAttached(ConnectionId),
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// 一次扇出的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

/// 连接出站队列集合
pub struct ConnectionHub {
    registry: Arc<ConnectionRegistry>,
    outbound: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new(registry: Arc<ConnectionRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            outbound: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 传输层建立连接时调用，返回该连接的出站事件接收端
    pub fn attach(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.outbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, sender);
        receiver
    }

    /// 传输层断开时调用，重复调用无副作用
    pub fn detach(&self, connection_id: ConnectionId) {
        self.outbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection_id);
    }

    pub fn is_attached(&self, connection_id: ConnectionId) -> bool {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&connection_id)
    }

    /// 投递到单个连接
    pub fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        event: ServerEvent,
    ) -> Result<(), BroadcastError> {
        let sender = self
            .outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection_id)
            .cloned()
            .ok_or(BroadcastError::NotAttached(connection_id))?;

        sender.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => BroadcastError::QueueFull(connection_id),
            mpsc::error::TrySendError::Closed(_) => BroadcastError::Closed(connection_id),
        })
    }

    /// 广播到用户的组（该用户当前所有连接）
    pub fn send_to_group(&self, user_id: UserId, event: ServerEvent) -> FanOut {
        let members = self.registry.connections_of(user_id);
        self.fan_out(&members, event)
    }

    /// 广播到除指定用户外的所有已注册连接
    pub fn send_to_others(&self, user_id: UserId, event: ServerEvent) -> FanOut {
        let members = self.registry.connections_except(user_id);
        self.fan_out(&members, event)
    }

    /// 逐个连接投递，失败只记录
    pub fn fan_out(&self, connection_ids: &[ConnectionId], event: ServerEvent) -> FanOut {
        let mut report = FanOut::default();
        for &connection_id in connection_ids {
            match self.send_to_connection(connection_id, event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        connection_id = %connection_id,
                        event = event.name(),
                        error = %err,
                        "事件投递失败"
                    );
                }
            }
        }
        report
    }
}
