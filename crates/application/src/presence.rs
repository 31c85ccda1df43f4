//! 在线状态广播
//!
//! 在线状态不单独存储：用户在线当且仅当注册表里有它的连接。
//! 注册表变更与对应的上线/离线广播在同一把公告锁内完成，中间没有挂起点：
//! 每次转换恰好广播一次，观察者看到的顺序与注册表变更顺序一致。
//! 最后在线时间在广播之后更新，调用被取消时只会丢失这次更新。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{ConnectionId, ServerEvent, UserId, UserStore};

use crate::broadcaster::ConnectionHub;
use crate::registry::{ConnectionRegistry, Registration, Removal};

pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
    hub: Arc<ConnectionHub>,
    users: Arc<dyn UserStore>,
    /// 串行化“注册表变更 + 广播”，不跨越任何 await
    announcements: Mutex<()>,
}

impl PresenceBroadcaster {
    pub fn new(hub: Arc<ConnectionHub>, users: Arc<dyn UserStore>) -> Self {
        Self {
            registry: hub.registry().clone(),
            hub,
            users,
            announcements: Mutex::new(()),
        }
    }

    fn announcements(&self) -> MutexGuard<'_, ()> {
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册连接，必要时广播上线
    pub async fn connect(&self, connection_id: ConnectionId, user_id: UserId) -> Registration {
        let registration = {
            let _order = self.announcements();
            let registration = self.registry.register(connection_id, user_id);
            if let Some(displaced) = registration.displaced.filter(|d| d.went_offline) {
                self.announce(displaced.user_id, ServerEvent::UserOffline(displaced.user_id));
            }
            if registration.came_online {
                self.announce(user_id, ServerEvent::UserOnline(user_id));
            }
            registration
        };

        if let Some(displaced) = registration.displaced {
            tracing::info!(
                connection_id = %connection_id,
                from_user = %displaced.user_id,
                to_user = %user_id,
                "连接改绑到另一个用户"
            );
            if displaced.went_offline {
                self.touch_last_seen(displaced.user_id).await;
            }
        }
        if registration.came_online {
            self.touch_last_seen(user_id).await;
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            came_online = registration.came_online,
            "连接已注册"
        );
        registration
    }

    /// 移除连接，必要时广播离线；未知连接返回 `None`
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<Removal> {
        let removal = {
            let _order = self.announcements();
            let removal = self.registry.remove(connection_id)?;
            if removal.went_offline {
                self.announce(removal.user_id, ServerEvent::UserOffline(removal.user_id));
            }
            removal
        };

        if removal.went_offline {
            self.touch_last_seen(removal.user_id).await;
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %removal.user_id,
            went_offline = removal.went_offline,
            "连接已移除"
        );
        Some(removal)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.registry.is_online(user_id)
    }

    fn announce(&self, user_id: UserId, event: ServerEvent) {
        let report = self.hub.send_to_others(user_id, event);
        tracing::debug!(
            user_id = %user_id,
            delivered = report.delivered,
            failed = report.failed,
            "在线状态已广播"
        );
    }

    async fn touch_last_seen(&self, user_id: UserId) {
        if let Err(err) = self.users.touch_last_seen(user_id).await {
            tracing::warn!(user_id = %user_id, error = %err, "更新最后在线时间失败");
        }
    }
}
