//! 连接注册表
//!
//! 维护连接与用户之间的双向映射：connection -> user（至多一个），user -> connections（零个或多个）。
//! 两个视图放在同一把锁后面，每次变更都是一个短的同步临界区，读者永远看不到只更新了一半的状态。
//! 用户的广播组（group）就是这里的连接集合，不单独存储。

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use domain::{ConnectionId, UserId};

/// 注册结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub user_id: UserId,
    /// 这是该用户的第一个连接（上线）
    pub came_online: bool,
    /// 连接原先属于另一个用户时，被挪走后该用户的状态
    pub displaced: Option<Removal>,
}

/// 移除结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub user_id: UserId,
    /// 该用户已没有任何连接（离线）
    pub went_offline: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    connection_users: HashMap<ConnectionId, UserId>,
    user_connections: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn detach(&mut self, connection_id: ConnectionId) -> Option<Removal> {
        let user_id = self.connection_users.remove(&connection_id)?;
        let mut went_offline = false;
        if let Some(connections) = self.user_connections.get_mut(&user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                self.user_connections.remove(&user_id);
                went_offline = true;
            }
        }
        Some(Removal {
            user_id,
            went_offline,
        })
    }
}

/// 连接注册表，由服务进程持有，所有映射变更都必须经过这里
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 将连接注册到用户名下
    ///
    /// 同一连接重复注册到同一用户是空操作；注册到另一个用户时覆盖旧映射，
    /// 旧用户因此离线的情况通过 `displaced` 返回。
    pub fn register(&self, connection_id: ConnectionId, user_id: UserId) -> Registration {
        let mut state = self.write();

        if state.connection_users.get(&connection_id) == Some(&user_id) {
            return Registration {
                user_id,
                came_online: false,
                displaced: None,
            };
        }

        let displaced = state.detach(connection_id);

        let connections = state.user_connections.entry(user_id).or_default();
        let came_online = connections.is_empty();
        connections.insert(connection_id);
        state.connection_users.insert(connection_id, user_id);

        Registration {
            user_id,
            came_online,
            displaced,
        }
    }

    /// 移除连接；未知连接返回 `None`
    pub fn remove(&self, connection_id: ConnectionId) -> Option<Removal> {
        self.write().detach(connection_id)
    }

    /// 用户当前连接集合的快照
    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.read()
            .user_connections
            .get(&user_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 除指定用户外所有已注册连接的快照
    pub fn connections_except(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.read()
            .connection_users
            .iter()
            .filter(|(_, owner)| **owner != user_id)
            .map(|(connection_id, _)| *connection_id)
            .collect()
    }

    pub fn user_of(&self, connection_id: ConnectionId) -> Option<UserId> {
        self.read().connection_users.get(&connection_id).copied()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.read().user_connections.contains_key(&user_id)
    }

    /// 所有在线用户，按ID排序
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.read().user_connections.keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn connection_count(&self) -> usize {
        self.read().connection_users.len()
    }

    /// 检查两个视图是否一致
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let state = self.read();
        let forward_ok = state.connection_users.iter().all(|(connection_id, user_id)| {
            state
                .user_connections
                .get(user_id)
                .is_some_and(|connections| connections.contains(connection_id))
        });
        let reverse_ok = state.user_connections.iter().all(|(user_id, connections)| {
            !connections.is_empty()
                && connections
                    .iter()
                    .all(|connection_id| state.connection_users.get(connection_id) == Some(user_id))
        });
        forward_ok && reverse_ok
    }
}
