//! 用户存储接口定义

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::value_objects::UserId;

/// 用户存储接口
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// 更新最后在线时间
    async fn touch_last_seen(&self, user_id: UserId) -> StoreResult<()>;
}
