use domain::StoreError;
use thiserror::Error;

use crate::broadcaster::BroadcastError;

/// 中继操作错误
///
/// `Display` 文本会原样作为 `Error` 事件发送给调用方连接。
#[derive(Debug, Error)]
pub enum RelayError {
    /// 连接尚未通过 JoinChat 注册身份
    #[error("User not authenticated")]
    Authentication,
    #[error("validation failed: {0}")]
    Validation(String),
    /// 无法解析的客户端帧
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// 单个连接投递失败，只记录日志，不会发送给任何客户端
    #[error("transport error: {0}")]
    Transport(#[from] BroadcastError),
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for RelayError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Validation(message) => RelayError::Validation(message),
            StoreError::NotFound(message) => RelayError::NotFound(message),
            StoreError::Storage(message) => RelayError::Store(message),
        }
    }
}

impl RelayError {
    /// 是否属于调用方可自行修正的错误
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::Authentication
                | RelayError::Validation(_)
                | RelayError::InvalidCommand(_)
                | RelayError::NotFound(_)
        )
    }
}
