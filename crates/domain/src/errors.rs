//! 外部存储错误定义

use thiserror::Error;

/// 消息存储/用户存储返回的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// 请求不合法（例如接收者不存在）
    #[error("验证失败: {0}")]
    Validation(String),

    /// 引用的资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 底层存储故障
    #[error("存储错误: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

/// 存储操作结果类型
pub type StoreResult<T> = Result<T, StoreError>;
