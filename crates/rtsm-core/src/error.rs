//! 错误定义模块

use thiserror::Error;

/// RTSM系统统一错误类型
#[derive(Error, Debug)]
pub enum RtsmError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    #[error("药品供应不足: {0}")]
    NoSupply(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

impl RtsmError {
    /// 该错误是否为领域守卫失败（非基础设施故障）
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            RtsmError::Database(_) | RtsmError::Config(_) | RtsmError::Internal(_)
        )
    }

    /// 该错误是否可由调用方稍后重试（供应不足或基础设施故障）
    pub fn is_retryable(&self) -> bool {
        matches!(self, RtsmError::NoSupply(_) | RtsmError::Database(_))
    }
}

/// RTSM系统统一结果类型
pub type Result<T> = std::result::Result<T, RtsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RtsmError::Conflict("already randomized".into()).is_domain());
        assert!(RtsmError::NoSupply("no packs".into()).is_retryable());
        assert!(!RtsmError::Database("connection reset".into()).is_domain());
        assert!(RtsmError::Database("connection reset".into()).is_retryable());
        assert!(!RtsmError::Conflict("already randomized".into()).is_retryable());
    }
}
