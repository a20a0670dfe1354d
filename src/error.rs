use crate::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("invalid election config: {0}")]
    Config(#[from] ConfigError),

    #[error("lease store error during {operation}: {cause:#}")]
    Store {
        operation: &'static str,
        cause: anyhow::Error,
    },

    #[error("lease store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl ElectionError {
    pub fn store(operation: &'static str, cause: anyhow::Error) -> Self {
        Self::Store { operation, cause }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// 存储不可达或超时，属于可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Timeout { .. })
    }
}
