//! 统一错误处理模块
//!
//! 定义各 crate 共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum MailerError {
    // ==================== Pub/Sub 传输错误 ====================
    #[error("Pub/Sub 请求失败: operation={operation}, 原因={message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("Pub/Sub 返回异常状态: operation={operation}, status={status}, body={body}")]
    PubSubStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    // ==================== 序列化错误 ====================
    #[error("序列化失败: {0}")]
    Serialization(String),

    // ==================== 验证错误 ====================
    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

impl MailerError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "PUBSUB_TRANSPORT_ERROR",
            Self::PubSubStatus { .. } => "PUBSUB_STATUS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 本 crate 不做重试，该判断供外层调度决定是否重新发起整次运行。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::PubSubStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
