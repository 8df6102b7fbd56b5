//! 通知服务错误类型
//!
//! 按失败阶段区分负载解码、收件人解析、邮件发送以及传输层错误，
//! 消费循环遇到任一错误都会终止本次运行且不确认当前批次。

use mailer_shared::error::MailerError;
use thiserror::Error;

/// 负载编解码错误，解码对应 base64 → zlib → JSON 三个阶段，`Compress` 仅出现在编码路径
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("base64 解码失败: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("zlib 解压失败: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("zlib 压缩失败: {0}")]
    Compress(#[source] std::io::Error),

    #[error("解压后的负载超过上限: {limit} 字节")]
    TooLarge { limit: u64 },

    #[error("JSON 解析失败: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("通知负载解码失败: {0}")]
    Decode(#[from] DecodeError),

    #[error("收件人解析失败: {0}")]
    RecipientResolution(String),

    #[error("邮件发送失败: 收件人={recipients}, 原因={reason}")]
    SendFailed { recipients: String, reason: String },

    #[error(transparent)]
    Shared(#[from] MailerError),
}

impl NotificationError {
    /// 失败阶段分类，用于日志字段和指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::RecipientResolution(_) | Self::SendFailed { .. } => "delivery",
            Self::Shared(_) => "transport",
        }
    }
}
