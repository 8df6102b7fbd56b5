//! 邮件发送通道
//!
//! 通过 `MailTransport` trait 抽象实际的邮件投递。当前提供的 `LoggingTransport`
//! 为模拟发送（仅记录日志），便于在无外部依赖的情况下验证消费管道的完整性。
//! 接入 SMTP 或邮件服务商 API 时只需实现同一 trait。

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::NotificationError;

/// 待发送的邮件
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// 邮件发送通道，返回外部通道分配的消息标识
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<String, NotificationError>;
}

/// 模拟邮件发送通道
///
/// 生产环境中替换为 SMTP 或邮件服务商（如 SendGrid）的 API 调用
pub struct LoggingTransport;

#[async_trait]
impl MailTransport for LoggingTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<String, NotificationError> {
        if email.to.is_empty() {
            return Err(NotificationError::SendFailed {
                recipients: String::new(),
                reason: "收件人为空".to_string(),
            });
        }

        let message_id = Uuid::now_v7().to_string();

        info!(
            channel = "EMAIL",
            message_id = %message_id,
            from = %email.from,
            to = ?email.to,
            subject = %email.subject,
            body_bytes = email.body.len(),
            "模拟发送邮件通知"
        );

        Ok(message_id)
    }
}
