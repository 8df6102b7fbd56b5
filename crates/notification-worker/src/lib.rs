//! 通知工作者服务
//!
//! 从 Pub/Sub 订阅拉取策略通知，解码后按收件人分组发送邮件。
//! 整批处理成功才推进订阅游标，任何失败都会让该批次在下次运行时重新投递。

pub mod codec;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod templates;
pub mod transport;
