//! Pub/Sub 通知消费者
//!
//! 严格串行的拉取 → 处理 → 确认循环：
//! 1. 从订阅非阻塞拉取一批消息，空批次即表示订阅已排空，本次运行结束；
//! 2. 逐条解码并交给邮件投递，任何错误都立即终止运行；
//! 3. 整批处理完成后，以最后一条消息的发布时间 seek 订阅游标。
//!
//! 失败时当前批次不会被确认，游标停在失败批次之前，下次运行会重新投递。

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use mailer_shared::config::DEFAULT_MAX_MESSAGES;
use mailer_shared::observability::metrics;
use mailer_shared::pubsub::{ReceivedMessage, SubscriptionClient, format_watermark};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::codec::decode_payload;
use crate::delivery::MailDelivery;
use crate::error::NotificationError;

/// 单次运行的统计信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// 已处理并确认的非空批次数
    pub batches: usize,
    pub messages: usize,
    pub dispatched: usize,
    /// 最后一次 seek 使用的水位
    pub last_watermark: Option<DateTime<Utc>>,
    /// 是否因关闭信号提前结束
    pub interrupted: bool,
}

/// Pub/Sub 通知消费者
///
/// 组合订阅客户端（拉取与确认）和邮件投递两个协作者。
/// 同一订阅同一时间只应有一个消费者在运行。
pub struct PubSubMailConsumer {
    client: Arc<dyn SubscriptionClient>,
    delivery: Arc<dyn MailDelivery>,
    max_messages: u32,
}

impl PubSubMailConsumer {
    pub fn new(client: Arc<dyn SubscriptionClient>, delivery: Arc<dyn MailDelivery>) -> Self {
        Self {
            client,
            delivery,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }

    /// 设置单次拉取的最大消息数，0 会被提升为 1
    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages.max(1);
        self
    }

    /// 运行消费循环，直到订阅排空、收到关闭信号或遇到第一个错误
    ///
    /// 关闭信号只在发起新一轮拉取前检查，已开始处理的批次会完整处理并确认。
    pub async fn run(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, NotificationError> {
        let subscription = self.client.subscription().to_string();
        info!(
            subscription = %subscription,
            max_messages = self.max_messages,
            "开始从 Pub/Sub 订阅拉取通知消息"
        );

        let mut summary = RunSummary::default();

        loop {
            if *shutdown.borrow() {
                info!(subscription = %subscription, "收到关闭信号，停止拉取新批次");
                summary.interrupted = true;
                break;
            }

            let batch = self.client.pull(self.max_messages).await.map_err(|e| {
                error!(subscription = %subscription, error = %e, "拉取消息失败");
                metrics::record_pubsub_error("pull");
                NotificationError::from(e)
            })?;

            let Some(watermark) = batch.last().map(ReceivedMessage::publish_time) else {
                info!(subscription = %subscription, "订阅中已无待处理消息");
                break;
            };
            warn_if_out_of_order(&batch);

            let started = Instant::now();
            let dispatched = self.process_batch(&batch).await?;

            self.client.seek(watermark).await.map_err(|e| {
                error!(
                    subscription = %subscription,
                    watermark = %format_watermark(watermark),
                    error = %e,
                    "确认批次失败，本批次将在下次运行时重新投递"
                );
                metrics::record_pubsub_error("seek");
                NotificationError::from(e)
            })?;

            metrics::record_batch(batch.len(), dispatched, started.elapsed().as_secs_f64());
            info!(
                subscription = %subscription,
                messages = batch.len(),
                dispatched,
                watermark = %format_watermark(watermark),
                "批次处理完成并已确认"
            );

            summary.batches += 1;
            summary.messages += batch.len();
            summary.dispatched += dispatched;
            summary.last_watermark = Some(watermark);
        }

        info!(
            subscription = %subscription,
            batches = summary.batches,
            messages = summary.messages,
            dispatched = summary.dispatched,
            interrupted = summary.interrupted,
            "本次运行结束"
        );
        Ok(summary)
    }

    /// 按顺序处理整个批次，返回发送的邮件数
    async fn process_batch(&self, batch: &[ReceivedMessage]) -> Result<usize, NotificationError> {
        let mut dispatched = 0;
        for (index, received) in batch.iter().enumerate() {
            dispatched += self.process_message(received).await.map_err(|e| {
                error!(
                    message_id = %received.message.message_id,
                    index,
                    batch_size = batch.len(),
                    kind = e.kind(),
                    error = %e,
                    "处理通知消息失败，本批次不确认"
                );
                metrics::record_message_failure(e.kind());
                e
            })?;
        }
        Ok(dispatched)
    }

    /// 处理单条消息：解码 → 解析收件人 → 逐组发送
    async fn process_message(&self, received: &ReceivedMessage) -> Result<usize, NotificationError> {
        let event = decode_payload(received.message.data.as_bytes())?;

        let messages = self.delivery.recipients_and_messages(&event).await?;
        debug!(
            message_id = %received.message.message_id,
            policy = event.policy_name().unwrap_or_default(),
            groups = messages.len(),
            "收到通知事件"
        );

        for (recipients, message) in &messages {
            self.delivery.dispatch(&event, recipients, message).await?;
        }
        Ok(messages.len())
    }
}

/// 水位取自批次最后一条消息，依赖批内发布时间非递减；发现乱序时仅告警
fn warn_if_out_of_order(batch: &[ReceivedMessage]) {
    if let Some(pair) = batch
        .windows(2)
        .find(|pair| pair[1].publish_time() < pair[0].publish_time())
    {
        warn!(
            earlier_message_id = %pair[0].message.message_id,
            later_message_id = %pair[1].message.message_id,
            "批次内发布时间乱序，seek 可能跳过未处理的较早消息"
        );
    }
}
