//! 测试工具模块
//!
//! 提供消费链路测试所需的 Mock 订阅和消息构造函数，
//! 让消费循环在无外部依赖的情况下验证拉取、确认与终止行为。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::error::MailerError;
use crate::pubsub::{PubsubMessage, ReceivedMessage, SubscriptionClient, SubscriptionName};

// ==================== 消息构造 ====================

/// 固定的基准发布时间，保证断言可重复
pub fn base_publish_time() -> DateTime<Utc> {
    "2019-05-13T18:31:17.926Z"
        .parse()
        .unwrap_or_else(|_| Utc::now())
}

/// 按给定 data 和发布时间构造一条消息
pub fn received_message(data: impl Into<String>, publish_time: DateTime<Utc>) -> ReceivedMessage {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::SeqCst);

    ReceivedMessage {
        ack_id: format!("ack-{seq}"),
        message: PubsubMessage {
            data: data.into(),
            message_id: seq.to_string(),
            publish_time,
            attributes: HashMap::new(),
        },
        delivery_attempt: None,
    }
}

/// 构造一个发布时间按秒递增的批次
pub fn message_batch(payloads: &[String], start: DateTime<Utc>) -> Vec<ReceivedMessage> {
    payloads
        .iter()
        .enumerate()
        .map(|(i, data)| received_message(data.clone(), start + Duration::seconds(i as i64)))
        .collect()
}

// ==================== Mock 订阅 ====================

/// 预设批次的内存订阅
///
/// 每次 pull 依次弹出一个预设批次（超出 max_messages 的部分保留到下次），耗尽后返回空批次；
/// 记录 pull 次数、请求的 max_messages 以及每次 seek 的时间。
pub struct MockSubscription {
    name: SubscriptionName,
    batches: Mutex<VecDeque<Vec<ReceivedMessage>>>,
    pull_count: AtomicUsize,
    requested_sizes: Mutex<Vec<u32>>,
    seeks: Mutex<Vec<DateTime<Utc>>>,
    fail_pull_at: Option<usize>,
    fail_seek: bool,
}

impl MockSubscription {
    pub fn new(batches: Vec<Vec<ReceivedMessage>>) -> Self {
        Self {
            name: SubscriptionName::parse("projects/test-project/subscriptions/test-mailer")
                .unwrap_or_else(|e| panic!("测试订阅名无效: {e}")),
            batches: Mutex::new(batches.into()),
            pull_count: AtomicUsize::new(0),
            requested_sizes: Mutex::new(Vec::new()),
            seeks: Mutex::new(Vec::new()),
            fail_pull_at: None,
            fail_seek: false,
        }
    }

    /// 没有任何消息的订阅
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// 第 `n` 次（从 1 开始）pull 返回传输错误
    pub fn failing_pull_at(mut self, n: usize) -> Self {
        self.fail_pull_at = Some(n);
        self
    }

    /// 所有 seek 均返回服务端错误
    pub fn failing_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    pub fn pull_count(&self) -> usize {
        self.pull_count.load(Ordering::SeqCst)
    }

    pub fn requested_sizes(&self) -> Vec<u32> {
        self.requested_sizes.lock().clone()
    }

    pub fn seeks(&self) -> Vec<DateTime<Utc>> {
        self.seeks.lock().clone()
    }
}

#[async_trait]
impl SubscriptionClient for MockSubscription {
    fn subscription(&self) -> &SubscriptionName {
        &self.name
    }

    async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, MailerError> {
        let attempt = self.pull_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.requested_sizes.lock().push(max_messages);

        if self.fail_pull_at == Some(attempt) {
            return Err(MailerError::Transport {
                operation: "pull",
                message: "mock connection refused".to_string(),
            });
        }

        // 超出 max_messages 的消息留在队首，下次 pull 继续返回
        let mut batches = self.batches.lock();
        let mut batch = batches.pop_front().unwrap_or_default();
        if batch.len() > max_messages as usize {
            let remainder = batch.split_off(max_messages as usize);
            batches.push_front(remainder);
        }
        Ok(batch)
    }

    async fn seek(&self, time: DateTime<Utc>) -> Result<(), MailerError> {
        if self.fail_seek {
            return Err(MailerError::PubSubStatus {
                operation: "seek",
                status: 503,
                body: "mock unavailable".to_string(),
            });
        }
        self.seeks.lock().push(time);
        Ok(())
    }
}
