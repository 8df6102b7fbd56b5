//! Pub/Sub 订阅客户端封装
//!
//! 将 Pub/Sub REST v1 的 `pull` / `seek` 调用封装为 `SubscriptionClient` trait，
//! 统一消息结构、错误映射与鉴权方式，消费循环只依赖 trait 而不关心传输细节。

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PubSubConfig;
use crate::error::MailerError;

// ---------------------------------------------------------------------------
// SubscriptionName
// ---------------------------------------------------------------------------

/// 经过校验的订阅全名：`projects/{project}/subscriptions/{subscription}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionName {
    project: String,
    subscription: String,
}

impl SubscriptionName {
    pub fn parse(raw: &str) -> Result<Self, MailerError> {
        let invalid = |message: &str| MailerError::InvalidArgument {
            field: "subscription".to_string(),
            message: format!("{message}: {raw:?}"),
        };

        let segments: Vec<&str> = raw.trim().split('/').collect();
        match segments.as_slice() {
            ["projects", project, "subscriptions", subscription]
                if !project.is_empty() && !subscription.is_empty() =>
            {
                Ok(Self {
                    project: project.to_string(),
                    subscription: subscription.to_string(),
                })
            }
            _ => Err(invalid(
                "订阅名必须为 projects/{project}/subscriptions/{subscription}",
            )),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }
}

impl fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/subscriptions/{}",
            self.project, self.subscription
        )
    }
}

// ---------------------------------------------------------------------------
// 消息结构
// ---------------------------------------------------------------------------

/// Pub/Sub 消息本体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// base64 文本，内容为压缩后的 JSON 文档
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: String,
    /// 发布时间，同时作为 seek 的水位来源
    pub publish_time: DateTime<Utc>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// 一次 pull 返回的单个信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    #[serde(default)]
    pub ack_id: String,
    pub message: PubsubMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_attempt: Option<i32>,
}

impl ReceivedMessage {
    pub fn publish_time(&self) -> DateTime<Utc> {
        self.message.publish_time
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    return_immediately: bool,
    max_messages: u32,
}

/// 队列为空时服务端返回 `{}`，因此 receivedMessages 需要默认值
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Serialize)]
struct SeekRequest {
    time: String,
}

#[derive(Debug, Deserialize)]
struct SeekResponse {}

/// 将水位格式化为 RFC 3339（保留亚秒精度，Z 结尾）
pub fn format_watermark(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ---------------------------------------------------------------------------
// SubscriptionClient
// ---------------------------------------------------------------------------

/// 订阅客户端接口
///
/// - `pull`：非阻塞拉取，最多 `max_messages` 条，可能返回空批次
/// - `seek`：把订阅游标推进到 `time`，发布时间不晚于该时刻的消息不再重投
#[async_trait]
pub trait SubscriptionClient: Send + Sync {
    fn subscription(&self) -> &SubscriptionName;

    async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, MailerError>;

    async fn seek(&self, time: DateTime<Utc>) -> Result<(), MailerError>;
}

// ---------------------------------------------------------------------------
// PubSubRestClient
// ---------------------------------------------------------------------------

/// 基于 REST v1 的订阅客户端
///
/// `reqwest::Client` 内部是 Arc 包装的连接池，克隆成本很低。
#[derive(Clone)]
pub struct PubSubRestClient {
    http: reqwest::Client,
    endpoint: String,
    subscription: SubscriptionName,
    access_token: Option<String>,
}

impl PubSubRestClient {
    pub fn new(config: &PubSubConfig) -> Result<Self, MailerError> {
        let subscription = SubscriptionName::parse(&config.subscription)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| MailerError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        info!(
            endpoint = %config.endpoint,
            subscription = %subscription,
            authenticated = config.access_token.is_some(),
            "Pub/Sub 订阅客户端已初始化"
        );

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            subscription,
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, verb: &str) -> String {
        format!("{}/v1/{}:{}", self.endpoint, self.subscription, verb)
    }

    /// 发送 POST 请求并解析 JSON 响应
    ///
    /// 非 2xx 状态统一映射为 `PubSubStatus`，保留响应体便于排查权限或配额问题。
    async fn call<B, R>(&self, operation: &'static str, body: &B) -> Result<R, MailerError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(operation)).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| MailerError::Transport {
            operation,
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailerError::PubSubStatus {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|e| MailerError::Transport {
            operation,
            message: e.to_string(),
        })?;

        serde_json::from_slice::<R>(&body)
            .map_err(|e| MailerError::Serialization(format!("{operation} 响应解析失败: {e}")))
    }
}

#[async_trait]
impl SubscriptionClient for PubSubRestClient {
    fn subscription(&self) -> &SubscriptionName {
        &self.subscription
    }

    async fn pull(&self, max_messages: u32) -> Result<Vec<ReceivedMessage>, MailerError> {
        let request = PullRequest {
            return_immediately: true,
            max_messages,
        };
        let response: PullResponse = self.call("pull", &request).await?;

        debug!(
            subscription = %self.subscription,
            received = response.received_messages.len(),
            "Pub/Sub pull 完成"
        );
        Ok(response.received_messages)
    }

    async fn seek(&self, time: DateTime<Utc>) -> Result<(), MailerError> {
        let request = SeekRequest {
            time: format_watermark(time),
        };
        let _: SeekResponse = self.call("seek", &request).await?;

        debug!(
            subscription = %self.subscription,
            time = %request.time,
            "Pub/Sub seek 完成"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
