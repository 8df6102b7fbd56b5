//! 邮件投递
//!
//! `MailDelivery` 是消费循环与邮件系统之间的契约：先把一条解码后的事件
//! 拆分成「收件人集合 → 渲染好的邮件」映射，再逐条调用 `dispatch` 发送。
//! 同一事件的不同资源可能归属不同负责人，因此一条事件可以产生多封邮件。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mailer_shared::config::MailConfig;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::DecodedEvent;
use crate::error::NotificationError;
use crate::templates::{NotificationTemplateEngine, resource_id};
use crate::transport::{MailTransport, OutboundEmail};

/// action.to 中表示「按资源负责人标签解析」的特殊收件人
pub const RESOURCE_OWNER: &str = "resource-owner";

// ---------------------------------------------------------------------------
// RecipientSet / RenderedMessage
// ---------------------------------------------------------------------------

/// 去重且有序的收件人集合，可直接作为 map 的键
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipientSet(BTreeSet<String>);

impl RecipientSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.0.contains(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for RecipientSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

impl fmt::Display for RecipientSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(", "))
    }
}

/// 针对一组收件人渲染好的邮件
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub from: String,
    pub subject: String,
    pub body: String,
    /// 邮件中列出的资源数量
    pub resource_count: usize,
}

// ---------------------------------------------------------------------------
// MailDelivery
// ---------------------------------------------------------------------------

/// 邮件投递契约
///
/// 消费循环对每条解码后的事件调用一次 `recipients_and_messages`，
/// 再对返回映射中的每一项调用一次 `dispatch`。任何错误都会终止当前批次。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailDelivery: Send + Sync {
    async fn recipients_and_messages(
        &self,
        event: &DecodedEvent,
    ) -> Result<HashMap<RecipientSet, RenderedMessage>, NotificationError>;

    async fn dispatch(
        &self,
        event: &DecodedEvent,
        recipients: &RecipientSet,
        message: &RenderedMessage,
    ) -> Result<(), NotificationError>;
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

/// 基于 action.to 和资源标签解析收件人的邮件投递实现
pub struct EmailDelivery {
    config: MailConfig,
    templates: NotificationTemplateEngine,
    transport: Arc<dyn MailTransport>,
}

impl EmailDelivery {
    pub fn new(config: MailConfig, transport: Arc<dyn MailTransport>) -> Self {
        let templates = NotificationTemplateEngine::new(config.default_subject.clone());
        Self {
            config,
            templates,
            transport,
        }
    }

    /// 按收件人集合对资源分组
    ///
    /// 每个资源的收件人 = action.to 中的静态地址 ∪ 该资源的负责人标签地址，
    /// 收件人完全相同的资源合并到同一封邮件中。
    fn group_resources<'a>(
        &self,
        event: &'a DecodedEvent,
    ) -> Result<BTreeMap<RecipientSet, Vec<&'a Value>>, NotificationError> {
        let targets = action_targets(event)?;

        let static_addresses: Vec<&str> = targets
            .iter()
            .copied()
            .filter(|t| is_email(t))
            .collect();
        let include_owner = targets.contains(&RESOURCE_OWNER);

        for unsupported in targets
            .iter()
            .filter(|t| !is_email(t) && **t != RESOURCE_OWNER)
        {
            debug!(target_address = %unsupported, "不支持的收件人类型，跳过");
        }

        let mut groups: BTreeMap<RecipientSet, Vec<&'a Value>> = BTreeMap::new();
        for resource in event.resources() {
            let owners = if include_owner {
                self.owner_addresses(resource)
            } else {
                Vec::new()
            };

            let recipients: RecipientSet = static_addresses
                .iter()
                .map(|s| s.to_string())
                .chain(owners)
                .collect();

            if recipients.is_empty() {
                warn!(
                    policy = event.policy_name().unwrap_or_default(),
                    resource = %resource_id(resource),
                    "资源没有可用的收件人，跳过"
                );
                continue;
            }
            groups.entry(recipients).or_default().push(resource);
        }

        Ok(groups)
    }

    /// 按配置的标签名依次查找资源负责人地址
    fn owner_addresses(&self, resource: &Value) -> Vec<String> {
        self.config
            .contact_tags
            .iter()
            .filter_map(|tag| tag_value(resource, tag))
            .filter(|value| is_email(value))
            .map(String::from)
            .collect()
    }
}

#[async_trait]
impl MailDelivery for EmailDelivery {
    async fn recipients_and_messages(
        &self,
        event: &DecodedEvent,
    ) -> Result<HashMap<RecipientSet, RenderedMessage>, NotificationError> {
        let subject = self.templates.render_subject(event);

        let messages: HashMap<RecipientSet, RenderedMessage> = self
            .group_resources(event)?
            .into_iter()
            .map(|(recipients, resources)| {
                let message = RenderedMessage {
                    from: self.config.from_address.clone(),
                    subject: subject.clone(),
                    body: self.templates.render_body(event, &resources),
                    resource_count: resources.len(),
                };
                (recipients, message)
            })
            .collect();

        debug!(
            policy = event.policy_name().unwrap_or_default(),
            groups = messages.len(),
            "收件人解析完成"
        );
        Ok(messages)
    }

    async fn dispatch(
        &self,
        event: &DecodedEvent,
        recipients: &RecipientSet,
        message: &RenderedMessage,
    ) -> Result<(), NotificationError> {
        let email = OutboundEmail {
            from: message.from.clone(),
            to: recipients.to_vec(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        };

        let message_id = self.transport.send(&email).await?;

        info!(
            policy = event.policy_name().unwrap_or_default(),
            recipients = %recipients,
            resource_count = message.resource_count,
            message_id = %message_id,
            "通知邮件已发送"
        );
        Ok(())
    }
}

/// 读取 action.to，兼容字符串和字符串数组；缺失时视为无收件人
fn action_targets(event: &DecodedEvent) -> Result<Vec<&str>, NotificationError> {
    let Some(to) = event.action().and_then(|a| a.get("to")) else {
        return Ok(Vec::new());
    };

    match to {
        Value::String(single) => Ok(vec![single.as_str()]),
        Value::Array(entries) => Ok(entries.iter().filter_map(Value::as_str).collect()),
        other => Err(NotificationError::RecipientResolution(format!(
            "action.to 必须是字符串或字符串数组，实际为 {other}"
        ))),
    }
}

/// 从资源标签中读取指定 key 的值
///
/// 支持 `Tags: [{Key, Value}]`、`Tags: {k: v}` 以及 GCP 的 `labels: {k: v}`。
fn tag_value<'a>(resource: &'a Value, key: &str) -> Option<&'a str> {
    if let Some(tags) = resource.get("Tags") {
        let found = match tags {
            Value::Array(pairs) => pairs
                .iter()
                .find(|pair| pair.get("Key").and_then(Value::as_str) == Some(key))
                .and_then(|pair| pair.get("Value"))
                .and_then(Value::as_str),
            Value::Object(map) => map.get(key).and_then(Value::as_str),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }

    resource
        .get("labels")
        .and_then(|labels| labels.get(key))
        .and_then(Value::as_str)
}

fn is_email(candidate: &str) -> bool {
    candidate.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockMailTransport;
    use serde_json::json;

    fn mail_config() -> MailConfig {
        MailConfig {
            from_address: "cloud-custodian@example.com".to_string(),
            default_subject: "Policy notification - {policy}".to_string(),
            contact_tags: vec!["OwnerContact".to_string(), "owner".to_string()],
        }
    }

    fn delivery_with(transport: MockMailTransport) -> EmailDelivery {
        EmailDelivery::new(mail_config(), Arc::new(transport))
    }

    fn owner_event() -> DecodedEvent {
        DecodedEvent::new(json!({
            "policy": { "name": "untagged-instances" },
            "action": { "to": ["ops@example.com", "resource-owner"] },
            "account": "cloud-ops",
            "resources": [
                { "name": "vm-1", "labels": { "owner": "alice@example.com" } },
                { "name": "vm-2", "Tags": [{ "Key": "OwnerContact", "Value": "bob@example.com" }] },
                { "name": "vm-3", "labels": { "owner": "alice@example.com" } },
                { "name": "vm-4", "labels": { "owner": "not-an-address" } }
            ]
        }))
    }

    #[test]
    fn test_recipient_set_dedup_and_display() {
        let set: RecipientSet = ["b@example.com", " a@example.com ", "b@example.com", ""]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains("a@example.com"));
        assert_eq!(set.to_string(), "a@example.com, b@example.com");
    }

    #[test]
    fn test_tag_value_formats() {
        let list = json!({ "Tags": [{ "Key": "owner", "Value": "x@example.com" }] });
        let map = json!({ "Tags": { "owner": "y@example.com" } });
        let labels = json!({ "labels": { "owner": "z@example.com" } });

        assert_eq!(tag_value(&list, "owner"), Some("x@example.com"));
        assert_eq!(tag_value(&map, "owner"), Some("y@example.com"));
        assert_eq!(tag_value(&labels, "owner"), Some("z@example.com"));
        assert_eq!(tag_value(&labels, "team"), None);
    }

    #[tokio::test]
    async fn test_groups_resources_by_owner() {
        let delivery = delivery_with(MockMailTransport::new());
        let event = owner_event();

        let messages = delivery.recipients_and_messages(&event).await.unwrap();
        assert_eq!(messages.len(), 3);

        let alice: RecipientSet = ["ops@example.com", "alice@example.com"].into_iter().collect();
        let bob: RecipientSet = ["ops@example.com", "bob@example.com"].into_iter().collect();
        let ops_only: RecipientSet = ["ops@example.com"].into_iter().collect();

        assert_eq!(messages[&alice].resource_count, 2);
        assert!(messages[&alice].body.contains("vm-1"));
        assert!(messages[&alice].body.contains("vm-3"));
        assert_eq!(messages[&bob].resource_count, 1);
        assert_eq!(messages[&ops_only].resource_count, 1);
        assert!(messages[&ops_only].body.contains("vm-4"));

        for message in messages.values() {
            assert_eq!(message.from, "cloud-custodian@example.com");
            assert_eq!(message.subject, "Policy notification - untagged-instances");
        }
    }

    #[tokio::test]
    async fn test_owner_only_skips_resources_without_contact() {
        let delivery = delivery_with(MockMailTransport::new());
        let event = DecodedEvent::new(json!({
            "policy": "p1",
            "action": { "to": "resource-owner" },
            "resources": [
                { "name": "vm-1", "labels": { "owner": "alice@example.com" } },
                { "name": "vm-2" }
            ]
        }));

        let messages = delivery.recipients_and_messages(&event).await.unwrap();
        assert_eq!(messages.len(), 1);
        let (recipients, message) = messages.iter().next().unwrap();
        assert_eq!(recipients.to_vec(), vec!["alice@example.com"]);
        assert_eq!(message.resource_count, 1);
    }

    #[tokio::test]
    async fn test_missing_action_yields_no_messages() {
        let delivery = delivery_with(MockMailTransport::new());
        let event = DecodedEvent::new(json!({ "policy": "p1", "resources": [{ "name": "r" }] }));

        let messages = delivery.recipients_and_messages(&event).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_to_is_rejected() {
        let delivery = delivery_with(MockMailTransport::new());
        let event = DecodedEvent::new(json!({
            "policy": "p1",
            "action": { "to": 42 },
            "resources": [{ "name": "r" }]
        }));

        let err = delivery.recipients_and_messages(&event).await.unwrap_err();
        assert!(matches!(err, NotificationError::RecipientResolution(_)));
    }

    #[tokio::test]
    async fn test_dispatch_sends_through_transport() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_send()
            .withf(|email| {
                email.to == vec!["ops@example.com".to_string()]
                    && email.subject == "subject"
                    && email.from == "cloud-custodian@example.com"
            })
            .times(1)
            .returning(|_| Ok("msg-1".to_string()));

        let delivery = delivery_with(transport);
        let recipients: RecipientSet = ["ops@example.com"].into_iter().collect();
        let message = RenderedMessage {
            from: "cloud-custodian@example.com".to_string(),
            subject: "subject".to_string(),
            body: "body".to_string(),
            resource_count: 1,
        };

        delivery
            .dispatch(&owner_event(), &recipients, &message)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_propagates_transport_error() {
        let mut transport = MockMailTransport::new();
        transport.expect_send().times(1).returning(|_| {
            Err(NotificationError::SendFailed {
                recipients: "ops@example.com".to_string(),
                reason: "SMTP 421".to_string(),
            })
        });

        let delivery = delivery_with(transport);
        let recipients: RecipientSet = ["ops@example.com"].into_iter().collect();
        let message = RenderedMessage {
            from: "a@example.com".to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            resource_count: 0,
        };

        let err = delivery
            .dispatch(&owner_event(), &recipients, &message)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "delivery");
    }
}
