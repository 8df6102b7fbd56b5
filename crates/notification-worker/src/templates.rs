//! 通知邮件模板
//!
//! 根据解码后的事件生成邮件主题和纯文本正文。
//! 主题支持 `{policy}` `{account}` `{region}` 占位符，正文列出本组收件人负责的资源。

use serde_json::Value;

use crate::codec::DecodedEvent;

/// 资源标识的候选字段，按优先级依次查找
const RESOURCE_ID_KEYS: [&str; 3] = ["name", "id", "selfLink"];

/// 通知模板引擎
pub struct NotificationTemplateEngine {
    default_subject: String,
}

impl NotificationTemplateEngine {
    pub fn new(default_subject: impl Into<String>) -> Self {
        Self {
            default_subject: default_subject.into(),
        }
    }

    /// 渲染主题：优先使用 action.subject，缺失时回退到默认主题
    pub fn render_subject(&self, event: &DecodedEvent) -> String {
        let template = event
            .action()
            .and_then(|a| a.get("subject"))
            .and_then(Value::as_str)
            .unwrap_or(self.default_subject.as_str());

        template
            .replace("{policy}", event.policy_name().unwrap_or("unknown-policy"))
            .replace("{account}", event.account().unwrap_or("unknown-account"))
            .replace("{region}", event.region().unwrap_or("global"))
    }

    /// 渲染正文，`resources` 为当前收件人分组对应的资源子集
    pub fn render_body(&self, event: &DecodedEvent, resources: &[&Value]) -> String {
        let mut body = format!(
            "Policy: {}\n",
            event.policy_name().unwrap_or("unknown-policy")
        );
        if let Some(description) = event.policy_description() {
            body.push_str(&format!("Description: {description}\n"));
        }
        body.push_str(&format!(
            "Account: {}\nRegion: {}\n\nResources ({}):\n",
            event.account().unwrap_or("unknown-account"),
            event.region().unwrap_or("global"),
            resources.len()
        ));
        for resource in resources {
            body.push_str(&format!("  - {}\n", resource_id(resource)));
        }
        body
    }
}

impl Default for NotificationTemplateEngine {
    fn default() -> Self {
        Self::new("Policy notification - {policy}")
    }
}

/// 提取资源的可读标识
///
/// 字符串直接返回，数值等类型转为字符串表示；都找不到时输出紧凑 JSON。
pub fn resource_id(resource: &Value) -> String {
    RESOURCE_ID_KEYS
        .iter()
        .find_map(|key| resource.get(*key))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| resource.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_event() -> DecodedEvent {
        DecodedEvent::new(json!({
            "policy": { "name": "open-firewall", "description": "防火墙规则对公网开放" },
            "action": { "to": ["ops@example.com"], "subject": "[{account}/{region}] {policy}" },
            "account": "cloud-ops",
            "region": "us-east1",
            "resources": []
        }))
    }

    #[test]
    fn test_render_subject_from_action() {
        let engine = NotificationTemplateEngine::default();
        assert_eq!(
            engine.render_subject(&make_event()),
            "[cloud-ops/us-east1] open-firewall"
        );
    }

    #[test]
    fn test_render_subject_falls_back_to_default() {
        let engine = NotificationTemplateEngine::new("Alert: {policy} in {account}");
        let event = DecodedEvent::new(json!({ "policy": "p1" }));
        assert_eq!(engine.render_subject(&event), "Alert: p1 in unknown-account");
    }

    #[test]
    fn test_render_body_lists_resources() {
        let engine = NotificationTemplateEngine::default();
        let first = json!({ "name": "fw-allow-all" });
        let second = json!({ "id": 42 });

        let body = engine.render_body(&make_event(), &[&first, &second]);
        assert_eq!(
            body,
            "Policy: open-firewall\n\
             Description: 防火墙规则对公网开放\n\
             Account: cloud-ops\n\
             Region: us-east1\n\
             \n\
             Resources (2):\n  - fw-allow-all\n  - 42\n"
        );
    }

    #[test]
    fn test_resource_id_priority_and_fallback() {
        assert_eq!(resource_id(&json!({ "id": "i-1", "name": "web" })), "web");
        assert_eq!(
            resource_id(&json!({ "selfLink": "https://compute/instances/a" })),
            "https://compute/instances/a"
        );
        assert_eq!(resource_id(&json!({ "arn": "x" })), r#"{"arn":"x"}"#);
    }
}
