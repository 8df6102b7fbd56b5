//! 通知负载编解码
//!
//! 上游发布的消息体为 `base64(zlib(json))`。解码是纯函数：
//! 相同输入总是得到相同的 `DecodedEvent` 或相同的错误。

use std::io::Read;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use flate2::Compression;
use flate2::read::{ZlibDecoder, ZlibEncoder};
use serde_json::Value;

use crate::error::DecodeError;

/// 解压后 JSON 文档的大小上限（16 MiB）
pub const MAX_DECODED_BYTES: u64 = 16 * 1024 * 1024;

/// 解码后的通知事件
///
/// 字段集合由上游生产者决定，消费循环只负责透传；
/// 访问器供邮件投递读取策略名、资源列表和 action 配置。
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent(Value);

impl DecodedEvent {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    pub fn document(&self) -> &Value {
        &self.0
    }

    pub fn into_document(self) -> Value {
        self.0
    }

    /// 策略名，兼容 `"policy": "p1"` 和 `"policy": {"name": "p1"}` 两种形态
    pub fn policy_name(&self) -> Option<&str> {
        match self.0.get("policy")? {
            Value::String(name) => Some(name),
            Value::Object(policy) => policy.get("name").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn policy_description(&self) -> Option<&str> {
        self.0
            .get("policy")
            .and_then(|p| p.get("description"))
            .and_then(Value::as_str)
    }

    pub fn resources(&self) -> &[Value] {
        self.0
            .get("resources")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn action(&self) -> Option<&Value> {
        self.0.get("action")
    }

    pub fn account(&self) -> Option<&str> {
        self.0
            .get("account")
            .or_else(|| self.0.get("account_id"))
            .and_then(Value::as_str)
    }

    pub fn region(&self) -> Option<&str> {
        self.0.get("region").and_then(Value::as_str)
    }
}

/// 解码消息负载：base64 → zlib 解压 → JSON 解析
pub fn decode_payload(payload: impl AsRef<[u8]>) -> Result<DecodedEvent, DecodeError> {
    let compressed = BASE64.decode(payload.as_ref().trim_ascii())?;

    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .take(MAX_DECODED_BYTES + 1)
        .read_to_end(&mut inflated)
        .map_err(DecodeError::Decompress)?;

    if inflated.len() as u64 > MAX_DECODED_BYTES {
        return Err(DecodeError::TooLarge {
            limit: MAX_DECODED_BYTES,
        });
    }

    let document: Value = serde_json::from_slice(&inflated)?;
    Ok(DecodedEvent::new(document))
}

/// 编码消息负载：JSON 序列化 → zlib 压缩 → base64，是 `decode_payload` 的逆操作
pub fn encode_payload(document: &Value) -> Result<String, DecodeError> {
    let json = serde_json::to_vec(document)?;

    let mut compressed = Vec::new();
    ZlibEncoder::new(json.as_slice(), Compression::default())
        .read_to_end(&mut compressed)
        .map_err(DecodeError::Compress)?;

    Ok(BASE64.encode(compressed))
}
