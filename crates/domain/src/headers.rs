use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Worker框架在消息被拒绝时设置的头，值为拒绝原因
pub const REJECTED_HEADER: &str = "x-caf-worker-rejected";
/// Worker框架记录重试次数的头
pub const RETRY_HEADER: &str = "x-caf-worker-retry";

/// 消息头的值
///
/// 与AMQP字段表的值类型一一对应，转发时保持原有的宽度和类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Bool(bool),
    ShortShortInt(i8),
    ShortShortUInt(u8),
    ShortInt(i16),
    ShortUInt(u16),
    LongInt(i32),
    LongUInt(u32),
    Int(i64),
    Float(f32),
    Double(f64),
    Decimal { scale: u8, value: u32 },
    ShortText(String),
    Text(String),
    /// 非UTF-8内容的长字符串
    RawText(Vec<u8>),
    Array(Vec<HeaderValue>),
    Timestamp(u64),
    Table(MessageHeaders),
    Bytes(Vec<u8>),
    Void,
}

impl HeaderValue {
    fn as_integer(&self) -> Option<i64> {
        match self {
            HeaderValue::ShortShortInt(v) => Some(i64::from(*v)),
            HeaderValue::ShortShortUInt(v) => Some(i64::from(*v)),
            HeaderValue::ShortInt(v) => Some(i64::from(*v)),
            HeaderValue::ShortUInt(v) => Some(i64::from(*v)),
            HeaderValue::LongInt(v) => Some(i64::from(*v)),
            HeaderValue::LongUInt(v) => Some(i64::from(*v)),
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            HeaderValue::Bool(v) => v.to_string(),
            HeaderValue::Float(v) => v.to_string(),
            HeaderValue::Double(v) => v.to_string(),
            HeaderValue::Timestamp(v) => v.to_string(),
            HeaderValue::ShortText(v) | HeaderValue::Text(v) => v.clone(),
            HeaderValue::RawText(v) | HeaderValue::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
            other => match other.as_integer() {
                Some(v) => v.to_string(),
                None => format!("{other:?}"),
            },
        }
    }
}

/// 消息头，转发时原样透传
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeaders(BTreeMap<String, HeaderValue>);

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: HeaderValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: HeaderValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 提取拒绝原因和重试次数
    pub fn routing_metadata(&self) -> RoutingMetadata {
        let rejected_reason = self.get(REJECTED_HEADER).map(HeaderValue::as_text);
        let retry_count = match self.get(RETRY_HEADER) {
            Some(HeaderValue::ShortText(count) | HeaderValue::Text(count)) => {
                count.trim().parse().unwrap_or(0)
            }
            Some(value) => value
                .as_integer()
                .and_then(|count| u32::try_from(count).ok())
                .unwrap_or(0),
            None => 0,
        };

        RoutingMetadata {
            rejected_reason,
            retry_count,
        }
    }
}

impl FromIterator<(String, HeaderValue)> for MessageHeaders {
    fn from_iter<I: IntoIterator<Item = (String, HeaderValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingMetadata {
    pub rejected_reason: Option<String>,
    pub retry_count: u32,
}

impl RoutingMetadata {
    pub fn is_rejected(&self) -> bool {
        self.rejected_reason.is_some()
    }
}
