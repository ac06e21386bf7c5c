//! 按作业状态的过期策略
//!
//! 未显式给出的状态继承 `Default` 策略，`Default` 本身缺省为永不过期；
//! `Expired` 状态例外，缺省为删除。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use jobservice_core::{JobError, JobResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLICY_KEY: &str = "Default";
pub const NEVER_EXPIRES: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyStatus {
    Active,
    Cancelled,
    Completed,
    Expired,
    Failed,
    Paused,
    Waiting,
}

impl PolicyStatus {
    pub const ALL: [PolicyStatus; 7] = [
        PolicyStatus::Active,
        PolicyStatus::Cancelled,
        PolicyStatus::Completed,
        PolicyStatus::Expired,
        PolicyStatus::Failed,
        PolicyStatus::Paused,
        PolicyStatus::Waiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Active => "Active",
            PolicyStatus::Cancelled => "Cancelled",
            PolicyStatus::Completed => "Completed",
            PolicyStatus::Expired => "Expired",
            PolicyStatus::Failed => "Failed",
            PolicyStatus::Paused => "Paused",
            PolicyStatus::Waiting => "Waiting",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpirationOperation {
    #[default]
    Expire,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpirationPolicy {
    pub operation: ExpirationOperation,
    /// `none`、`createTime+P1D` 这类相对时间，或RFC 3339时间点
    pub expiration_time: String,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            operation: ExpirationOperation::Expire,
            expiration_time: NEVER_EXPIRES.to_string(),
        }
    }
}

impl ExpirationPolicy {
    pub fn new(operation: ExpirationOperation, expiration_time: impl Into<String>) -> Self {
        Self {
            operation,
            expiration_time: expiration_time.into(),
        }
    }

    /// 存储格式: 相对时间换算为分钟，例如 `createTime+P1D` -> `createTime+1440`
    pub fn store_expiration_time(&self) -> String {
        match parse_relative(&self.expiration_time) {
            Some((anchor, minutes)) => format!("{anchor}+{minutes}"),
            None => self.expiration_time.clone(),
        }
    }
}

/// 返回锚点和换算后的分钟数
fn parse_relative(expression: &str) -> Option<(&str, u64)> {
    let (anchor, duration) = expression.split_once("+P")?;
    if anchor != "createTime" && anchor != "lastUpdateTime" {
        return None;
    }

    let unit = duration.chars().last()?;
    let amount = &duration[..duration.len() - unit.len_utf8()];
    if amount.is_empty()
        || amount.starts_with('0')
        || !amount.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let minutes_per_unit = match unit {
        'M' => 1,
        'H' => 60,
        'D' => 1_440,
        'Y' => 525_600,
        _ => return None,
    };

    let amount: u64 = amount.parse().ok()?;
    Some((anchor, amount.checked_mul(minutes_per_unit)?))
}

/// 校验过期表达式
pub fn validate_expiration_time(expression: &str, now: DateTime<Utc>) -> JobResult<()> {
    if expression == NEVER_EXPIRES || parse_relative(expression).is_some() {
        return Ok(());
    }

    let instant = DateTime::parse_from_rfc3339(expression)
        .map_err(|_| JobError::bad_request(format!("Invalid date {expression}")))?;

    if instant.with_timezone(&Utc) <= now {
        return Err(JobError::bad_request(format!(
            "Date should be in the future ,{expression}"
        )));
    }

    Ok(())
}

/// 为每个状态生成生效的策略
pub fn build_policies(
    supplied: &BTreeMap<String, ExpirationPolicy>,
    now: DateTime<Utc>,
) -> JobResult<BTreeMap<PolicyStatus, ExpirationPolicy>> {
    let mut explicit = BTreeMap::new();
    let mut default_policy = ExpirationPolicy::default();

    for (key, policy) in supplied {
        validate_expiration_time(&policy.expiration_time, now)?;
        if key == DEFAULT_POLICY_KEY {
            default_policy = policy.clone();
        } else {
            let status = PolicyStatus::parse(key).ok_or_else(|| {
                JobError::bad_request(format!("Unknown job status in expiration policy: {key}"))
            })?;
            explicit.insert(status, policy.clone());
        }
    }

    let policies = PolicyStatus::ALL
        .into_iter()
        .map(|status| {
            let policy = match explicit.remove(&status) {
                Some(policy) => policy,
                None if status == PolicyStatus::Expired => {
                    ExpirationPolicy::new(ExpirationOperation::Delete, NEVER_EXPIRES)
                }
                None => default_policy.clone(),
            };
            (status, policy)
        })
        .collect();

    Ok(policies)
}
