use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{TaskDefinition, WorkerAction};
use crate::policy::{ExpirationPolicy, PolicyStatus};

/// 作业在Job Store中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Active,
    Cancelled,
    Completed,
    Failed,
    Paused,
    Waiting,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Active => "Active",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Paused => "Paused",
            JobStatus::Waiting => "Waiting",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 被拒绝任务的失败详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub failure_id: String,
    #[serde(with = "failure_time")]
    pub failure_time: DateTime<Utc>,
    pub failure_source: String,
    pub failure_message: String,
}

/// 没有来源信息时的失败来源
pub const UNKNOWN_FAILURE_SOURCE: &str = "Unknown - no source info";

impl JobFailure {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

mod failure_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// 前置作业全部完成后可以开始执行的作业
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentJob {
    pub partition_id: String,
    pub job_id: String,
    pub task: TaskDefinition,
}

/// 作业提交请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewJob {
    pub name: Option<String>,
    pub description: Option<String>,
    pub external_data: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub expiration: BTreeMap<String, ExpirationPolicy>,
    pub task: WorkerAction,
    pub prerequisite_job_ids: Vec<String>,
    pub delay: u32,
}

/// 写入Job Store的作业记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub partition_id: String,
    pub job_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub external_data: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub policies: BTreeMap<PolicyStatus, ExpirationPolicy>,
    pub task: TaskDefinition,
    pub prerequisite_job_ids: Vec<String>,
    pub delay: u32,
}
