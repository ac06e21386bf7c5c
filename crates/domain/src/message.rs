//! 在Worker之间传递的任务消息模型

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use jobservice_core::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job_task_id::JobTaskId;

/// 当前的消息格式版本
pub const TASK_MESSAGE_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    NewTask,
    ResultSuccess,
    ResultFailure,
    ResultException,
}

impl TaskStatus {
    pub fn is_success_path(self) -> bool {
        matches!(self, TaskStatus::NewTask | TaskStatus::ResultSuccess)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TaskStatus::NewTask => "NEW_TASK",
            TaskStatus::ResultSuccess => "RESULT_SUCCESS",
            TaskStatus::ResultFailure => "RESULT_FAILURE",
            TaskStatus::ResultException => "RESULT_EXCEPTION",
        };
        f.write_str(value)
    }
}

/// 跟踪信息，仅在作业要求跟踪时存在
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    #[serde(default)]
    pub job_task_id: Option<String>,
    /// 下一次状态检查的截止时间，线上单位为毫秒时间戳
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub status_check_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_check_url: Option<String>,
    #[serde(default)]
    pub tracking_pipe: Option<String>,
    #[serde(default)]
    pub track_to: Option<String>,
}

impl TrackingInfo {
    pub fn parsed_job_task_id(&self) -> Option<JobTaskId> {
        self.job_task_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(JobTaskId::from_message_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub name: String,
    pub version: String,
}

/// 任务消息信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub version: u32,
    pub task_id: String,
    pub task_classifier: String,
    pub task_api_version: u32,
    #[serde(with = "base64_bytes")]
    pub task_data: Vec<u8>,
    pub task_status: TaskStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl TaskMessage {
    pub fn new_task(
        task_id: impl Into<String>,
        task_classifier: impl Into<String>,
        task_api_version: u32,
        task_data: Vec<u8>,
    ) -> Self {
        Self {
            version: TASK_MESSAGE_VERSION,
            task_id: task_id.into(),
            task_classifier: task_classifier.into(),
            task_api_version,
            task_data,
            task_status: TaskStatus::NewTask,
            context: BTreeMap::new(),
            to: None,
            tracking: None,
            source_info: None,
            correlation_id: None,
        }
    }

    pub fn from_slice(data: &[u8]) -> JobResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| JobError::Serialization(format!("反序列化任务消息失败: {e}")))
    }

    pub fn to_vec(&self) -> JobResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| JobError::Serialization(format!("序列化任务消息失败: {e}")))
    }
}

/// 跟踪事件的任务数据，仅用于上报进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub job_task_id: String,
    #[serde(default)]
    pub estimated_percentage_completed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDataEncoding {
    Utf8,
    Base64,
}

impl TaskDataEncoding {
    /// 未声明编码时按UTF-8处理
    pub fn parse(value: Option<&str>) -> JobResult<Self> {
        match value {
            None => Ok(TaskDataEncoding::Utf8),
            Some(v) if v.eq_ignore_ascii_case("utf8") => Ok(TaskDataEncoding::Utf8),
            Some(v) if v.eq_ignore_ascii_case("base64") => Ok(TaskDataEncoding::Base64),
            Some(v) => Err(JobError::bad_request(format!("Unknown taskDataEncoding: {v}"))),
        }
    }
}

/// 作业提交中描述首个任务的Worker动作
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAction {
    pub task_classifier: Option<String>,
    pub task_api_version: Option<u32>,
    /// 字符串（按编码解码）或对象（由编解码器序列化）
    pub task_data: Option<Value>,
    pub task_data_encoding: Option<String>,
    pub task_pipe: Option<String>,
    pub target_pipe: Option<String>,
}

/// 解码后的任务定义
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub task_classifier: String,
    pub task_api_version: u32,
    pub task_data: Vec<u8>,
    pub task_pipe: String,
    pub target_pipe: String,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> JobResult<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(JobError::bad_request(message)),
    }
}

impl WorkerAction {
    pub fn to_definition(&self) -> JobResult<TaskDefinition> {
        let task_classifier = required(&self.task_classifier, "The task classifier has not been specified.")?;
        let task_api_version = match self.task_api_version {
            Some(version) if version > 0 => version,
            _ => return Err(JobError::bad_request("The task api version has not been specified.")),
        };
        let target_pipe = required(&self.target_pipe, "The target queue name has not been specified.")?;
        let task_pipe = required(&self.task_pipe, "The task pipe has not been specified.")?;
        let task_data = self.decode_task_data()?;

        Ok(TaskDefinition {
            task_classifier: task_classifier.to_string(),
            task_api_version,
            task_data,
            task_pipe: task_pipe.to_string(),
            target_pipe: target_pipe.to_string(),
        })
    }

    pub fn decode_task_data(&self) -> JobResult<Vec<u8>> {
        match &self.task_data {
            None => Err(JobError::bad_request("The task data has not been specified.")),
            Some(Value::String(text)) if text.is_empty() => {
                Err(JobError::bad_request("The task data has not been specified."))
            }
            Some(Value::String(text)) => {
                match TaskDataEncoding::parse(self.task_data_encoding.as_deref())? {
                    TaskDataEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
                    TaskDataEncoding::Base64 => STANDARD.decode(text).map_err(|e| {
                        JobError::bad_request(format!("The taskData is not valid base64: {e}"))
                    }),
                }
            }
            Some(Value::Object(object)) => {
                if self.task_data_encoding.is_some() {
                    return Err(JobError::bad_request(
                        "An encoding type has been found in the task along with taskDataObject. Remove taskDataEncoding and try again",
                    ));
                }
                serde_json::to_vec(object)
                    .map_err(|e| JobError::Serialization(format!("序列化任务数据失败: {e}")))
            }
            Some(_) => Err(JobError::bad_request("The taskData is an unexpected type")),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
