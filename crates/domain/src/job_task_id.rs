use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// 消息ID中未包含分区时使用的分区
pub const DEFAULT_PARTITION_ID: &str = "default";

/// 短ID中哈希部分的最大长度
pub const MAX_SHORT_ID_HASH_LEN: usize = 54;

/// 作业任务标识: 分区 + 任务ID
///
/// 任务ID由作业ID和可选的子任务后缀组成，例如 `J1.3.2` 的作业ID为 `J1`，
/// 后缀为 `.3.2`。线上格式为 `partitionId:taskId`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobTaskId {
    partition_id: String,
    task_id: String,
}

impl JobTaskId {
    pub fn new(partition_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            task_id: task_id.into(),
        }
    }

    /// 解析线上格式，按第一个 `:` 拆分
    pub fn from_message_id(message_id: &str) -> Self {
        match message_id.split_once(':') {
            Some((partition_id, task_id)) => Self::new(partition_id, task_id),
            None => Self::new(DEFAULT_PARTITION_ID, message_id),
        }
    }

    pub fn message_id(&self) -> String {
        format!("{}:{}", self.partition_id, self.task_id)
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn job_id(&self) -> &str {
        match self.task_id.find('.') {
            Some(idx) => &self.task_id[..idx],
            None => &self.task_id,
        }
    }

    /// 子任务后缀，包含开头的 `.`
    pub fn suffix(&self) -> Option<&str> {
        self.task_id.find('.').map(|idx| &self.task_id[idx..])
    }

    pub fn is_job_level(&self) -> bool {
        self.suffix().is_none()
    }

    /// 有界长度的稳定标识，用于存储端对名称长度有限制的场景
    pub fn short_id(&self) -> String {
        let mut hasher = sha2::Sha256::new();
        hasher.update(self.partition_id.as_bytes());
        hasher.update(b":");
        hasher.update(self.job_id().as_bytes());
        let hash = URL_SAFE_NO_PAD.encode(hasher.finalize());

        match self.suffix() {
            Some(suffix) => format!("{hash}{suffix}"),
            None => hash,
        }
    }
}

impl fmt::Display for JobTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_id, self.task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_splits_on_first_separators() {
        let id = JobTaskId::from_message_id("tenant-a:J1.3.2");
        assert_eq!(id.partition_id(), "tenant-a");
        assert_eq!(id.task_id(), "J1.3.2");
        assert_eq!(id.job_id(), "J1");
        assert_eq!(id.suffix(), Some(".3.2"));
        assert!(!id.is_job_level());
    }

    #[test]
    fn test_missing_partition_uses_default() {
        let id = JobTaskId::from_message_id("J7");
        assert_eq!(id.partition_id(), DEFAULT_PARTITION_ID);
        assert_eq!(id.job_id(), "J7");
        assert_eq!(id.suffix(), None);
        assert_eq!(id.message_id(), "default:J7");
    }

    #[test]
    fn test_short_id_keeps_suffix_and_bounded_hash() {
        let job = JobTaskId::new("p1", "job-1");
        let task = JobTaskId::new("p1", "job-1.4*");
        let job_short = job.short_id();
        let task_short = task.short_id();

        assert!(job_short.len() <= MAX_SHORT_ID_HASH_LEN);
        assert_eq!(task_short, format!("{job_short}.4*"));
        assert_ne!(job_short, JobTaskId::new("p2", "job-1").short_id());
    }

    #[test]
    fn test_display_matches_message_id() {
        let id = JobTaskId::new("p", "j.1");
        assert_eq!(id.to_string(), id.message_id());
    }

    proptest! {
        #[test]
        fn message_id_round_trips(
            partition in "[a-zA-Z0-9_-]{0,16}",
            task in "[a-zA-Z0-9_.:*-]{1,24}",
        ) {
            let id = JobTaskId::new(partition, task);
            prop_assert_eq!(JobTaskId::from_message_id(&id.message_id()), id);
        }

        #[test]
        fn short_id_is_stable_for_job_level_ids(
            partition in "[a-zA-Z0-9_-]{1,16}",
            job in "[a-zA-Z0-9_-]{1,24}",
        ) {
            let id = JobTaskId::new(partition.clone(), job.clone());
            prop_assert_eq!(id.job_id(), id.task_id());
            let first = id.short_id();
            prop_assert_eq!(&first, &JobTaskId::new(partition, job).short_id());
            prop_assert!(first.len() <= MAX_SHORT_ID_HASH_LEN);
        }
    }
}
