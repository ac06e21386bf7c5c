use std::sync::Arc;

use chrono::{Duration, Utc};
use jobservice_core::config::PublisherConfig;
use jobservice_core::{JobError, JobResult};
use jobservice_domain::{
    JobTaskId, MessageHeaders, MessagePublisher, TaskDefinition, TaskMessage, TrackingInfo,
    WorkerAction,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const INVALID_INTERVAL: &str = "Please provide a valid integer for statusCheckIntervalSeconds.";

/// 构建带跟踪信息的任务消息并发布到任务队列
///
/// 发布失败时重试一次，第二次仍失败则返回错误。重复投递由下游的幂等上报处理。
pub struct TaskPublisher {
    publisher: Arc<dyn MessagePublisher>,
    webservice_url: Url,
    tracking_pipe: String,
    status_check_interval: Duration,
}

impl TaskPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>, config: &PublisherConfig) -> JobResult<Self> {
        let seconds: i64 = config
            .status_check_interval_seconds
            .trim()
            .parse()
            .map_err(|_| JobError::configuration(INVALID_INTERVAL))?;
        if seconds < 0 {
            return Err(JobError::configuration(INVALID_INTERVAL));
        }
        let status_check_interval = Duration::try_seconds(seconds)
            .filter(|interval| Utc::now().checked_add_signed(*interval).is_some())
            .ok_or_else(|| JobError::configuration(INVALID_INTERVAL))?;

        let webservice_url = Url::parse(&config.webservice_url).map_err(|e| {
            JobError::configuration(format!("无效的作业服务URL {}: {e}", config.webservice_url))
        })?;
        if webservice_url.cannot_be_a_base() {
            return Err(JobError::configuration(format!(
                "作业服务URL不能作为基础URL: {}",
                config.webservice_url
            )));
        }

        Ok(Self {
            publisher,
            webservice_url,
            tracking_pipe: config.tracking_pipe.clone(),
            status_check_interval,
        })
    }

    /// `{webservice_url}/partitions/{partitionId}/jobs/{jobId}/status`
    pub fn status_check_url(&self, partition_id: &str, job_id: &str) -> String {
        let mut url = self.webservice_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["partitions", partition_id, "jobs", job_id, "status"]);
        }
        url.to_string()
    }

    pub fn build_message(
        &self,
        partition_id: &str,
        job_id: &str,
        task: &TaskDefinition,
    ) -> JobResult<TaskMessage> {
        let status_check_time = Utc::now()
            .checked_add_signed(self.status_check_interval)
            .ok_or_else(|| JobError::configuration(INVALID_INTERVAL))?;

        let mut message = TaskMessage::new_task(
            Uuid::new_v4().to_string(),
            task.task_classifier.clone(),
            task.task_api_version,
            task.task_data.clone(),
        );
        message.to = Some(task.task_pipe.clone());
        message.tracking = Some(TrackingInfo {
            job_task_id: Some(JobTaskId::new(partition_id, job_id).message_id()),
            status_check_time: Some(status_check_time),
            status_check_url: Some(self.status_check_url(partition_id, job_id)),
            tracking_pipe: Some(self.tracking_pipe.clone()),
            track_to: Some(task.target_pipe.clone()),
        });
        Ok(message)
    }

    /// 解码Worker动作中的任务数据后发布
    pub async fn publish_action(
        &self,
        partition_id: &str,
        job_id: &str,
        action: &WorkerAction,
    ) -> JobResult<()> {
        let task = action.to_definition()?;
        self.publish(partition_id, job_id, &task).await
    }

    pub async fn publish(&self, partition_id: &str, job_id: &str, task: &TaskDefinition) -> JobResult<()> {
        let message = self.build_message(partition_id, job_id, task)?;
        let payload = message.to_vec()?;

        self.publish_with_retry(&task.task_pipe, &payload).await?;

        info!(
            "作业 {}:{} 的任务已发布到队列 {}",
            partition_id, job_id, task.task_pipe
        );
        Ok(())
    }

    async fn publish_with_retry(&self, queue: &str, payload: &[u8]) -> JobResult<()> {
        let headers = MessageHeaders::new();

        match self.publisher.publish(queue, payload, &headers).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("发布到队列 {} 失败，重试一次: {}", queue, first);
                self.publisher
                    .publish(queue, payload, &headers)
                    .await
                    .map_err(|second| {
                        debug!("重试发布到队列 {} 仍然失败", queue);
                        JobError::Publish(format!("发布到队列 {queue} 失败: {second}"))
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobservice_testing_utils::FlakyMessagePublisher;

    fn config(interval: &str) -> PublisherConfig {
        PublisherConfig {
            webservice_url: "http://jobservice:8080/job-service/v1/".to_string(),
            tracking_pipe: "jobtracking-in".to_string(),
            status_check_interval_seconds: interval.to_string(),
        }
    }

    fn task() -> TaskDefinition {
        TaskDefinition {
            task_classifier: "ExampleWorker".to_string(),
            task_api_version: 1,
            task_data: b"payload".to_vec(),
            task_pipe: "example-in".to_string(),
            target_pipe: "example-out".to_string(),
        }
    }

    #[test]
    fn test_unparsable_interval_is_configuration_error() {
        let publisher = Arc::new(FlakyMessagePublisher::new(0));
        for interval in ["five", "", "-1", "9000000000000", "9223372036854775807"] {
            match TaskPublisher::new(publisher.clone(), &config(interval)) {
                Err(JobError::Configuration(message)) => assert_eq!(message, INVALID_INTERVAL),
                Err(other) => panic!("unexpected error {other}"),
                Ok(_) => panic!("interval {interval:?} should be rejected"),
            }
        }
    }

    #[tokio::test]
    async fn test_interval_near_calendar_limit_never_panics() {
        let broker = Arc::new(FlakyMessagePublisher::new(0));
        // 距离chrono可表示的最大时间只剩约一天
        let remaining = (chrono::DateTime::<Utc>::MAX_UTC - Utc::now()).num_seconds();
        let interval = (remaining - 86_400).to_string();

        let publisher = TaskPublisher::new(broker.clone(), &config(&interval)).unwrap();
        publisher.publish("tenant-a", "J1", &task()).await.unwrap();
        assert_eq!(broker.published().len(), 1);
    }

    #[test]
    fn test_tracking_info_points_back_at_tracker() {
        let publisher = TaskPublisher::new(Arc::new(FlakyMessagePublisher::new(0)), &config("30")).unwrap();
        let before = Utc::now();
        let message = publisher.build_message("tenant-a", "J1", &task()).unwrap();

        assert_eq!(message.to.as_deref(), Some("example-in"));
        assert_eq!(message.task_data, b"payload");

        let tracking = message.tracking.unwrap();
        assert_eq!(tracking.job_task_id.as_deref(), Some("tenant-a:J1"));
        assert_eq!(tracking.track_to.as_deref(), Some("example-out"));
        assert_eq!(tracking.tracking_pipe.as_deref(), Some("jobtracking-in"));
        assert_eq!(
            tracking.status_check_url.as_deref(),
            Some("http://jobservice:8080/job-service/v1/partitions/tenant-a/jobs/J1/status")
        );

        let check_time = tracking.status_check_time.unwrap();
        assert!(check_time >= before + Duration::seconds(30));
        assert!(check_time <= Utc::now() + Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_retry_once_then_succeed() {
        let broker = Arc::new(FlakyMessagePublisher::new(1));
        let publisher = TaskPublisher::new(broker.clone(), &config("5")).unwrap();

        publisher.publish("tenant-a", "J1", &task()).await.unwrap();

        assert_eq!(broker.attempts(), 2);
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].destination, "example-in");
        assert_eq!(published[0].message().task_classifier, "ExampleWorker");
    }

    #[tokio::test]
    async fn test_two_failures_surface_publish_error() {
        let broker = Arc::new(FlakyMessagePublisher::new(2));
        let publisher = TaskPublisher::new(broker.clone(), &config("5")).unwrap();

        let err = publisher.publish("tenant-a", "J1", &task()).await.unwrap_err();

        assert!(matches!(err, JobError::Publish(_)));
        assert_eq!(broker.attempts(), 2);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_action_decodes_base64() {
        let broker = Arc::new(FlakyMessagePublisher::new(0));
        let publisher = TaskPublisher::new(broker.clone(), &config("5")).unwrap();
        let action = WorkerAction {
            task_classifier: Some("ExampleWorker".into()),
            task_api_version: Some(2),
            task_data: Some(serde_json::json!("AAEC")),
            task_data_encoding: Some("base64".into()),
            task_pipe: Some("example-in".into()),
            target_pipe: Some("example-out".into()),
        };

        publisher.publish_action("p", "J2", &action).await.unwrap();

        let message = broker.published()[0].message();
        assert_eq!(message.task_data, vec![0u8, 1, 2]);
        assert_eq!(message.task_api_version, 2);
    }
}
