//! Test data builders for tracked task messages

use jobservice_domain::{
    HeaderValue, MessageHeaders, SourceInfo, TaskMessage, TaskStatus, TrackingInfo,
    REJECTED_HEADER, RETRY_HEADER,
};

/// Builder for a task message that is being tracked on its way to `track_to`
pub struct TaskMessageBuilder {
    message: TaskMessage,
}

impl TaskMessageBuilder {
    pub fn new() -> Self {
        let mut message = TaskMessage::new_task("J1.1", "ExampleWorker", 1, b"{}".to_vec());
        message.to = Some("example-out".to_string());
        message.tracking = Some(TrackingInfo {
            job_task_id: Some("tenant-a:J1.1".to_string()),
            status_check_time: None,
            status_check_url: Some("http://jobservice/partitions/tenant-a/jobs/J1/status".to_string()),
            tracking_pipe: Some("jobtracking-in".to_string()),
            track_to: Some("example-out".to_string()),
        });
        Self { message }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.message.task_status = status;
        self
    }

    pub fn with_to(mut self, to: Option<&str>) -> Self {
        self.message.to = to.map(String::from);
        self
    }

    pub fn with_track_to(mut self, track_to: Option<&str>) -> Self {
        if let Some(tracking) = self.message.tracking.as_mut() {
            tracking.track_to = track_to.map(String::from);
        }
        self
    }

    pub fn with_job_task_id(mut self, job_task_id: Option<&str>) -> Self {
        if let Some(tracking) = self.message.tracking.as_mut() {
            tracking.job_task_id = job_task_id.map(String::from);
        }
        self
    }

    pub fn without_tracking(mut self) -> Self {
        self.message.tracking = None;
        self
    }

    pub fn with_classifier(mut self, classifier: &str) -> Self {
        self.message.task_classifier = classifier.to_string();
        self
    }

    pub fn with_task_data(mut self, task_data: &[u8]) -> Self {
        self.message.task_data = task_data.to_vec();
        self
    }

    pub fn with_source(mut self, name: &str) -> Self {
        self.message.source_info = Some(SourceInfo {
            name: name.to_string(),
            version: "1.0".to_string(),
        });
        self
    }

    pub fn build(self) -> TaskMessage {
        self.message
    }
}

impl Default for TaskMessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Headers set by the worker framework when a task is retried or rejected
pub fn routing_headers(rejected_reason: Option<&str>, retry_count: Option<i64>) -> MessageHeaders {
    let mut headers = MessageHeaders::new().with("x-correlation", HeaderValue::Text("corr-1".into()));
    if let Some(reason) = rejected_reason {
        headers.insert(REJECTED_HEADER, HeaderValue::Text(reason.to_string()));
    }
    if let Some(count) = retry_count {
        headers.insert(RETRY_HEADER, HeaderValue::Int(count));
    }
    headers
}
