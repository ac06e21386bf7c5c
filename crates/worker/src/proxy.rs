//! 跟踪代理
//!
//! 每条到达跟踪队列的信封先按状态分类并上报到Job Store，然后原样转发到 `to`。
//! 上报失败只记录日志，绝不阻止转发。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobservice_core::{config::TrackingConfig, JobResult};
use jobservice_dispatcher::TaskPublisher;
use jobservice_domain::{
    DependentJob, ForwardingPort, JobFailure, JobReporter, JobTaskId, MessageHeaders,
    MessagePublisher, RoutingMetadata, TaskMessage, TaskStatus, TrackingEvent,
    UNKNOWN_FAILURE_SOURCE,
};
use metrics::counter;
use serde_json::json;
use tracing::{debug, error, info, warn};

const TRACKING_WORKER_API_VERSION: u32 = 1;
const PROGRESS_UPDATE_FAILED: &str = "PROGRESS_UPDATE_FAILED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Complete,
    Progress,
    Retry,
    Rejected,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Complete => "complete",
            ReportKind::Progress => "progress",
            ReportKind::Retry => "retry",
            ReportKind::Rejected => "rejected",
        }
    }
}

/// 无法分类的原因，分类被跳过但转发照常进行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTrackingInfo,
    NoJobTaskId,
    NoTrackTo,
    NoDestination,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NoTrackingInfo => "the task message has no tracking info",
            SkipReason::NoJobTaskId => "the tracking info has no jobTaskId",
            SkipReason::NoTrackTo => "the tracking info has no trackTo pipe",
            SkipReason::NoDestination => "the task message has no destination",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Complete,
    /// 目前无法得知真实进度，固定上报0
    Progress {
        percentage: u32,
    },
    Retry {
        detail: String,
    },
    Rejected {
        failure: JobFailure,
    },
}

impl Classification {
    pub fn kind(&self) -> ReportKind {
        match self {
            Classification::Complete => ReportKind::Complete,
            Classification::Progress { .. } => ReportKind::Progress,
            Classification::Retry { .. } => ReportKind::Retry,
            Classification::Rejected { .. } => ReportKind::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Reported(ReportKind),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// 信封已转发到目的地
    Forwarded {
        destination: String,
        classification: ClassificationOutcome,
    },
    /// 没有 `to`，无处可转发
    Undeliverable {
        classification: ClassificationOutcome,
    },
    /// 跟踪事件的进度已上报
    Completed,
    ProgressUpdateFailed(String),
}

/// 根据任务状态、`trackTo == to` 和路由头决定上报动作
pub fn classify(
    message: &TaskMessage,
    routing: &RoutingMetadata,
    now: DateTime<Utc>,
) -> Result<(JobTaskId, Classification), SkipReason> {
    let tracking = message.tracking.as_ref().ok_or(SkipReason::NoTrackingInfo)?;
    let job_task_id = tracking.parsed_job_task_id().ok_or(SkipReason::NoJobTaskId)?;
    let track_to = tracking.track_to.as_deref().ok_or(SkipReason::NoTrackTo)?;
    let to = message.to.as_deref().ok_or(SkipReason::NoDestination)?;

    let classification = if message.task_status.is_success_path() {
        if track_to.eq_ignore_ascii_case(to) {
            Classification::Complete
        } else {
            Classification::Progress { percentage: 0 }
        }
    } else {
        let retries = routing.retry_count;
        match &routing.rejected_reason {
            Some(reason) => Classification::Rejected {
                failure: JobFailure {
                    failure_id: message.task_id.clone(),
                    failure_time: now,
                    failure_source: failure_source(message),
                    failure_message: format!(
                        "{reason}. Execution of this job task was retried {retries} times."
                    ),
                },
            },
            None => Classification::Retry {
                detail: format!(
                    "This job task encountered a problem and will be retried. This will be retry attempt number {retries} for this job task."
                ),
            },
        }
    };

    Ok((job_task_id, classification))
}

fn failure_source(message: &TaskMessage) -> String {
    message
        .source_info
        .as_ref()
        .map(|source| source.name.clone())
        .unwrap_or_else(|| UNKNOWN_FAILURE_SOURCE.to_string())
}

pub struct TrackingProxy {
    reporter: Arc<dyn JobReporter>,
    forwarder: Arc<dyn ForwardingPort>,
    task_publisher: Arc<TaskPublisher>,
    result_publisher: Arc<dyn MessagePublisher>,
    worker_name: String,
    output_queue: String,
}

impl TrackingProxy {
    pub fn new(
        reporter: Arc<dyn JobReporter>,
        forwarder: Arc<dyn ForwardingPort>,
        task_publisher: Arc<TaskPublisher>,
        result_publisher: Arc<dyn MessagePublisher>,
        config: &TrackingConfig,
        output_queue: impl Into<String>,
    ) -> Self {
        Self {
            reporter,
            forwarder,
            task_publisher,
            result_publisher,
            worker_name: config.worker_name.clone(),
            output_queue: output_queue.into(),
        }
    }

    /// 处理一条信封
    ///
    /// 只有转发失败会返回错误，调用方应将消息重新入队。
    pub async fn handle(
        &self,
        message: &TaskMessage,
        headers: &MessageHeaders,
    ) -> JobResult<ProxyOutcome> {
        if let Some(event) = self.tracking_event(message) {
            return Ok(self.handle_tracking_event(message, event).await);
        }

        let classification = self.report(message, headers).await;

        let Some(destination) = message.to.as_deref() else {
            error!("任务 {} 没有目的地，无法转发", message.task_id);
            counter!("jobservice_tracking_undeliverable_total").increment(1);
            return Ok(ProxyOutcome::Undeliverable { classification });
        };

        debug!("转发任务 {} 到 {}", message.task_id, destination);
        self.forwarder.forward(destination, message, headers).await?;
        counter!("jobservice_tracking_forwarded_total").increment(1);

        Ok(ProxyOutcome::Forwarded {
            destination: destination.to_string(),
            classification,
        })
    }

    fn tracking_event(&self, message: &TaskMessage) -> Option<TrackingEvent> {
        if message.task_classifier != self.worker_name {
            return None;
        }
        serde_json::from_slice(&message.task_data).ok()
    }

    async fn report(&self, message: &TaskMessage, headers: &MessageHeaders) -> ClassificationOutcome {
        let routing = headers.routing_metadata();
        let (job_task_id, classification) = match classify(message, &routing, Utc::now()) {
            Ok(classified) => classified,
            Err(reason) => {
                warn!(
                    "无法上报任务 {} 的进度 - {}",
                    message.task_id, reason
                );
                counter!("jobservice_tracking_skipped_total").increment(1);
                return ClassificationOutcome::Skipped(reason);
            }
        };

        let kind = classification.kind();
        let result = match classification {
            Classification::Complete => self.reporter.report_complete(&job_task_id).await,
            Classification::Progress { percentage } => self
                .reporter
                .report_progress(&job_task_id, percentage)
                .await
                .map(|_| Vec::new()),
            Classification::Retry { detail } => self
                .reporter
                .report_retry(&job_task_id, &detail)
                .await
                .map(|_| Vec::new()),
            Classification::Rejected { failure } => self
                .reporter
                .report_rejected(&job_task_id, &failure)
                .await
                .map(|_| Vec::new()),
        };

        counter!("jobservice_tracking_reports_total", "kind" => kind.as_str()).increment(1);
        match result {
            Ok(dependents) => self.publish_dependents(dependents).await,
            Err(e) => {
                warn!(
                    "向Job Database上报任务 {} ({}) 失败: {}",
                    message.task_id, job_task_id, e
                );
                let transient = if e.is_transient() { "true" } else { "false" };
                counter!("jobservice_tracking_report_failures_total", "transient" => transient)
                    .increment(1);
            }
        }

        ClassificationOutcome::Reported(kind)
    }

    async fn publish_dependents(&self, dependents: Vec<DependentJob>) {
        for job in dependents {
            match self
                .task_publisher
                .publish(&job.partition_id, &job.job_id, &job.task)
                .await
            {
                Ok(()) => info!("前置作业已完成，作业 {}:{} 已开始执行", job.partition_id, job.job_id),
                Err(e) => error!(
                    "发布后续作业 {}:{} 失败: {}",
                    job.partition_id, job.job_id, e
                ),
            }
        }
    }

    async fn handle_tracking_event(&self, message: &TaskMessage, event: TrackingEvent) -> ProxyOutcome {
        let job_task_id = JobTaskId::from_message_id(&event.job_task_id);
        let percentage = event.estimated_percentage_completed.min(100);

        match self.reporter.report_progress(&job_task_id, percentage).await {
            Ok(()) => ProxyOutcome::Completed,
            Err(e) => {
                warn!("向Job Database上报任务进度失败: {}", e);
                let description = e.to_string();
                self.publish_failure_result(message, &description).await;
                ProxyOutcome::ProgressUpdateFailed(description)
            }
        }
    }

    async fn publish_failure_result(&self, message: &TaskMessage, description: &str) {
        let data = json!({
            "status": PROGRESS_UPDATE_FAILED,
            "failureDescription": description,
        });

        let mut result = TaskMessage::new_task(
            message.task_id.clone(),
            self.worker_name.clone(),
            TRACKING_WORKER_API_VERSION,
            data.to_string().into_bytes(),
        );
        result.task_status = TaskStatus::ResultFailure;
        result.to = Some(self.output_queue.clone());
        result.correlation_id = message.correlation_id.clone();

        let published = match result.to_vec() {
            Ok(payload) => {
                self.result_publisher
                    .publish(&self.output_queue, &payload, &MessageHeaders::new())
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            error!("发布跟踪事件的失败结果到 {} 失败: {}", self.output_queue, e);
        }
    }
}
