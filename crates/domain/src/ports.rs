//! 核心逻辑依赖的外部协作方接口

use async_trait::async_trait;
use jobservice_core::{JobResult, ReportingError};

use crate::headers::MessageHeaders;
use crate::job::{DependentJob, JobFailure, JobRecord};
use crate::job_task_id::JobTaskId;
use crate::message::TaskMessage;

/// Job Store上报接口
///
/// 所有操作都必须幂等：同一逻辑事件被重复投递时不能破坏存储状态。
#[async_trait]
pub trait JobReporter: Send + Sync {
    async fn report_progress(
        &self,
        job_task_id: &JobTaskId,
        percentage: u32,
    ) -> Result<(), ReportingError>;

    /// 返回前置条件因此满足、可以开始执行的作业
    async fn report_complete(
        &self,
        job_task_id: &JobTaskId,
    ) -> Result<Vec<DependentJob>, ReportingError>;

    async fn report_retry(&self, job_task_id: &JobTaskId, detail: &str)
        -> Result<(), ReportingError>;

    async fn report_rejected(
        &self,
        job_task_id: &JobTaskId,
        failure: &JobFailure,
    ) -> Result<(), ReportingError>;

    async fn verify_reachable(&self) -> bool;
}

/// 将信封转发到下一个目的地
#[async_trait]
pub trait ForwardingPort: Send + Sync {
    async fn forward(
        &self,
        destination: &str,
        message: &TaskMessage,
        headers: &MessageHeaders,
    ) -> JobResult<()>;
}

/// 单次发布，返回前必须等到broker确认或超时
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8], headers: &MessageHeaders)
        -> JobResult<()>;
}

/// 作业记录存储
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 创建作业，返回作业是否可以立即执行（没有未完成的前置作业且无延迟）
    async fn create_job(&self, job: &JobRecord) -> JobResult<bool>;

    async fn delete_job(&self, partition_id: &str, job_id: &str) -> JobResult<()>;
}
