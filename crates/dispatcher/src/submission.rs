use std::sync::Arc;

use chrono::Utc;
use jobservice_core::{JobError, JobResult};
use jobservice_domain::policy::build_policies;
use jobservice_domain::validation::{validate_job_id, validate_label_name, validate_partition_id};
use jobservice_domain::{JobRecord, JobStore, NewJob};
use tracing::{error, info, warn};

use crate::publisher::TaskPublisher;

/// 作业提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// 首个任务已发布
    Published,
    /// 等待前置作业完成或延迟到期，任务稍后发布
    Waiting,
}

/// 作业提交服务: 校验、创建作业记录、发布首个任务，发布失败时回滚
pub struct JobSubmissionService {
    store: Arc<dyn JobStore>,
    publisher: Arc<TaskPublisher>,
}

impl JobSubmissionService {
    pub fn new(store: Arc<dyn JobStore>, publisher: Arc<TaskPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn validate(partition_id: &str, job_id: &str, job: &NewJob) -> JobResult<JobRecord> {
        validate_partition_id(partition_id)?;
        validate_job_id(job_id)?;
        for label in job.labels.keys() {
            validate_label_name(label)?;
        }
        for prerequisite in &job.prerequisite_job_ids {
            validate_job_id(prerequisite)?;
        }

        let task = job.task.to_definition()?;
        let policies = build_policies(&job.expiration, Utc::now())?;

        Ok(JobRecord {
            partition_id: partition_id.to_string(),
            job_id: job_id.to_string(),
            name: job.name.clone(),
            description: job.description.clone(),
            external_data: job.external_data.clone(),
            labels: job.labels.clone(),
            policies,
            task,
            prerequisite_job_ids: job.prerequisite_job_ids.clone(),
            delay: job.delay,
        })
    }

    pub async fn submit(
        &self,
        partition_id: &str,
        job_id: &str,
        job: &NewJob,
    ) -> JobResult<SubmissionOutcome> {
        let record = Self::validate(partition_id, job_id, job)?;

        let ready = self.store.create_job(&record).await?;
        if !ready {
            info!(
                "作业 {}:{} 已创建，等待前置作业或延迟到期",
                partition_id, job_id
            );
            return Ok(SubmissionOutcome::Waiting);
        }

        if let Err(e) = self.publisher.publish(partition_id, job_id, &record.task).await {
            error!("作业 {}:{} 的任务发布失败，回滚作业记录: {}", partition_id, job_id, e);
            if let Err(rollback) = self.store.delete_job(partition_id, job_id).await {
                warn!("回滚作业 {}:{} 失败: {}", partition_id, job_id, rollback);
            }
            return Err(JobError::Publish(
                "Failed to add task data to the queue.".to_string(),
            ));
        }

        info!("作业 {}:{} 已提交", partition_id, job_id);
        Ok(SubmissionOutcome::Published)
    }
}
