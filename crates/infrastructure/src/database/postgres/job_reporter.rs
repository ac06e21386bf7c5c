use async_trait::async_trait;
use jobservice_core::ReportingError;
use jobservice_domain::{
    DependentJob, JobFailure, JobReporter, JobStatus, JobTaskId, TaskDefinition,
};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};

/// 通过Job Store存储过程上报任务状态
///
/// 每次调用单独从连接池获取连接，连接在所有返回路径上随 guard 一起归还。
/// 存储过程本身保证幂等，重复投递的同一事件不会改变已有状态。
pub struct PostgresJobReporter {
    pool: PgPool,
}

impl PostgresJobReporter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn call_report_progress(
        &self,
        job_task_id: &JobTaskId,
        status: JobStatus,
    ) -> Result<(), ReportingError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT report_progress($1, $2::job_status)")
            .bind(job_task_id.message_id())
            .bind(status.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    fn row_to_dependent(row: &sqlx::postgres::PgRow) -> Result<DependentJob, ReportingError> {
        let api_version: i32 = row.try_get("task_api_version")?;
        let task_api_version = u32::try_from(api_version).map_err(|_| {
            ReportingError::Permanent(format!("无效的任务API版本: {api_version}"))
        })?;

        Ok(DependentJob {
            partition_id: row.try_get("partition_id")?,
            job_id: row.try_get("job_id")?,
            task: TaskDefinition {
                task_classifier: row.try_get("task_classifier")?,
                task_api_version,
                task_data: row.try_get("task_data")?,
                task_pipe: row.try_get("task_pipe")?,
                target_pipe: row.try_get("target_pipe")?,
            },
        })
    }
}

#[async_trait]
impl JobReporter for PostgresJobReporter {
    #[instrument(skip(self), fields(job_task_id = %job_task_id))]
    async fn report_progress(
        &self,
        job_task_id: &JobTaskId,
        percentage: u32,
    ) -> Result<(), ReportingError> {
        // 存储过程只记录状态，百分比仅用于日志
        debug!("上报任务进度: {}%", percentage);
        self.call_report_progress(job_task_id, JobStatus::Active).await
    }

    #[instrument(skip(self), fields(job_task_id = %job_task_id))]
    async fn report_complete(
        &self,
        job_task_id: &JobTaskId,
    ) -> Result<Vec<DependentJob>, ReportingError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT partition_id, job_id, task_classifier, task_api_version, task_data, task_pipe, target_pipe \
             FROM report_complete($1)",
        )
        .bind(job_task_id.message_id())
        .fetch_all(&mut *conn)
        .await?;

        let dependents = rows
            .iter()
            .map(Self::row_to_dependent)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("任务已完成，可执行的后续作业数: {}", dependents.len());
        Ok(dependents)
    }

    #[instrument(skip(self, detail), fields(job_task_id = %job_task_id))]
    async fn report_retry(
        &self,
        job_task_id: &JobTaskId,
        detail: &str,
    ) -> Result<(), ReportingError> {
        debug!("任务将被重试: {}", detail);
        self.call_report_progress(job_task_id, JobStatus::Active).await
    }

    #[instrument(skip(self, failure), fields(job_task_id = %job_task_id))]
    async fn report_rejected(
        &self,
        job_task_id: &JobTaskId,
        failure: &JobFailure,
    ) -> Result<(), ReportingError> {
        let detail = failure
            .to_json()
            .map_err(|e| ReportingError::Permanent(format!("序列化失败详情失败: {e}")))?;

        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT report_failure($1, $2)")
            .bind(job_task_id.message_id())
            .bind(detail)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn verify_reachable(&self) -> bool {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            sqlx::query("SELECT 1").execute(&mut *conn).await
        }
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Job Store连接检查失败: {}", e);
                false
            }
        }
    }
}
