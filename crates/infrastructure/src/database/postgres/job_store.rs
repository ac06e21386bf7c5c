use async_trait::async_trait;
use jobservice_core::{JobError, JobResult};
use jobservice_domain::{JobRecord, JobStore};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{debug, instrument};

/// 作业记录的创建与回滚删除
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Job Store中的整数列为 `integer`，超出范围的值不能静默截断
fn to_store_int(value: u32, field: &str) -> JobResult<i32> {
    i32::try_from(value)
        .map_err(|_| JobError::bad_request(format!("The {field} must not exceed {}.", i32::MAX)))
}

/// 策略以存储形式写入，相对表达式已换算为分钟
fn policies_json(job: &JobRecord) -> Value {
    job.policies
        .iter()
        .map(|(status, policy)| {
            json!({
                "jobStatus": status.as_str(),
                "operation": policy.operation,
                "expirationTime": policy.store_expiration_time(),
            })
        })
        .collect()
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(partition_id = %job.partition_id, job_id = %job.job_id))]
    async fn create_job(&self, job: &JobRecord) -> JobResult<bool> {
        let task_api_version = to_store_int(job.task.task_api_version, "task api version")?;
        let delay = to_store_int(job.delay, "delay")?;

        let ready: bool = sqlx::query_scalar(
            "SELECT create_job($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(&job.partition_id)
        .bind(&job.job_id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.external_data)
        .bind(delay)
        .bind(&job.task.task_classifier)
        .bind(task_api_version)
        .bind(&job.task.task_data)
        .bind(&job.task.task_pipe)
        .bind(&job.task.target_pipe)
        .bind(&job.prerequisite_job_ids)
        .bind(json!(job.labels))
        .bind(policies_json(job))
        .fetch_one(&self.pool)
        .await?;

        debug!("作业已创建，可立即执行: {}", ready);
        Ok(ready)
    }

    #[instrument(skip(self))]
    async fn delete_job(&self, partition_id: &str, job_id: &str) -> JobResult<()> {
        sqlx::query("SELECT delete_job($1, $2)")
            .bind(partition_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        debug!("作业已删除");
        Ok(())
    }
}
