use std::time::Duration;

use jobservice_core::{config::DatabaseConfig, JobResult};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use super::postgres::{PostgresJobReporter, PostgresJobStore};

/// Job Store连接池管理
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> JobResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            "Job Store连接池已创建，最大连接数: {}",
            config.max_connections
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> JobResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn job_reporter(&self) -> PostgresJobReporter {
        PostgresJobReporter::new(self.pool.clone())
    }

    pub fn job_store(&self) -> PostgresJobStore {
        PostgresJobStore::new(self.pool.clone())
    }
}
