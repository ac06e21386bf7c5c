use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use jobservice_core::AppConfig;
use jobservice_dispatcher::{JobSubmissionService, SubmissionOutcome, TaskPublisher};
use jobservice_domain::NewJob;
use jobservice_infrastructure::{DatabaseManager, RabbitBroker};
use jobservice_worker::TrackingWorkerPool;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 运行跟踪Worker池
    Tracker,
    /// 提交一个作业后退出
    Submit {
        job_file: String,
        partition_id: String,
        job_id: String,
    },
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    broker: Arc<RabbitBroker>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("创建Job Store连接池失败")?;
        let broker = RabbitBroker::connect(config.message_queue.clone())
            .await
            .context("连接RabbitMQ失败")?;

        Ok(Self {
            config,
            database,
            broker: Arc::new(broker),
        })
    }

    /// 运行跟踪Worker池直到收到关闭信号
    pub async fn run_tracker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动跟踪Worker池");

        let pool = TrackingWorkerPool::new(
            Arc::clone(&self.broker),
            Arc::new(self.database.job_reporter()),
            self.config.tracking.clone(),
            self.config.publisher.clone(),
        );
        pool.run(shutdown_rx).await?;
        Ok(())
    }

    pub async fn submit(&self, partition_id: &str, job_id: &str, job: &NewJob) -> Result<SubmissionOutcome> {
        let publisher = Arc::new(self.broker.create_publisher().await?);
        let task_publisher = TaskPublisher::new(publisher.clone(), &self.config.publisher)?;
        let service = JobSubmissionService::new(
            Arc::new(self.database.job_store()),
            Arc::new(task_publisher),
        );

        let outcome = service.submit(partition_id, job_id, job).await;
        publisher.close().await;
        Ok(outcome?)
    }

    pub async fn close(&self) {
        if let Err(e) = self.broker.close().await {
            warn!("关闭RabbitMQ连接失败: {}", e);
        }
        self.database.close().await;
    }
}

/// 读取JSON格式的作业定义
pub fn load_job_file(path: impl AsRef<Path>) -> Result<NewJob> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取作业文件失败: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("解析作业文件失败: {}", path.display()))
}
