use serde::{Deserialize, Serialize};

/// 跟踪Worker线程数上下限
pub const MIN_TRACKING_THREADS: usize = 1;
pub const MAX_TRACKING_THREADS: usize = 20;

/// 跟踪代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// 跟踪事件使用的任务分类器，同时作为失败来源名称
    pub worker_name: String,
    pub threads: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            worker_name: "JobTrackingWorker".to_string(),
            threads: 1,
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_name.is_empty() {
            return Err(anyhow::anyhow!("跟踪Worker名称不能为空"));
        }

        if !(MIN_TRACKING_THREADS..=MAX_TRACKING_THREADS).contains(&self.threads) {
            return Err(anyhow::anyhow!(
                "跟踪线程数必须在{MIN_TRACKING_THREADS}到{MAX_TRACKING_THREADS}之间"
            ));
        }

        Ok(())
    }
}

/// 任务发布配置
///
/// `status_check_interval_seconds` 保留为字符串，在使用时才解析。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub webservice_url: String,
    pub tracking_pipe: String,
    pub status_check_interval_seconds: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            webservice_url: "http://localhost:8080/job-service/v1".to_string(),
            tracking_pipe: "jobtracking-in".to_string(),
            status_check_interval_seconds: "5".to_string(),
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.webservice_url.is_empty() {
            return Err(anyhow::anyhow!("作业服务URL不能为空"));
        }

        if self.tracking_pipe.is_empty() {
            return Err(anyhow::anyhow!("跟踪队列名称不能为空"));
        }

        Ok(())
    }
}
