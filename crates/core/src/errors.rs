use thiserror::Error;

/// Job Store上报错误
///
/// 区分暂时性故障（连接中断、连接池超时、可重试的事务冲突）与永久性故障，
/// 需要持久化重试的调用方可以据此单独处理暂时性错误。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportingError {
    #[error("Job Store暂时不可用: {0}")]
    Transient(String),

    #[error("Job Store操作失败: {0}")]
    Permanent(String),
}

impl ReportingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ReportingError::Transient(_))
    }
}

impl From<sqlx::Error> for ReportingError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient_sqlx(&err) {
            ReportingError::Transient(err.to_string())
        } else {
            ReportingError::Permanent(err.to_string())
        }
    }
}

pub(crate) fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| is_transient_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// 连接异常(08xxx)、序列化失败、死锁以及服务端关闭
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03")
}

/// 作业服务错误类型定义
#[derive(Debug, Error)]
pub enum JobError {
    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("无法解析过滤条件 '{filter}': {reason}")]
    MalformedFilter { filter: String, reason: String },

    #[error("上报任务状态失败: {0}")]
    Reporting(#[from] ReportingError),

    #[error("发布任务消息失败: {0}")]
    Publish(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type JobResult<T> = std::result::Result<T, JobError>;

impl JobError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        JobError::BadRequest(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        JobError::Configuration(msg.into())
    }

    pub fn message_queue<S: Into<String>>(msg: S) -> Self {
        JobError::MessageQueue(msg.into())
    }

    /// 调用方输入错误，直接返回给调用方且不重试
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            JobError::BadRequest(_) | JobError::MalformedFilter { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Reporting(err) => err.is_transient(),
            JobError::MessageQueue(_) | JobError::Publish(_) => true,
            JobError::Database(err) => is_transient_sqlx(err),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Serialization(err.to_string())
    }
}
