//! 作业列表的过滤条件编译
//!
//! 文本表达式先解析为 [`Node`] 语法树，再编译为 [`Predicate`]。
//! 整个过程是纯函数，不需要任何共享状态。

mod ast;
mod compiler;
mod parser;
mod predicate;


use jobservice_core::{JobError, JobResult};
use thiserror::Error;

pub use ast::{Comparison, Node};
pub use compiler::compile;
pub use parser::parse;
pub use predicate::{CompareOp, Predicate, SqlValue};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Unable to parse filter at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Unrecognised filter condition: {0}")]
    UnknownOperator(String),

    #[error("Unrecognised filter selector: {0}")]
    UnknownSelector(String),

    #[error("Invalid argument '{argument}' for {selector}: {reason}")]
    InvalidArgument {
        selector: String,
        argument: String,
        reason: String,
    },
}

impl FilterError {
    /// 转换为调用方错误并保留原始表达式
    pub fn into_job_error(self, filter: &str) -> JobError {
        match self {
            FilterError::Parse { .. } => JobError::MalformedFilter {
                filter: filter.to_string(),
                reason: self.to_string(),
            },
            other => JobError::BadRequest(format!("{other} (filter: {filter})")),
        }
    }
}

/// 空白表达式表示没有过滤条件
pub fn compile_filter(filter: &str) -> JobResult<Option<Predicate>> {
    if filter.trim().is_empty() {
        return Ok(None);
    }

    parse(filter)
        .and_then(|node| compile(&node))
        .map(Some)
        .map_err(|err| err.into_job_error(filter))
}

pub fn to_sql_condition(filter: &str) -> JobResult<Option<String>> {
    Ok(compile_filter(filter)?.map(|predicate| predicate.to_string()))
}
