//! 任务发布与作业提交

pub mod publisher;
pub mod submission;


pub use publisher::TaskPublisher;
pub use submission::{JobSubmissionService, SubmissionOutcome};
