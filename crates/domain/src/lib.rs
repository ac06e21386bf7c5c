pub mod filter;
pub mod headers;
pub mod job;
pub mod job_task_id;
pub mod message;
pub mod policy;
pub mod ports;
pub mod validation;

pub use headers::{HeaderValue, MessageHeaders, RoutingMetadata, REJECTED_HEADER, RETRY_HEADER};
pub use job::{DependentJob, JobFailure, JobRecord, JobStatus, NewJob, UNKNOWN_FAILURE_SOURCE};
pub use job_task_id::JobTaskId;
pub use message::{
    SourceInfo, TaskDataEncoding, TaskDefinition, TaskMessage, TaskStatus, TrackingEvent,
    TrackingInfo, WorkerAction,
};
pub use policy::{ExpirationOperation, ExpirationPolicy, PolicyStatus};
pub use ports::{ForwardingPort, JobReporter, JobStore, MessagePublisher};
