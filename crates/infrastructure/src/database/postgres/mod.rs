pub mod job_reporter;
pub mod job_store;

pub use job_reporter::PostgresJobReporter;
pub use job_store::PostgresJobStore;
