//! In-memory implementations of the domain ports
//!
//! These keep their state behind `Arc<Mutex<..>>` so a test can hand a clone
//! to the code under test and inspect the same state afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jobservice_core::{JobError, JobResult, ReportingError};
use jobservice_domain::{
    DependentJob, ForwardingPort, JobFailure, JobRecord, JobReporter, JobStatus, JobStore,
    JobTaskId, MessageHeaders, MessagePublisher, TaskMessage,
};

/// Observable state of one job task in [`InMemoryJobStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub status: JobStatus,
    pub percentage: u32,
    pub retry_detail: Option<String>,
    pub failure: Option<JobFailure>,
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<String, TaskState>,
    jobs: HashMap<(String, String), JobRecord>,
    /// jobs created with prerequisites that are not complete yet
    waiting: Vec<JobRecord>,
    report_calls: usize,
}

/// In-memory job store with the idempotent semantics of the store functions
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<StoreState>>,
    reporting_failure: Arc<Mutex<Option<ReportingError>>>,
    create_failure: Arc<Mutex<Option<String>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report call fails with `error` until cleared
    pub fn fail_reporting_with(&self, error: Option<ReportingError>) {
        *self.reporting_failure.lock().unwrap() = error;
    }

    pub fn fail_create_with(&self, message: Option<&str>) {
        *self.create_failure.lock().unwrap() = message.map(String::from);
    }

    pub fn task(&self, job_task_id: &JobTaskId) -> Option<TaskState> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .get(&job_task_id.message_id())
            .cloned()
    }

    pub fn job(&self, partition_id: &str, job_id: &str) -> Option<JobRecord> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(&(partition_id.to_string(), job_id.to_string()))
            .cloned()
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    pub fn report_calls(&self) -> usize {
        self.state.lock().unwrap().report_calls
    }

    fn begin_report(&self) -> Result<std::sync::MutexGuard<'_, StoreState>, ReportingError> {
        if let Some(error) = self.reporting_failure.lock().unwrap().clone() {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        state.report_calls += 1;
        Ok(state)
    }

    fn is_complete(state: &StoreState, partition_id: &str, job_id: &str) -> bool {
        let id = JobTaskId::new(partition_id, job_id).message_id();
        matches!(state.tasks.get(&id), Some(task) if task.status == JobStatus::Completed)
    }
}

fn entry<'a>(state: &'a mut StoreState, job_task_id: &JobTaskId) -> &'a mut TaskState {
    state
        .tasks
        .entry(job_task_id.message_id())
        .or_insert_with(|| TaskState {
            status: JobStatus::Waiting,
            percentage: 0,
            retry_detail: None,
            failure: None,
        })
}

#[async_trait]
impl JobReporter for InMemoryJobStore {
    async fn report_progress(
        &self,
        job_task_id: &JobTaskId,
        percentage: u32,
    ) -> Result<(), ReportingError> {
        let mut state = self.begin_report()?;
        let task = entry(&mut state, job_task_id);
        if task.status != JobStatus::Completed {
            task.status = JobStatus::Active;
            task.percentage = task.percentage.max(percentage.min(100));
        }
        Ok(())
    }

    async fn report_complete(
        &self,
        job_task_id: &JobTaskId,
    ) -> Result<Vec<DependentJob>, ReportingError> {
        let mut state = self.begin_report()?;
        let task = entry(&mut state, job_task_id);
        task.status = JobStatus::Completed;
        task.percentage = 100;

        let (ready, still_waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.waiting).into_iter().partition(|job| {
                job.prerequisite_job_ids
                    .iter()
                    .all(|prerequisite| Self::is_complete(&state, &job.partition_id, prerequisite))
            });
        state.waiting = still_waiting;

        Ok(ready
            .into_iter()
            .map(|job| DependentJob {
                partition_id: job.partition_id,
                job_id: job.job_id,
                task: job.task,
            })
            .collect())
    }

    async fn report_retry(&self, job_task_id: &JobTaskId, detail: &str) -> Result<(), ReportingError> {
        let mut state = self.begin_report()?;
        let task = entry(&mut state, job_task_id);
        if task.status != JobStatus::Completed {
            task.status = JobStatus::Active;
            task.retry_detail = Some(detail.to_string());
        }
        Ok(())
    }

    async fn report_rejected(
        &self,
        job_task_id: &JobTaskId,
        failure: &JobFailure,
    ) -> Result<(), ReportingError> {
        let mut state = self.begin_report()?;
        let task = entry(&mut state, job_task_id);
        task.status = JobStatus::Failed;
        task.failure = Some(failure.clone());
        Ok(())
    }

    async fn verify_reachable(&self) -> bool {
        self.reporting_failure.lock().unwrap().is_none()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: &JobRecord) -> JobResult<bool> {
        if let Some(message) = self.create_failure.lock().unwrap().clone() {
            return Err(JobError::Internal(message));
        }

        let mut state = self.state.lock().unwrap();
        state
            .jobs
            .insert((job.partition_id.clone(), job.job_id.clone()), job.clone());

        let ready = job.delay == 0
            && job
                .prerequisite_job_ids
                .iter()
                .all(|prerequisite| Self::is_complete(&state, &job.partition_id, prerequisite));
        if !ready {
            state.waiting.push(job.clone());
        }
        Ok(ready)
    }

    async fn delete_job(&self, partition_id: &str, job_id: &str) -> JobResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .jobs
            .remove(&(partition_id.to_string(), job_id.to_string()));
        state
            .waiting
            .retain(|job| !(job.partition_id == partition_id && job.job_id == job_id));
        Ok(())
    }
}

/// A message handed to a [`RecordingForwarder`] or [`FlakyMessagePublisher`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub destination: String,
    pub payload: Vec<u8>,
    pub headers: MessageHeaders,
}

impl SentMessage {
    pub fn message(&self) -> TaskMessage {
        TaskMessage::from_slice(&self.payload).unwrap()
    }
}

/// Forwarding port that records every forwarded envelope
#[derive(Debug, Clone, Default)]
pub struct RecordingForwarder {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForwardingPort for RecordingForwarder {
    async fn forward(
        &self,
        destination: &str,
        message: &TaskMessage,
        headers: &MessageHeaders,
    ) -> JobResult<()> {
        self.sent.lock().unwrap().push(SentMessage {
            destination: destination.to_string(),
            payload: message.to_vec()?,
            headers: headers.clone(),
        });
        Ok(())
    }
}

/// Publisher whose first `failures` attempts are not acknowledged
#[derive(Debug, Clone, Default)]
pub struct FlakyMessagePublisher {
    failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    published: Arc<Mutex<Vec<SentMessage>>>,
}

impl FlakyMessagePublisher {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: Arc::new(AtomicUsize::new(failures)),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<SentMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePublisher for FlakyMessagePublisher {
    async fn publish(&self, queue: &str, payload: &[u8], headers: &MessageHeaders) -> JobResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(JobError::MessageQueue(format!(
                "broker did not acknowledge publish to {queue}"
            )));
        }

        self.published.lock().unwrap().push(SentMessage {
            destination: queue.to_string(),
            payload: payload.to_vec(),
            headers: headers.clone(),
        });
        Ok(())
    }
}
