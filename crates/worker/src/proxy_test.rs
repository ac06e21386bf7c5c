use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jobservice_core::config::{PublisherConfig, TrackingConfig};
use jobservice_core::{JobResult, ReportingError};
use jobservice_dispatcher::TaskPublisher;
use jobservice_domain::{
    DependentJob, ForwardingPort, HeaderValue, JobFailure, JobRecord, JobReporter, JobStatus,
    JobStore, JobTaskId, MessageHeaders, RoutingMetadata, TaskDefinition, TaskMessage, TaskStatus,
    TrackingEvent, UNKNOWN_FAILURE_SOURCE,
};
use jobservice_testing_utils::{
    routing_headers, FlakyMessagePublisher, InMemoryJobStore, RecordingForwarder,
    TaskMessageBuilder,
};
use mockall::mock;

use crate::proxy::*;

mock! {
    pub Reporter {}

    #[async_trait]
    impl JobReporter for Reporter {
        async fn report_progress(&self, job_task_id: &JobTaskId, percentage: u32) -> Result<(), ReportingError>;
        async fn report_complete(&self, job_task_id: &JobTaskId) -> Result<Vec<DependentJob>, ReportingError>;
        async fn report_retry(&self, job_task_id: &JobTaskId, detail: &str) -> Result<(), ReportingError>;
        async fn report_rejected(&self, job_task_id: &JobTaskId, failure: &JobFailure) -> Result<(), ReportingError>;
        async fn verify_reachable(&self) -> bool;
    }
}

mock! {
    pub Forwarder {}

    #[async_trait]
    impl ForwardingPort for Forwarder {
        async fn forward(&self, destination: &str, message: &TaskMessage, headers: &MessageHeaders) -> JobResult<()>;
    }
}

struct Harness {
    proxy: TrackingProxy,
    publisher: FlakyMessagePublisher,
}

fn harness(reporter: Arc<dyn JobReporter>, forwarder: Arc<dyn ForwardingPort>) -> Harness {
    let publisher = FlakyMessagePublisher::new(0);
    let task_publisher = TaskPublisher::new(
        Arc::new(publisher.clone()),
        &PublisherConfig {
            webservice_url: "http://jobservice:8080/job-service/v1".to_string(),
            tracking_pipe: "jobtracking-in".to_string(),
            status_check_interval_seconds: "5".to_string(),
        },
    )
    .unwrap();

    let proxy = TrackingProxy::new(
        reporter,
        forwarder,
        Arc::new(task_publisher),
        Arc::new(publisher.clone()),
        &TrackingConfig::default(),
        "jobtracking-out",
    );
    Harness { proxy, publisher }
}

fn tracked(status: TaskStatus, to: &str, track_to: &str) -> TaskMessage {
    TaskMessageBuilder::new()
        .with_status(status)
        .with_to(Some(to))
        .with_track_to(Some(track_to))
        .build()
}

fn classification_of(message: &TaskMessage, routing: &RoutingMetadata) -> Classification {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    classify(message, routing, now).unwrap().1
}

#[test]
fn test_success_path_statuses_complete_at_track_to() {
    for status in [TaskStatus::NewTask, TaskStatus::ResultSuccess] {
        let message = tracked(status, "example-out", "example-out");
        assert_eq!(
            classification_of(&message, &RoutingMetadata::default()),
            Classification::Complete
        );

        let message = tracked(status, "EXAMPLE-OUT", "example-out");
        assert_eq!(
            classification_of(&message, &RoutingMetadata::default()),
            Classification::Complete
        );
    }
}

#[test]
fn test_success_path_statuses_report_zero_progress_elsewhere() {
    for status in [TaskStatus::NewTask, TaskStatus::ResultSuccess] {
        let message = tracked(status, "ocr-in", "example-out");
        assert_eq!(
            classification_of(&message, &RoutingMetadata::default()),
            Classification::Progress { percentage: 0 }
        );
    }
}

#[test]
fn test_failure_statuses_with_rejected_header() {
    let routing = RoutingMetadata {
        rejected_reason: Some("MAX_RETRIES_EXCEEDED".to_string()),
        retry_count: 10,
    };

    for status in [TaskStatus::ResultFailure, TaskStatus::ResultException] {
        for to in ["example-out", "ocr-in"] {
            let message = tracked(status, to, "example-out");
            let Classification::Rejected { failure } = classification_of(&message, &routing) else {
                panic!("expected a rejected classification for {status}");
            };
            assert_eq!(failure.failure_id, "J1.1");
            assert_eq!(failure.failure_source, UNKNOWN_FAILURE_SOURCE);
            assert_eq!(
                failure.failure_message,
                "MAX_RETRIES_EXCEEDED. Execution of this job task was retried 10 times."
            );
        }
    }
}

#[test]
fn test_failure_statuses_without_rejected_header_are_retried() {
    let routing = RoutingMetadata {
        rejected_reason: None,
        retry_count: 2,
    };

    for status in [TaskStatus::ResultFailure, TaskStatus::ResultException] {
        let message = tracked(status, "example-out", "example-out");
        assert_eq!(
            classification_of(&message, &routing),
            Classification::Retry {
                detail: "This job task encountered a problem and will be retried. This will be retry attempt number 2 for this job task.".to_string()
            }
        );
    }
}

#[test]
fn test_rejected_failure_names_source_worker() {
    let message = TaskMessageBuilder::new()
        .with_status(TaskStatus::ResultException)
        .with_source("ocr-worker")
        .build();
    let routing = RoutingMetadata {
        rejected_reason: Some("TASK_TOO_LARGE".to_string()),
        retry_count: 0,
    };

    let Classification::Rejected { failure } = classification_of(&message, &routing) else {
        panic!("expected a rejected classification");
    };
    assert_eq!(failure.failure_source, "ocr-worker");
}

#[test]
fn test_missing_prerequisites_skip_classification() {
    let routing = RoutingMetadata::default();
    let now = Utc::now();

    let cases = [
        (TaskMessageBuilder::new().without_tracking().build(), SkipReason::NoTrackingInfo),
        (TaskMessageBuilder::new().with_job_task_id(None).build(), SkipReason::NoJobTaskId),
        (TaskMessageBuilder::new().with_job_task_id(Some("")).build(), SkipReason::NoJobTaskId),
        (TaskMessageBuilder::new().with_track_to(None).build(), SkipReason::NoTrackTo),
        (TaskMessageBuilder::new().with_to(None).build(), SkipReason::NoDestination),
    ];

    for (message, expected) in cases {
        assert_eq!(classify(&message, &routing, now).unwrap_err(), expected);
    }
}

#[tokio::test]
async fn test_reporting_failure_still_forwards_once_with_original_headers() {
    let mut reporter = MockReporter::new();
    reporter
        .expect_report_progress()
        .withf(|id, percentage| id.message_id() == "tenant-a:J1.1" && *percentage == 0)
        .times(1)
        .returning(|_, _| Err(ReportingError::Transient("connection refused".to_string())));

    let message = tracked(TaskStatus::ResultSuccess, "ocr-in", "example-out");
    let headers = routing_headers(None, Some(1));

    let expected_message = message.clone();
    let expected_headers = headers.clone();
    let mut forwarder = MockForwarder::new();
    forwarder
        .expect_forward()
        .withf(move |destination, forwarded, forwarded_headers| {
            destination == "ocr-in"
                && *forwarded == expected_message
                && *forwarded_headers == expected_headers
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let h = harness(Arc::new(reporter), Arc::new(forwarder));
    let outcome = h.proxy.handle(&message, &headers).await.unwrap();

    assert_eq!(
        outcome,
        ProxyOutcome::Forwarded {
            destination: "ocr-in".to_string(),
            classification: ClassificationOutcome::Reported(ReportKind::Progress),
        }
    );
}

#[tokio::test]
async fn test_store_outage_never_blocks_forwarding() {
    let cases = [
        (TaskStatus::ResultSuccess, "example-out", None, ReportKind::Complete),
        (TaskStatus::ResultSuccess, "ocr-in", None, ReportKind::Progress),
        (TaskStatus::ResultFailure, "example-out", None, ReportKind::Retry),
        (TaskStatus::ResultFailure, "example-out", Some("TASK_TOO_LARGE"), ReportKind::Rejected),
    ];

    for (status, to, rejected_reason, kind) in cases {
        let store = InMemoryJobStore::new();
        store.fail_reporting_with(Some(ReportingError::Permanent("relation \"job\" does not exist".to_string())));

        let message = tracked(status, to, "example-out");
        let headers = routing_headers(rejected_reason, Some(2));

        let expected_message = message.clone();
        let expected_headers = headers.clone();
        let expected_destination = to.to_string();
        let mut forwarder = MockForwarder::new();
        forwarder
            .expect_forward()
            .withf(move |destination, forwarded, forwarded_headers| {
                destination == expected_destination
                    && *forwarded == expected_message
                    && *forwarded_headers == expected_headers
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let h = harness(Arc::new(store.clone()), Arc::new(forwarder));
        let outcome = h.proxy.handle(&message, &headers).await.unwrap();

        assert_eq!(
            outcome,
            ProxyOutcome::Forwarded {
                destination: to.to_string(),
                classification: ClassificationOutcome::Reported(kind),
            },
            "kind: {kind:?}"
        );
        assert!(store.task(&JobTaskId::new("tenant-a", "J1.1")).is_none());
        assert!(h.publisher.published().is_empty());
    }
}

#[tokio::test]
async fn test_skipped_classification_still_forwards() {
    let reporter = MockReporter::new();
    let mut forwarder = MockForwarder::new();
    forwarder
        .expect_forward()
        .withf(|destination, _, _| destination == "example-out")
        .times(1)
        .returning(|_, _, _| Ok(()));

    let h = harness(Arc::new(reporter), Arc::new(forwarder));
    let message = TaskMessageBuilder::new().without_tracking().build();

    let outcome = h.proxy.handle(&message, &MessageHeaders::new()).await.unwrap();
    assert_eq!(
        outcome,
        ProxyOutcome::Forwarded {
            destination: "example-out".to_string(),
            classification: ClassificationOutcome::Skipped(SkipReason::NoTrackingInfo),
        }
    );
}

#[tokio::test]
async fn test_missing_destination_is_undeliverable() {
    let reporter = MockReporter::new();
    let forwarder = MockForwarder::new();

    let h = harness(Arc::new(reporter), Arc::new(forwarder));
    let message = TaskMessageBuilder::new().with_to(None).build();

    let outcome = h.proxy.handle(&message, &MessageHeaders::new()).await.unwrap();
    assert_eq!(
        outcome,
        ProxyOutcome::Undeliverable {
            classification: ClassificationOutcome::Skipped(SkipReason::NoDestination),
        }
    );
}

#[tokio::test]
async fn test_forward_failure_is_surfaced() {
    let store = InMemoryJobStore::new();
    let mut forwarder = MockForwarder::new();
    forwarder
        .expect_forward()
        .times(1)
        .returning(|_, _, _| Err(jobservice_core::JobError::message_queue("channel closed")));

    let h = harness(Arc::new(store.clone()), Arc::new(forwarder));
    let message = tracked(TaskStatus::ResultSuccess, "ocr-in", "example-out");

    assert!(h.proxy.handle(&message, &MessageHeaders::new()).await.is_err());
    // 上报在转发之前已经完成
    let task = store.task(&JobTaskId::new("tenant-a", "J1.1")).unwrap();
    assert_eq!(task.status, JobStatus::Active);
}

#[tokio::test]
async fn test_rejected_envelope_is_recorded_and_forwarded() {
    let store = InMemoryJobStore::new();
    let forwarder = RecordingForwarder::new();
    let h = harness(Arc::new(store.clone()), Arc::new(forwarder.clone()));

    let message = TaskMessageBuilder::new()
        .with_status(TaskStatus::ResultFailure)
        .with_source("ocr-worker")
        .build();
    let headers = routing_headers(Some("TASK_TOO_LARGE"), Some(3));

    h.proxy.handle(&message, &headers).await.unwrap();

    let task = store.task(&JobTaskId::new("tenant-a", "J1.1")).unwrap();
    assert_eq!(task.status, JobStatus::Failed);
    let failure = task.failure.unwrap();
    assert_eq!(failure.failure_source, "ocr-worker");
    assert_eq!(
        failure.failure_message,
        "TASK_TOO_LARGE. Execution of this job task was retried 3 times."
    );

    let sent = forwarder.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].headers, headers);
}

fn dependent_job() -> JobRecord {
    JobRecord {
        partition_id: "tenant-a".to_string(),
        job_id: "J2".to_string(),
        name: Some("after J1".to_string()),
        description: None,
        external_data: None,
        labels: BTreeMap::new(),
        policies: BTreeMap::new(),
        task: TaskDefinition {
            task_classifier: "ExampleWorker".to_string(),
            task_api_version: 1,
            task_data: b"payload".to_vec(),
            task_pipe: "example-in".to_string(),
            target_pipe: "example-out".to_string(),
        },
        prerequisite_job_ids: vec!["J1".to_string()],
        delay: 0,
    }
}

#[tokio::test]
async fn test_completion_releases_dependent_jobs_once() {
    let store = InMemoryJobStore::new();
    assert!(!store.create_job(&dependent_job()).await.unwrap());

    let forwarder = RecordingForwarder::new();
    let h = harness(Arc::new(store.clone()), Arc::new(forwarder.clone()));

    let message = TaskMessageBuilder::new()
        .with_status(TaskStatus::ResultSuccess)
        .with_job_task_id(Some("tenant-a:J1"))
        .build();

    for _ in 0..2 {
        let outcome = h.proxy.handle(&message, &MessageHeaders::new()).await.unwrap();
        assert_eq!(
            outcome,
            ProxyOutcome::Forwarded {
                destination: "example-out".to_string(),
                classification: ClassificationOutcome::Reported(ReportKind::Complete),
            }
        );
    }

    let task = store.task(&JobTaskId::new("tenant-a", "J1")).unwrap();
    assert_eq!(task.status, JobStatus::Completed);
    assert_eq!(forwarder.sent().len(), 2);

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, "example-in");

    let dependent = published[0].message();
    assert_eq!(dependent.task_status, TaskStatus::NewTask);
    assert_eq!(dependent.task_data, b"payload");
    let tracking = dependent.tracking.unwrap();
    assert_eq!(tracking.job_task_id.as_deref(), Some("tenant-a:J2"));
    assert_eq!(tracking.track_to.as_deref(), Some("example-out"));
    assert_eq!(tracking.tracking_pipe.as_deref(), Some("jobtracking-in"));
}

fn tracking_event(percentage: u32) -> TaskMessage {
    let event = TrackingEvent {
        job_task_id: "tenant-a:J1.4".to_string(),
        estimated_percentage_completed: percentage,
    };
    TaskMessageBuilder::new()
        .with_classifier("JobTrackingWorker")
        .with_task_data(&serde_json::to_vec(&event).unwrap())
        .with_to(Some("jobtracking-in"))
        .build()
}

#[tokio::test]
async fn test_tracking_event_reports_its_own_percentage() {
    let store = InMemoryJobStore::new();
    let forwarder = RecordingForwarder::new();
    let h = harness(Arc::new(store.clone()), Arc::new(forwarder.clone()));

    let outcome = h
        .proxy
        .handle(&tracking_event(40), &MessageHeaders::new())
        .await
        .unwrap();

    assert_eq!(outcome, ProxyOutcome::Completed);
    let task = store.task(&JobTaskId::new("tenant-a", "J1.4")).unwrap();
    assert_eq!(task.percentage, 40);
    assert!(forwarder.sent().is_empty());
    assert!(h.publisher.published().is_empty());
}

#[tokio::test]
async fn test_failed_tracking_event_publishes_failure_result() {
    let store = InMemoryJobStore::new();
    store.fail_reporting_with(Some(ReportingError::Transient("database down".to_string())));
    let forwarder = RecordingForwarder::new();
    let h = harness(Arc::new(store), Arc::new(forwarder.clone()));

    let event = tracking_event(40);
    let outcome = h.proxy.handle(&event, &MessageHeaders::new()).await.unwrap();

    let ProxyOutcome::ProgressUpdateFailed(description) = outcome else {
        panic!("expected a failed progress update, got {outcome:?}");
    };
    assert!(description.contains("database down"));
    assert!(forwarder.sent().is_empty());

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, "jobtracking-out");

    let result = published[0].message();
    assert_eq!(result.task_status, TaskStatus::ResultFailure);
    assert_eq!(result.task_id, event.task_id);
    let data: serde_json::Value = serde_json::from_slice(&result.task_data).unwrap();
    assert_eq!(data["status"], "PROGRESS_UPDATE_FAILED");
}

#[tokio::test]
async fn test_worker_classifier_without_event_payload_is_proxied() {
    let store = InMemoryJobStore::new();
    let forwarder = RecordingForwarder::new();
    let h = harness(Arc::new(store.clone()), Arc::new(forwarder.clone()));

    let message = TaskMessageBuilder::new()
        .with_classifier("JobTrackingWorker")
        .with_task_data(b"not an event")
        .build();
    let headers = MessageHeaders::new().with("x-custom", HeaderValue::Bool(true));

    let outcome = h.proxy.handle(&message, &headers).await.unwrap();
    assert!(matches!(outcome, ProxyOutcome::Forwarded { .. }));
    assert_eq!(forwarder.sent()[0].headers, headers);
}
