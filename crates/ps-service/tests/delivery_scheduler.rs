//! Delivery scheduler tests against in-memory collaborators.
//!
//! Covers:
//! - Both channels written for a resolvable event
//! - Job id de-duplication per end-of-stream cycle
//! - Channel failures staying independent
//! - Lookup misses dropping the signal before any write

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use ps_service::delivery::{
    ChannelStatus, DeliveryReport, DeliveryScheduler, DeliverySettings, DropReason,
    EndOfStreamHandler, JOB_NAME,
};
use ps_service::detector::EndOfStreamSignal;
use ps_test_utils::{MockEventDirectory, MockJobQueue, MockNotificationStore};

const HOST_ID: i64 = 7;
const HOST_EMAIL: &str = "host@example.com";

fn settings() -> DeliverySettings {
    DeliverySettings {
        delay: Duration::from_secs(30),
        keep_completed: 10,
        keep_failed: 5,
        link_base: "/events/".to_string(),
    }
}

fn directory() -> MockEventDirectory {
    MockEventDirectory::new()
        .with_event(42, "Launch stream", Some(HOST_ID))
        .with_event(43, "Orphaned stream", None)
        .with_event(44, "Stream by deleted host", Some(999))
        .with_host(HOST_ID, HOST_EMAIL)
}

fn scheduler(
    directory: &MockEventDirectory,
    queue: &MockJobQueue,
    store: &MockNotificationStore,
) -> DeliveryScheduler {
    DeliveryScheduler::new(
        Arc::new(directory.clone()),
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        settings(),
    )
}

fn signal(event_id: i64, generation: u64) -> EndOfStreamSignal {
    EndOfStreamSignal {
        event_id,
        generation,
    }
}

#[tokio::test]
async fn test_delivers_job_and_in_app_record() {
    let (queue, store) = (MockJobQueue::new(), MockNotificationStore::new());
    let scheduler = scheduler(&directory(), &queue, &store);

    let report = scheduler.deliver(signal(42, 5)).await;

    assert_eq!(
        report,
        DeliveryReport::Attempted {
            email_job: ChannelStatus::Success,
            in_app: ChannelStatus::Success,
        }
    );

    let jobs = queue.jobs();
    assert_eq!(jobs.len(), 1);
    let queued = jobs.first().unwrap();
    assert_eq!(queued.job.event_id, 42);
    assert_eq!(queued.job.event_name, "Launch stream");
    assert_eq!(queued.job.host_email, HOST_EMAIL);
    assert_eq!(queued.job.host_id, HOST_ID);
    assert_eq!(queued.options.delay, Duration::from_secs(30));
    assert_eq!(queued.options.keep_completed, 10);
    assert_eq!(queued.options.keep_failed, 5);
    assert_eq!(queued.options.job_id, format!("{JOB_NAME}:42:5"));

    let records = store.records();
    assert_eq!(records.len(), 1);
    let record = records.first().unwrap();
    assert_eq!(record.user_id, HOST_ID);
    assert_eq!(record.notification_type, "system");
    assert_eq!(record.link, "/events/42");
    assert_eq!(record.metadata.event_id, 42);
}

#[tokio::test]
async fn test_same_cycle_twice_enqueues_once() {
    let (queue, store) = (MockJobQueue::new(), MockNotificationStore::new());
    let scheduler = scheduler(&directory(), &queue, &store);

    scheduler.deliver(signal(42, 5)).await;
    let report = scheduler.deliver(signal(42, 5)).await;

    assert!(matches!(
        report,
        DeliveryReport::Attempted {
            email_job: ChannelStatus::Duplicate,
            ..
        }
    ));
    assert_eq!(queue.call_count(), 2);
    assert_eq!(queue.jobs().len(), 1);

    // A new cycle is a new job
    scheduler.deliver(signal(42, 6)).await;
    assert_eq!(queue.jobs().len(), 2);
}

#[tokio::test]
async fn test_queue_failure_still_writes_in_app() {
    let (queue, store) = (MockJobQueue::failing(), MockNotificationStore::new());
    let scheduler = scheduler(&directory(), &queue, &store);

    let report = scheduler.deliver(signal(42, 1)).await;

    assert_eq!(
        report,
        DeliveryReport::Attempted {
            email_job: ChannelStatus::Failed,
            in_app: ChannelStatus::Success,
        }
    );
    assert_eq!(queue.call_count(), 1, "no retry");
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn test_store_failure_still_enqueues_job() {
    let (queue, store) = (MockJobQueue::new(), MockNotificationStore::failing());
    let scheduler = scheduler(&directory(), &queue, &store);

    let report = scheduler.deliver(signal(42, 1)).await;

    assert_eq!(
        report,
        DeliveryReport::Attempted {
            email_job: ChannelStatus::Success,
            in_app: ChannelStatus::Failed,
        }
    );
    assert_eq!(queue.jobs().len(), 1);
    assert_eq!(store.call_count(), 1);
}

#[tokio::test]
async fn test_unresolvable_signals_are_dropped_without_writes() {
    let (queue, store) = (MockJobQueue::new(), MockNotificationStore::new());
    let directory = directory();
    let scheduler = scheduler(&directory, &queue, &store);

    assert_eq!(
        scheduler.deliver(signal(404, 1)).await,
        DeliveryReport::Dropped(DropReason::EventNotFound)
    );
    assert_eq!(
        scheduler.deliver(signal(43, 1)).await,
        DeliveryReport::Dropped(DropReason::NoHost)
    );
    assert_eq!(
        scheduler.deliver(signal(44, 1)).await,
        DeliveryReport::Dropped(DropReason::HostNotFound)
    );

    assert_eq!(directory.event_lookups(), 3);
    assert_eq!(directory.host_lookups(), 1);
    assert_eq!(queue.call_count(), 0);
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_lookup_failure_drops_signal() {
    let (queue, store) = (MockJobQueue::new(), MockNotificationStore::new());
    let scheduler = scheduler(&MockEventDirectory::failing(), &queue, &store);

    assert_eq!(
        scheduler.deliver(signal(42, 1)).await,
        DeliveryReport::Dropped(DropReason::LookupFailed)
    );
    assert_eq!(queue.call_count(), 0);
    assert_eq!(store.call_count(), 0);
}

#[tokio::test]
async fn test_handler_entry_point_delivers() {
    let (queue, store) = (MockJobQueue::new(), MockNotificationStore::new());
    let handler: Arc<dyn EndOfStreamHandler> = Arc::new(scheduler(&directory(), &queue, &store));

    handler.on_end_of_stream(signal(42, 9)).await;

    assert_eq!(queue.jobs().len(), 1);
    assert_eq!(store.records().len(), 1);
}
