//! End-to-end scheduling scenarios against an in-process worker fleet.

mod support;

use std::time::Duration;

use vision_core::{ImageRef, RequestStatus};
use visiongrid_scheduler::{NO_PAYLOAD_PROCESSED, SchedulerError};

use support::{Knobs, harness, jpeg};

const OWNER: &str = "ana@example.com";

fn two_images() -> Vec<ImageRef> {
    vec![
        ImageRef::local("img-0", jpeg("a")),
        ImageRef::local("img-1", jpeg("b")),
    ]
}

/// One request, two local images, MIN_WORKERS = 2.
#[tokio::test]
async fn scenario_a_two_images_two_workers() {
    let h = harness(Knobs::default());
    let id = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", two_images())
        .await
        .unwrap();
    assert_eq!(
        h.scheduler.query_status(&id).await.unwrap().status,
        RequestStatus::Queued
    );

    assert_eq!(h.scheduler.dispatch_next().await.as_deref(), Some(id.as_str()));

    assert_eq!(h.fleet.launch_count(), 2);
    assert_eq!(h.fleet.distinct_call_addresses(), 2);
    assert_eq!(h.describer.seen.lock().unwrap().len(), 2);

    let report = h.scheduler.query_status(&id).await.unwrap();
    assert_eq!(report.status, RequestStatus::Completed);
    assert_eq!(report.result.as_ref().map(Vec::len), Some(2));
    assert_eq!(
        h.persistence.statuses_of(&id),
        vec![
            RequestStatus::Pending,
            RequestStatus::Queued,
            RequestStatus::Processing,
            RequestStatus::Completed
        ]
    );
    assert_eq!(h.persistence.results.lock().unwrap()[&id].len(), 2);

    // Both workers are back in the pool.
    assert_eq!(h.registry.available_count().await, 2);
}

/// One worker hangs: its payload fails, the other succeeds, and the next
/// monitor tick reaps and restarts the hung worker.
#[tokio::test]
async fn scenario_b_timeout_yields_partial_completion() {
    let h = harness(Knobs {
        dispatch_attempts: 1,
        dispatch_timeout: Duration::from_millis(100),
        ..Knobs::default()
    });
    h.scheduler.autoscaler().tick().await;
    assert_eq!(h.registry.count_ready().await, 2);
    h.fleet.hang(50052);

    let id = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", two_images())
        .await
        .unwrap();
    h.scheduler.dispatch_next().await;

    let report = h.scheduler.query_status(&id).await.unwrap();
    assert_eq!(report.status, RequestStatus::Completed);
    assert_eq!(report.result.as_ref().map(Vec::len), Some(1));

    let hung = h.registry.get("worker-50052").await.unwrap();
    assert_eq!(hung.health, visiongrid_pool::WorkerHealth::Unresponsive);

    let tick = h.scheduler.autoscaler().tick().await;
    assert_eq!(tick.restarted, 1);
    let restarted = h.registry.get("worker-50052").await.unwrap();
    assert_eq!(restarted.health, visiongrid_pool::WorkerHealth::Ready);
    assert_ne!(restarted.vm_id, hung.vm_id);
    assert_eq!(h.fleet.launch_count(), 3);
    assert_eq!(h.registry.available_count().await, 2);
}

/// Queue spikes to 8 with MAX_WORKERS = 10, then drains.
#[tokio::test(start_paused = true)]
async fn scenario_c_spike_then_shrink() {
    let h = harness(Knobs {
        idle_timeout: Duration::from_secs(30),
        ..Knobs::default()
    });
    let mut ids = Vec::new();
    for i in 0..8 {
        let images = vec![ImageRef::local(format!("img-{i}"), jpeg("x"))];
        ids.push(
            h.scheduler
                .submit(OWNER, "yolov8n", "detect", images)
                .await
                .unwrap(),
        );
    }

    let tick = h.scheduler.autoscaler().tick().await;
    assert_eq!(tick.target, 8);
    assert_eq!(h.registry.count_ready().await, 8);

    for _ in 0..8 {
        h.scheduler.dispatch_next().await.unwrap();
    }
    for id in &ids {
        assert_eq!(
            h.scheduler.query_status(id).await.unwrap().status,
            RequestStatus::Completed
        );
    }
    assert_eq!(h.scheduler.queue().outstanding().await, 0);

    tokio::time::advance(Duration::from_secs(31)).await;
    h.scheduler.autoscaler().tick().await;
    assert_eq!(h.registry.count_live().await, 2);
    assert_eq!(h.fabric.vm_count().await, 2);
}

#[tokio::test]
async fn scenario_c_spike_bounded_by_max() {
    let h = harness(Knobs::default());
    for i in 0..14 {
        let images = vec![ImageRef::local(format!("img-{i}"), jpeg("x"))];
        h.scheduler
            .submit(OWNER, "yolov8n", "detect", images)
            .await
            .unwrap();
    }
    h.scheduler.autoscaler().tick().await;
    assert_eq!(h.registry.count_live().await, 10);
}

/// Reprocessing a missing request is NotFound; an existing one yields a new
/// request that starts Pending.
#[tokio::test]
async fn scenario_d_reprocess() {
    let h = harness(Knobs::default());
    assert!(matches!(
        h.scheduler.reprocess("no-such-request").await,
        Err(SchedulerError::NotFound(_))
    ));

    let id = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", two_images())
        .await
        .unwrap();
    h.scheduler.dispatch_next().await;

    let new_id = h.scheduler.reprocess(&id).await.unwrap();
    assert_ne!(new_id, id);
    assert_eq!(
        h.persistence.statuses_of(&new_id).first(),
        Some(&RequestStatus::Pending)
    );
    assert_eq!(
        h.scheduler.query_status(&new_id).await.unwrap().status,
        RequestStatus::Queued
    );
    // The original keeps its history.
    assert_eq!(
        h.scheduler.query_status(&id).await.unwrap().status,
        RequestStatus::Completed
    );

    h.scheduler.dispatch_next().await;
    assert_eq!(
        h.scheduler.query_status(&new_id).await.unwrap().status,
        RequestStatus::Completed
    );

    assert!(h.scheduler.delete_request(&id, OWNER).await.unwrap());
    assert!(matches!(
        h.scheduler.reprocess(&id).await,
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test]
async fn all_payloads_failing_fails_request() {
    let h = harness(Knobs {
        min_workers: 1,
        max_workers: 1,
        dispatch_attempts: 1,
        dispatch_timeout: Duration::from_millis(50),
        ..Knobs::default()
    });
    h.scheduler.autoscaler().tick().await;
    h.fleet.hang(50052);

    let id = h
        .scheduler
        .submit(OWNER, "yolov8n", "detect", vec![ImageRef::local("img-0", jpeg("a"))])
        .await
        .unwrap();
    h.scheduler.dispatch_next().await;

    let report = h.scheduler.query_status(&id).await.unwrap();
    assert_eq!(report.status, RequestStatus::Failed);
    assert_eq!(report.failure_reason.as_deref(), Some(NO_PAYLOAD_PROCESSED));
    assert!(report.result.is_none());
}

/// Every admitted request reaches a terminal state with the loops running.
#[tokio::test]
async fn started_scheduler_completes_requests() {
    let h = harness(Knobs::default());
    let handle = h.scheduler.start();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            h.scheduler
                .submit(OWNER, "yolov8n", "detect", two_images())
                .await
                .unwrap(),
        );
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut done = true;
            for id in &ids {
                let status = h.scheduler.query_status(id).await.unwrap().status;
                done &= status.is_terminal();
            }
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    for id in &ids {
        let first = h.scheduler.query_status(id).await.unwrap();
        let second = h.scheduler.query_status(id).await.unwrap();
        assert_eq!(first.status, RequestStatus::Completed);
        assert_eq!(first, second);
    }

    handle.shutdown().await;
    assert_eq!(h.registry.size().await, 0);
    assert_eq!(h.fabric.vm_count().await, 0);
    assert!(matches!(
        h.scheduler
            .submit(OWNER, "yolov8n", "detect", two_images())
            .await,
        Err(SchedulerError::ShuttingDown)
    ));
}
