//! Managed tasks driven through the scheduler.

use std::sync::Arc;
use std::time::Duration;

use pickline::engine::jobs::{register_managed_tasks, DISPATCH, RECONCILE};
use pickline::engine::scheduler::{task_fn, JobScheduler, Schedule, TaskReport};
use pickline::error::EngineError;

use crate::upstreams::FakeSportsApi;
use crate::{week_five, Harness};

#[tokio::test]
async fn test_overlapping_reconcile_firing_is_skipped() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let scheduler = JobScheduler::new();

    // Reconcile that outlives several ticks of its schedule.
    let engine = h.engine.clone();
    scheduler
        .register(
            RECONCILE,
            Schedule::Every(Duration::from_millis(25)),
            task_fn(move || {
                let engine = engine.clone();
                async move {
                    let summary = engine.reconcile().await?;
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    TaskReport::of(&summary)
                }
            }),
        )
        .unwrap();

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let status = scheduler.status(RECONCILE).unwrap();
    assert!(status.running);
    assert_eq!(status.fired, 1);
    assert!(status.skipped >= 1, "{status:?}");

    assert!(matches!(
        scheduler.run_now(RECONCILE).await,
        Err(EngineError::TaskBusy(_))
    ));

    scheduler.stop().await;
    let status = scheduler.status(RECONCILE).unwrap();
    assert!(!status.running);
    assert_eq!(status.failed, 0);
    assert!(status.last_finished.is_some());
}

#[tokio::test]
async fn test_managed_tasks_run_on_demand() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let scheduler = Arc::new(JobScheduler::new());
    let handles = register_managed_tasks(&scheduler, h.engine.clone()).unwrap();
    assert_eq!(handles.len(), 7);

    let report = scheduler.run_now(RECONCILE).await.unwrap();
    assert_eq!(report.0["updated"], 0);

    let report = scheduler.run_now(DISPATCH).await.unwrap();
    assert_eq!(report.0["attempted"], 0);

    let statuses = scheduler.statuses();
    let reconcile = statuses.iter().find(|s| s.name == RECONCILE).unwrap();
    assert_eq!(reconcile.fired, 1);
    assert_eq!(reconcile.schedule, "hourly at :00");
}
