//! The managed background tasks and their schedules.

use chrono::{Utc, Weekday};
use std::sync::Arc;
use std::time::Duration;

use super::scheduler::{task_fn, JobScheduler, Schedule, TaskHandle, TaskReport};
use super::Engine;
use crate::error::Result;

pub const RECONCILE: &str = "reconcile";
pub const DATA_SYNC: &str = "data-sync";
pub const WEEKLY_DIGEST: &str = "weekly-digest";
pub const CLEANUP: &str = "cleanup";
pub const HIGH_CONFIDENCE_ALERTS: &str = "high-confidence-alerts";
pub const EVENT_START_ALERTS: &str = "event-start-alerts";
pub const DISPATCH: &str = "dispatch";

/// Register every managed task on `scheduler`. Call before `start`.
pub fn register_managed_tasks(scheduler: &JobScheduler, engine: Arc<Engine>) -> Result<Vec<TaskHandle>> {
    let mut handles = Vec::with_capacity(7);

    let e = engine.clone();
    handles.push(scheduler.register(
        RECONCILE,
        Schedule::Hourly { minute: 0 },
        task_fn(move || {
            let e = e.clone();
            async move { TaskReport::of(&e.reconcile().await?) }
        }),
    )?);

    let e = engine.clone();
    handles.push(scheduler.register(
        DATA_SYNC,
        Schedule::Daily {
            hours: vec![8, 20],
            minute: 0,
        },
        task_fn(move || {
            let e = e.clone();
            async move { TaskReport::of(&e.sync_current_week().await?) }
        }),
    )?);

    let e = engine.clone();
    handles.push(scheduler.register(
        WEEKLY_DIGEST,
        Schedule::Weekly {
            weekday: Weekday::Mon,
            hour: 9,
            minute: 0,
        },
        task_fn(move || {
            let e = e.clone();
            async move { TaskReport::of(&e.notifier().produce_weekly_digest(Utc::now()).await?) }
        }),
    )?);

    let e = engine.clone();
    handles.push(scheduler.register(
        CLEANUP,
        Schedule::Daily {
            hours: vec![3],
            minute: 0,
        },
        task_fn(move || {
            let e = e.clone();
            async move { TaskReport::of(&e.cleanup(Utc::now()).await?) }
        }),
    )?);

    let e = engine.clone();
    handles.push(scheduler.register(
        HIGH_CONFIDENCE_ALERTS,
        Schedule::Hourly { minute: 15 },
        task_fn(move || {
            let e = e.clone();
            async move {
                TaskReport::of(&e.notifier().produce_high_confidence_alerts(Utc::now()).await?)
            }
        }),
    )?);

    let e = engine.clone();
    handles.push(scheduler.register(
        EVENT_START_ALERTS,
        Schedule::Every(Duration::from_secs(30 * 60)),
        task_fn(move || {
            let e = e.clone();
            async move { TaskReport::of(&e.notifier().produce_event_start_alerts(Utc::now()).await?) }
        }),
    )?);

    let e = engine;
    handles.push(scheduler.register(
        DISPATCH,
        Schedule::Every(Duration::from_secs(5 * 60)),
        task_fn(move || {
            let e = e.clone();
            async move { TaskReport::of(&e.notifier().dispatch_due(Utc::now()).await?) }
        }),
    )?);

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelSet;
    use crate::config::{NotificationConfig, SyncConfig};
    use crate::data::{MockEnrichmentService, MockSportsApi};
    use crate::storage::test_store;

    async fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(
            test_store().await,
            Arc::new(MockEnrichmentService::new()),
            Arc::new(MockSportsApi::new()),
            ChannelSet::dry_run(),
            SyncConfig::default(),
            NotificationConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_all_managed_tasks_registered() {
        let scheduler = JobScheduler::new();
        let handles = register_managed_tasks(&scheduler, engine().await).unwrap();
        let names: Vec<&str> = handles.iter().map(|h| h.name()).collect();
        assert_eq!(
            names,
            vec![
                RECONCILE,
                DATA_SYNC,
                WEEKLY_DIGEST,
                CLEANUP,
                HIGH_CONFIDENCE_ALERTS,
                EVENT_START_ALERTS,
                DISPATCH
            ]
        );

        let statuses = scheduler.statuses();
        let reconcile = statuses.iter().find(|s| s.name == RECONCILE).unwrap();
        assert_eq!(reconcile.schedule, "hourly at :00");
        let sync = statuses.iter().find(|s| s.name == DATA_SYNC).unwrap();
        assert_eq!(sync.schedule, "daily at 08:00, 20:00 UTC");
    }

    #[tokio::test]
    async fn test_reconcile_runs_on_demand() {
        let scheduler = JobScheduler::new();
        register_managed_tasks(&scheduler, engine().await).unwrap();
        let report = scheduler.run_now(RECONCILE).await.unwrap();
        assert_eq!(report.0["updated"], 0);
        assert_eq!(report.0["failed"], 0);
    }

    #[tokio::test]
    async fn test_dispatch_and_cleanup_on_empty_queue() {
        let scheduler = JobScheduler::new();
        register_managed_tasks(&scheduler, engine().await).unwrap();
        let dispatch = scheduler.run_now(DISPATCH).await.unwrap();
        assert_eq!(dispatch.0["attempted"], 0);
        let cleanup = scheduler.run_now(CLEANUP).await.unwrap();
        assert_eq!(cleanup.0["notifications_purged"], 0);
    }
}
