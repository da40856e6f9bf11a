//! Engine: data sync, settlement, transparency and notifications behind one
//! facade, plus the scheduler that drives them.

pub mod jobs;
pub mod notifier;
pub mod reconciler;
pub mod scheduler;
pub mod settlement;
pub mod sync;
pub mod transparency;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::channels::ChannelSet;
use crate::config::{NotificationConfig, SyncConfig};
use crate::data::{EnrichmentService, SportsApi};
use crate::error::Result;
use crate::storage::Store;
use crate::types::{AccuracyStat, Game, StatScope};

use notifier::NotificationDispatcher;
use reconciler::{ReconcileSummary, ResultsReconciler};
use sync::{SyncReport, WeekResolver};
use transparency::{TransparencyStats, TrustRecommendation};

/// What the cleanup job removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cache_evicted: usize,
    pub notifications_purged: u64,
}

pub struct Engine {
    store: Store,
    resolver: WeekResolver,
    reconciler: ResultsReconciler,
    notifier: NotificationDispatcher,
}

impl Engine {
    pub fn new(
        store: Store,
        enrichment: Arc<dyn EnrichmentService>,
        sports: Arc<dyn SportsApi>,
        channels: ChannelSet,
        sync: SyncConfig,
        notifications: NotificationConfig,
    ) -> Self {
        Self {
            resolver: WeekResolver::new(store.clone(), enrichment, sports, sync),
            reconciler: ResultsReconciler::new(store.clone()),
            notifier: NotificationDispatcher::new(store.clone(), channels, notifications),
            store,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn resolver(&self) -> &WeekResolver {
        &self.resolver
    }

    pub fn notifier(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    /// Games for a week through the tiered fallback. Never errors.
    pub async fn resolve_week(&self, season: i32, week: i32) -> Vec<Game> {
        self.resolver.resolve_week(season, week).await
    }

    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        self.reconciler.reconcile().await
    }

    pub async fn transparency_stats(&self) -> Result<TransparencyStats> {
        transparency::transparency_stats(&self.store, Utc::now()).await
    }

    pub async fn trust_recommendations(&self) -> Result<Vec<TrustRecommendation>> {
        transparency::trust_recommendations(&self.store).await
    }

    /// Stored aggregate rows as of the last reconcile, optionally one scope.
    pub async fn accuracy_stats(&self, scope: Option<StatScope>) -> Result<Vec<AccuracyStat>> {
        self.store.accuracy_stats(scope).await
    }

    pub async fn accuracy_stat(&self, scope: StatScope, scope_id: &str) -> Result<Option<AccuracyStat>> {
        self.store.accuracy_stat(scope, scope_id).await
    }

    /// Drop every cached week. The store is untouched.
    pub fn clear_cache(&self) -> usize {
        let cleared = self.resolver.cache().clear();
        info!(cleared, "Week cache cleared");
        cleared
    }

    pub async fn retry_failed(&self, notification_id: i64) -> Result<bool> {
        self.notifier.retry_failed(notification_id).await
    }

    pub async fn retry_all_failed(&self) -> Result<u64> {
        self.notifier.retry_all_failed().await
    }

    /// Force-refresh the live week and backfill its model picks.
    pub async fn sync_current_week(&self) -> Result<SyncReport> {
        let week = self.resolver.current_week().await;
        self.resolver.sync_week(week.season, week.week).await
    }

    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cache_evicted = self.resolver.cache().evict_expired();
        let notifications_purged = self.notifier.purge(now).await?;
        Ok(CleanupReport {
            cache_evicted,
            notifications_purged,
        })
    }
}
