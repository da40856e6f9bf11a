//! End-to-end tests against the public `pickline` API with in-memory
//! upstreams and channels.

mod notifications;
mod pipeline;
mod scheduling;
mod upstreams;

use std::sync::Arc;

use pickline::channels::ChannelSet;
use pickline::config::{NotificationConfig, SyncConfig};
use pickline::data::WeekRef;
use pickline::engine::Engine;
use pickline::storage::Store;
use pickline::types::Channel;

use upstreams::{FakeEnrichment, FakeSportsApi, RecordingChannel};

/// An engine wired to fakes, with handles kept for inspection.
pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Store,
    pub sports: Arc<FakeSportsApi>,
    pub enrichment: Arc<FakeEnrichment>,
    pub email: Arc<RecordingChannel>,
    pub push: Arc<RecordingChannel>,
}

impl Harness {
    pub async fn in_memory(sports: FakeSportsApi) -> Self {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        Self::on(store, sports)
    }

    pub fn on(store: Store, sports: FakeSportsApi) -> Self {
        let sports = Arc::new(sports);
        let enrichment = Arc::new(FakeEnrichment::new());
        let email = Arc::new(RecordingChannel::new(Channel::Email));
        let push = Arc::new(RecordingChannel::new(Channel::Push));
        let engine = Arc::new(Engine::new(
            store.clone(),
            enrichment.clone(),
            sports.clone(),
            ChannelSet::new(email.clone(), push.clone()),
            SyncConfig::default(),
            NotificationConfig::default(),
        ));
        Self {
            engine,
            store,
            sports,
            enrichment,
            email,
            push,
        }
    }
}

pub fn week_five() -> WeekRef {
    WeekRef { season: 2025, week: 5 }
}
