//! Sync, backfill, settlement and transparency through one engine.

use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;

use pickline::data::EventPrediction;
use pickline::storage::Store;
use pickline::types::{NewPrediction, Pick, PredictionResult, PredictionType, StatScope};

use crate::upstreams::{final_game, scheduled_game, FakeSportsApi};
use crate::{week_five, Harness};

async fn game_id(store: &Store, external_id: &str) -> i64 {
    store.game_by_external_id(external_id).await.unwrap().unwrap().id
}

#[tokio::test]
async fn test_concurrent_first_resolves_store_each_game_once() {
    let path = std::env::temp_dir().join(format!("pickline-{}.db", uuid::Uuid::new_v4()));
    let store = Store::connect(&format!("sqlite://{}", path.display()), 5)
        .await
        .unwrap();
    store.migrate().await.unwrap();

    let games = (1..=4)
        .map(|n| scheduled_game(&format!("40{n}"), 2025, 5, n))
        .collect();
    let sports = FakeSportsApi::new(week_five())
        .with_week(2025, 5, games)
        .with_latency(StdDuration::from_millis(50));
    let h = Harness::on(store.clone(), sports);

    let (a, b) = tokio::join!(h.engine.resolve_week(2025, 5), h.engine.resolve_week(2025, 5));
    assert_eq!(a.len(), 4);
    assert_eq!(b.len(), 4);

    let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM games")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 4);
    assert!(h.sports.calls() <= 2);

    // Now served without touching the upstreams.
    let calls = h.sports.calls();
    assert_eq!(h.engine.resolve_week(2025, 5).await.len(), 4);
    assert_eq!(h.sports.calls(), calls);

    store.close().await;
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_resolve_week_survives_enrichment_outage() {
    let sports = FakeSportsApi::new(week_five()).with_week(2025, 5, vec![scheduled_game("401", 2025, 5, 2)]);
    let h = Harness::in_memory(sports).await;
    h.enrichment.set_unavailable(true);

    let games = h.engine.resolve_week(2025, 5).await;
    assert_eq!(games.len(), 1);
    assert_eq!(games[0].matchup(), "BUF @ KC");
    assert_eq!(h.enrichment.refreshes(), 1);
}

#[tokio::test]
async fn test_resolve_week_empty_when_every_tier_fails() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    h.enrichment.set_unavailable(true);
    h.sports.set_error("503 Service Unavailable");

    assert!(h.engine.resolve_week(2025, 5).await.is_empty());
}

#[tokio::test]
async fn test_sync_then_settle_then_report() {
    let sports = FakeSportsApi::new(week_five()).with_week(2025, 5, vec![scheduled_game("401", 2025, 5, 2)]);
    let h = Harness::in_memory(sports).await;
    h.enrichment.set_prediction(
        "401",
        EventPrediction {
            predicted_winner: "KC".into(),
            confidence: 0.8,
            spread_prediction: Some(5.0),
            over_under_prediction: Some(50.0),
        },
    );

    let report = h.engine.sync_current_week().await.unwrap();
    assert_eq!(report.games, 1);
    assert_eq!(report.backfill.inserted, 3);

    // A second sync finds nothing left to backfill.
    let again = h.engine.sync_current_week().await.unwrap();
    assert_eq!(again.backfill.requested, 0);

    let game = game_id(&h.store, "401").await;
    h.store
        .insert_prediction(
            &NewPrediction {
                game_id: game,
                user_id: Some(42),
                prediction_type: PredictionType::Winner,
                pick: Pick::Away,
                confidence: 0.6,
            },
            Utc::now(),
        )
        .await
        .unwrap();

    // Scoreboard reports KC 24, BUF 20.
    h.store
        .upsert_game(&final_game("401", 24, 20, Utc::now() - Duration::hours(3)), Utc::now())
        .await
        .unwrap();

    let first = h.engine.reconcile().await.unwrap();
    assert_eq!(first.updated, 4);
    assert_eq!(first.correct, 2);
    assert_eq!(first.incorrect, 2);

    let second = h.engine.reconcile().await.unwrap();
    assert_eq!(second.updated, 0);

    for p in h.store.predictions_for_game(game).await.unwrap() {
        let expected = match (p.prediction_type, p.user_id) {
            (PredictionType::Ensemble, _) | (PredictionType::Spread, _) => PredictionResult::Correct,
            (PredictionType::Total, _) => PredictionResult::Incorrect,
            (PredictionType::Winner, Some(42)) => PredictionResult::Incorrect,
            other => panic!("unexpected prediction {other:?}"),
        };
        assert_eq!(p.result, expected, "{:?}", p.prediction_type);
        assert!(p.settled_at.is_some());
    }

    let user = h.store.accuracy_stat(StatScope::User, "42").await.unwrap().unwrap();
    assert_eq!((user.total, user.correct), (1, 0));

    // Model picks only.
    let stats = h.engine.transparency_stats().await.unwrap();
    assert_eq!(stats.overall.total, 3);
    assert_eq!(stats.overall.correct, 2);
    assert_eq!(stats.recent.len(), 1);

    let trust = h.engine.trust_recommendations().await.unwrap();
    assert_eq!(trust.iter().map(|t| t.sample_size).sum::<usize>(), 3);
}

#[tokio::test]
async fn test_spread_and_winner_settlement_cases() {
    let h = Harness::in_memory(FakeSportsApi::new(week_five())).await;
    let now = Utc::now();
    h.store.upsert_game(&final_game("a", 24, 20, now), now).await.unwrap();
    h.store.upsert_game(&final_game("b", 17, 24, now), now).await.unwrap();
    let a = game_id(&h.store, "a").await;
    let b = game_id(&h.store, "b").await;

    let insert = |game_id, prediction_type| NewPrediction {
        game_id,
        user_id: None,
        prediction_type,
        pick: Pick::Home,
        confidence: 0.7,
    };
    let spread = h.store.insert_prediction(&insert(a, PredictionType::Spread), now).await.unwrap().unwrap();
    let winner = h.store.insert_prediction(&insert(b, PredictionType::Winner), now).await.unwrap().unwrap();

    h.engine.reconcile().await.unwrap();

    let spread = h.store.prediction(spread).await.unwrap().unwrap();
    assert_eq!(spread.result, PredictionResult::Correct);

    let winner = h.store.prediction(winner).await.unwrap().unwrap();
    assert_eq!(winner.result, PredictionResult::Incorrect);
    assert_eq!(winner.actual_side, Some(Pick::Away));
    assert_eq!(winner.margin, Some(7.0));
}
