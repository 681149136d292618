//! Pipeline properties against a real PostgreSQL. Set `TEST_DATABASE_URL`
//! to run; every test uses unique ids so they can share one database.

mod common;

use chrono::Utc;
use common::*;
use paysub_sync::domain::error::ErrorKind;
use paysub_sync::domain::event::AdmitOutcome;
use paysub_sync::domain::outcome::ProcessOutcome;
use paysub_sync::domain::store::{EventStore, Store, StoreTx};
use paysub_sync::infra::postgres::PgStore;
use paysub_sync::services::dedup::admit;
use paysub_sync::services::maintenance::{expire_lapsed_subscriptions, reap_stale_events};
use paysub_sync::services::webhook_pipeline::process_notification;
use std::time::Duration;
use uuid::Uuid;

fn store(pool: &sqlx::PgPool) -> PgStore {
    PgStore::new(pool.clone(), Duration::from_secs(5))
}

#[tokio::test]
async fn pg_idempotent_processing() {
    let Some(pool) = setup_pool().await else { return };
    let store = store(&pool);
    let evt = unique("evt");
    let pay = unique("pay");
    let email = format!("{}@example.com", unique("idem"));
    let n = make_notification(&evt, &pay, &email);

    let first = process_notification(&store, &n, MAX_ATTEMPTS).await.unwrap();
    assert!(matches!(first, ProcessOutcome::Success { payment_created: true, .. }));
    let second = process_notification(&store, &n, MAX_ATTEMPTS).await.unwrap();
    assert!(matches!(second, ProcessOutcome::AlreadyProcessed { .. }));

    assert_eq!(count_events(&pool, &evt).await, 1);
    assert_eq!(count_payments(&pool, &pay).await, 1);
    assert_eq!(count_users(&pool, &email).await, 1);
    assert_eq!(count_active_subscriptions(&pool, &email).await, 1);
    assert_eq!(event_status(&pool, &evt).await.0, "processed");
}

#[tokio::test]
async fn pg_payment_replay_keeps_subscription() {
    let Some(pool) = setup_pool().await else { return };
    let store = store(&pool);
    let pay = unique("pay");
    let email = format!("{}@example.com", unique("replay"));

    process_notification(&store, &make_notification(&unique("evt"), &pay, &email), MAX_ATTEMPTS)
        .await
        .unwrap();
    let end_before: chrono::DateTime<Utc> = sqlx::query_scalar(
        "SELECT s.end_date FROM subscriptions s JOIN users u ON u.id = s.user_id WHERE u.email = $1",
    )
    .bind(&email)
    .fetch_one(&pool)
    .await
    .unwrap();

    let outcome =
        process_notification(&store, &make_notification(&unique("evt"), &pay, &email), MAX_ATTEMPTS)
            .await
            .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Success { payment_created: false, .. }));

    let end_after: chrono::DateTime<Utc> = sqlx::query_scalar(
        "SELECT s.end_date FROM subscriptions s JOIN users u ON u.id = s.user_id WHERE u.email = $1",
    )
    .bind(&email)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(end_before, end_after);
    assert_eq!(count_payments(&pool, &pay).await, 1);
}

#[tokio::test]
async fn pg_failure_is_durable_and_rolled_back() {
    let Some(pool) = setup_pool().await else { return };
    let store = FaultyStore::new(store(&pool), 1, Fault::Permanent);
    let evt = unique("evt");
    let pay = unique("pay");
    let email = format!("{}@example.com", unique("fail"));

    let outcome = process_notification(&store, &make_notification(&evt, &pay, &email), MAX_ATTEMPTS)
        .await
        .unwrap();
    assert_eq!(outcome.kind(), Some(ErrorKind::PermanentProcessingFailure));

    let (status, attempts, error) = event_status(&pool, &evt).await;
    assert_eq!(status, "failed");
    assert_eq!(attempts, 1);
    assert!(error.is_some_and(|e| !e.is_empty()));
    assert_eq!(count_payments(&pool, &pay).await, 0);
    assert_eq!(count_users(&pool, &email).await, 0);

    // Redelivery retries and succeeds.
    let outcome = process_notification(&store, &make_notification(&evt, &pay, &email), MAX_ATTEMPTS)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Success { .. }), "got {outcome:?}");
    assert_eq!(event_status(&pool, &evt).await, ("processed".to_string(), 2, None));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pg_concurrent_duplicates_and_same_user_race() {
    let Some(pool) = setup_pool().await else { return };
    let store = store(&pool);

    let evt = unique("evt");
    let pay = unique("pay");
    let email = format!("{}@example.com", unique("cdup"));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let n = make_notification(&evt, &pay, &email);
        handles.push(tokio::spawn(async move {
            process_notification(&store, &n, MAX_ATTEMPTS).await.unwrap()
        }));
    }
    let mut succeeded = 0;
    for h in handles {
        if let ProcessOutcome::Success { .. } = h.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(count_payments(&pool, &pay).await, 1);

    let email = format!("{}@example.com", unique("race"));
    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        let n = make_notification(&unique("evt"), &unique("pay"), &email);
        handles.push(tokio::spawn(async move {
            process_notification(&store, &n, MAX_ATTEMPTS).await.unwrap()
        }));
    }
    for h in handles {
        let outcome = h.await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Success { .. }), "got {outcome:?}");
    }
    assert_eq!(count_users(&pool, &email).await, 1);
    assert_eq!(count_active_subscriptions(&pool, &email).await, 1);
}

// Rows are backdated so the sweeps only touch this test's data.

#[tokio::test]
async fn pg_reaper_and_expiry() {
    let Some(pool) = setup_pool().await else { return };
    let store = store(&pool);

    let evt = unique("evt");
    let n = make_notification(&evt, &unique("pay"), &format!("{}@example.com", unique("reap")));
    admit(&store, &n.new_event(), MAX_ATTEMPTS).await.unwrap();
    sqlx::query(
        "UPDATE webhook_events SET updated_at = now() - interval '2 hours' \
         WHERE external_event_id = $1",
    )
    .bind(&evt)
    .execute(&pool)
    .await
    .unwrap();

    let reaped = reap_stale_events(&store, Duration::from_secs(3600), Utc::now())
        .await
        .unwrap();
    assert!(reaped >= 1);
    assert_eq!(event_status(&pool, &evt).await.0, "failed");

    let outcome = process_notification(&store, &n, MAX_ATTEMPTS).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Success { .. }), "got {outcome:?}");

    let email = n.email.as_str().to_string();
    assert_eq!(count_active_subscriptions(&pool, &email).await, 1);
    sqlx::query(
        "UPDATE subscriptions SET end_date = now() - interval '1 day' \
         WHERE user_id = (SELECT id FROM users WHERE email = $1)",
    )
    .bind(&email)
    .execute(&pool)
    .await
    .unwrap();
    assert!(expire_lapsed_subscriptions(&store, Utc::now()).await.unwrap() >= 1);
    assert_eq!(count_active_subscriptions(&pool, &email).await, 0);
}

#[tokio::test]
async fn pg_stale_attempt_cannot_finish_readmitted_event() {
    let Some(pool) = setup_pool().await else { return };
    let store = store(&pool);
    let evt = unique("evt");
    let n = make_notification(&evt, &unique("pay"), &format!("{}@example.com", unique("stale")));

    let AdmitOutcome::Admitted(first) = admit(&store, &n.new_event(), MAX_ATTEMPTS).await.unwrap()
    else {
        panic!("first admit must win");
    };
    sqlx::query("UPDATE webhook_events SET status = 'failed' WHERE id = $1")
        .bind(first.id)
        .execute(&pool)
        .await
        .unwrap();
    let AdmitOutcome::Admitted(second) = admit(&store, &n.new_event(), MAX_ATTEMPTS).await.unwrap()
    else {
        panic!("failed event must be re-admitted");
    };
    assert_eq!(second.attempts, 2);

    let mut tx = store.begin().await.unwrap();
    let finished = tx
        .mark_event_processed(first.id, first.attempts, Uuid::now_v7(), Utc::now())
        .await
        .unwrap();
    assert!(finished.is_none());
    assert!(!tx.mark_event_failed(first.id, first.attempts, "late").await.unwrap());
    tx.commit().await.unwrap();

    assert_eq!(event_status(&pool, &evt).await, ("processing".to_string(), 2, None));
}
