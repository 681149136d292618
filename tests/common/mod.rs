#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paysub_sync::domain::error::PipelineError;
use paysub_sync::domain::event::{NewWebhookEvent, WebhookEvent};
use paysub_sync::domain::id::{Email, ExternalEventId, ExternalPaymentId};
use paysub_sync::domain::money::{Currency, Money, MoneyAmount};
use paysub_sync::domain::notification::PaymentNotification;
use paysub_sync::domain::payment::{NewPayment, Payment};
use paysub_sync::domain::store::{
    EventStore, PaymentLedger, Store, StoreTx, SubscriptionRepository, UserRepository,
};
use paysub_sync::domain::subscription::{NewSubscription, Subscription};
use paysub_sync::domain::user::{NewUser, User};
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

pub const MAX_ATTEMPTS: i32 = 5;

/// Build a notification with sensible defaults.
pub fn make_notification(event_id: &str, payment_id: &str, email: &str) -> PaymentNotification {
    PaymentNotification {
        external_event_id: ExternalEventId::new(event_id).unwrap(),
        external_payment_id: ExternalPaymentId::new(payment_id).unwrap(),
        event_type: "payment.succeeded".to_string(),
        money: Money::new(MoneyAmount::new(1999).unwrap(), Currency::parse("usd").unwrap()),
        email: Email::parse(email).unwrap(),
        external_user_id: None,
        plan_id: "pro".to_string(),
        raw_payload: serde_json::json!({
            "id": event_id,
            "external_payment_id": payment_id,
            "email": email,
        }),
    }
}

/// Unique suffix so tests sharing one database never collide.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

// ── Fault injection ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Transient,
    Permanent,
}

impl Fault {
    fn error(self) -> PipelineError {
        match self {
            Self::Transient => PipelineError::LockTimeout(std::time::Duration::from_millis(1)),
            Self::Permanent => PipelineError::Processing("injected failure".into()),
        }
    }
}

/// Wraps a store and fails the final `mark_event_processed` of the next
/// `failures` business transactions, after all other writes have happened.
#[derive(Clone)]
pub struct FaultyStore<S> {
    inner: S,
    remaining: Arc<AtomicUsize>,
    fault: Fault,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S, failures: usize, fault: Fault) -> Self {
        Self {
            inner,
            remaining: Arc::new(AtomicUsize::new(failures)),
            fault,
        }
    }
}

pub struct FaultyTx<T> {
    inner: T,
    remaining: Arc<AtomicUsize>,
    fault: Fault,
}

#[async_trait]
impl<S: Store> Store for FaultyStore<S> {
    type Tx = FaultyTx<S::Tx>;

    async fn begin(&self) -> Result<Self::Tx, PipelineError> {
        Ok(FaultyTx {
            inner: self.inner.begin().await?,
            remaining: self.remaining.clone(),
            fault: self.fault,
        })
    }
}

#[async_trait]
impl<T: StoreTx> StoreTx for FaultyTx<T> {
    async fn commit(self) -> Result<(), PipelineError> {
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<(), PipelineError> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl<T: StoreTx> EventStore for FaultyTx<T> {
    async fn insert_event(
        &mut self,
        event: &NewWebhookEvent,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        self.inner.insert_event(event).await
    }

    async fn find_event(
        &mut self,
        external_event_id: &ExternalEventId,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        self.inner.find_event(external_event_id).await
    }

    async fn readmit_failed_event(
        &mut self,
        external_event_id: &ExternalEventId,
        max_attempts: i32,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        self.inner
            .readmit_failed_event(external_event_id, max_attempts)
            .await
    }

    async fn mark_event_processed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        payment_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        let fail = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(self.fault.error());
        }
        self.inner
            .mark_event_processed(event_id, attempt, payment_id, processed_at)
            .await
    }

    async fn mark_event_failed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        error_message: &str,
    ) -> Result<bool, PipelineError> {
        self.inner
            .mark_event_failed(event_id, attempt, error_message)
            .await
    }

    async fn reap_stale_events(
        &mut self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64, PipelineError> {
        self.inner.reap_stale_events(cutoff, error_message).await
    }
}

#[async_trait]
impl<T: StoreTx> UserRepository for FaultyTx<T> {
    async fn find_user_by_email(&mut self, email: &Email) -> Result<Option<User>, PipelineError> {
        self.inner.find_user_by_email(email).await
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<Option<User>, PipelineError> {
        self.inner.insert_user(user).await
    }

    async fn lock_user(&mut self, user_id: Uuid) -> Result<(), PipelineError> {
        self.inner.lock_user(user_id).await
    }
}

#[async_trait]
impl<T: StoreTx> PaymentLedger for FaultyTx<T> {
    async fn find_payment(
        &mut self,
        external_payment_id: &ExternalPaymentId,
    ) -> Result<Option<Payment>, PipelineError> {
        self.inner.find_payment(external_payment_id).await
    }

    async fn insert_payment(
        &mut self,
        payment: &NewPayment,
    ) -> Result<Option<Payment>, PipelineError> {
        self.inner.insert_payment(payment).await
    }

    async fn link_payment_subscription(
        &mut self,
        payment_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Payment, PipelineError> {
        self.inner
            .link_payment_subscription(payment_id, subscription_id)
            .await
    }
}

#[async_trait]
impl<T: StoreTx> SubscriptionRepository for FaultyTx<T> {
    async fn find_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        self.inner.find_active_subscription(user_id, now).await
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, PipelineError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn extend_subscription(
        &mut self,
        subscription_id: Uuid,
        new_end_date: DateTime<Utc>,
    ) -> Result<Subscription, PipelineError> {
        self.inner
            .extend_subscription(subscription_id, new_end_date)
            .await
    }

    async fn expire_lapsed_subscriptions(
        &mut self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, PipelineError> {
        self.inner.expire_lapsed_subscriptions(user_id, now).await
    }
}

// ── PostgreSQL ─────────────────────────────────────────────────────────────

/// Connects to `TEST_DATABASE_URL` and runs migrations. `None` (and the
/// calling test returns early) when the variable is not set.
pub async fn setup_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping postgres test");
        return None;
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .expect("failed to connect to test db");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    Some(pool)
}

pub async fn count_events(pool: &PgPool, external_event_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM webhook_events WHERE external_event_id = $1")
        .bind(external_event_id)
        .fetch_one(pool)
        .await
        .expect("count failed")
}

pub async fn count_payments(pool: &PgPool, external_payment_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments WHERE external_payment_id = $1")
        .bind(external_payment_id)
        .fetch_one(pool)
        .await
        .expect("count failed")
}

pub async fn count_users(pool: &PgPool, email: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("count failed")
}

pub async fn count_active_subscriptions(pool: &PgPool, email: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM subscriptions s JOIN users u ON u.id = s.user_id \
         WHERE u.email = $1 AND s.status = 'active'",
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .expect("count failed")
}

pub async fn event_status(pool: &PgPool, external_event_id: &str) -> (String, i32, Option<String>) {
    sqlx::query_as::<_, (String, i32, Option<String>)>(
        "SELECT status, attempts, error_message FROM webhook_events WHERE external_event_id = $1",
    )
    .bind(external_event_id)
    .fetch_one(pool)
    .await
    .expect("query failed")
}
