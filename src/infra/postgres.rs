pub mod event_repo;
pub mod payment_repo;
pub mod subscription_repo;
pub mod user_repo;

use {
    crate::domain::{
        error::PipelineError,
        event::{NewWebhookEvent, WebhookEvent},
        id::{Email, ExternalEventId, ExternalPaymentId},
        payment::{NewPayment, Payment},
        store::{EventStore, PaymentLedger, Store, StoreTx, SubscriptionRepository, UserRepository},
        subscription::{NewSubscription, Subscription},
        user::{NewUser, User},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Postgres, Transaction},
    std::time::Duration,
    uuid::Uuid,
};

/// PostgreSQL-backed store. Every transaction runs with a `lock_timeout`
/// so a blocked row lock surfaces as a transient failure instead of hanging.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, PipelineError> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL doesn't take bind parameters; set_config(.., true) is the same thing.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(PgTx { tx })
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self) -> Result<(), PipelineError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), PipelineError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgTx {
    async fn insert_event(
        &mut self,
        event: &NewWebhookEvent,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        event_repo::insert(&mut self.tx, event).await
    }

    async fn find_event(
        &mut self,
        external_event_id: &ExternalEventId,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        event_repo::find_by_external_id(&mut self.tx, external_event_id.as_str()).await
    }

    async fn readmit_failed_event(
        &mut self,
        external_event_id: &ExternalEventId,
        max_attempts: i32,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        event_repo::readmit_failed(&mut self.tx, external_event_id.as_str(), max_attempts).await
    }

    async fn mark_event_processed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        payment_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        event_repo::mark_processed(&mut self.tx, event_id, attempt, payment_id, processed_at)
            .await
    }

    async fn mark_event_failed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        error_message: &str,
    ) -> Result<bool, PipelineError> {
        event_repo::mark_failed(&mut self.tx, event_id, attempt, error_message).await
    }

    async fn reap_stale_events(
        &mut self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64, PipelineError> {
        event_repo::reap_stale(&mut self.tx, cutoff, error_message).await
    }
}

#[async_trait]
impl UserRepository for PgTx {
    async fn find_user_by_email(&mut self, email: &Email) -> Result<Option<User>, PipelineError> {
        user_repo::find_by_email(&mut self.tx, email.as_str()).await
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<Option<User>, PipelineError> {
        user_repo::insert(&mut self.tx, user).await
    }

    async fn lock_user(&mut self, user_id: Uuid) -> Result<(), PipelineError> {
        user_repo::lock(&mut self.tx, user_id).await
    }
}

#[async_trait]
impl PaymentLedger for PgTx {
    async fn find_payment(
        &mut self,
        external_payment_id: &ExternalPaymentId,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::find_by_external_id(&mut self.tx, external_payment_id.as_str()).await
    }

    async fn insert_payment(
        &mut self,
        payment: &NewPayment,
    ) -> Result<Option<Payment>, PipelineError> {
        payment_repo::insert(&mut self.tx, payment).await
    }

    async fn link_payment_subscription(
        &mut self,
        payment_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Payment, PipelineError> {
        payment_repo::link_subscription(&mut self.tx, payment_id, subscription_id).await
    }
}

#[async_trait]
impl SubscriptionRepository for PgTx {
    async fn find_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        subscription_repo::find_active_for_update(&mut self.tx, user_id, now).await
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, PipelineError> {
        subscription_repo::insert(&mut self.tx, subscription).await
    }

    async fn extend_subscription(
        &mut self,
        subscription_id: Uuid,
        new_end_date: DateTime<Utc>,
    ) -> Result<Subscription, PipelineError> {
        subscription_repo::extend(&mut self.tx, subscription_id, new_end_date).await
    }

    async fn expire_lapsed_subscriptions(
        &mut self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, PipelineError> {
        subscription_repo::expire_lapsed(&mut self.tx, user_id, now).await
    }
}
