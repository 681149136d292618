//! Storage ports. Every operation runs inside a transaction obtained from
//! [`Store::begin`]; nothing is visible to other transactions until
//! [`StoreTx::commit`]. Dropping a transaction without committing rolls it back.

use {
    super::error::PipelineError,
    super::event::{NewWebhookEvent, WebhookEvent},
    super::id::{Email, ExternalEventId, ExternalPaymentId},
    super::payment::{NewPayment, Payment},
    super::subscription::{NewSubscription, Subscription},
    super::user::{NewUser, User},
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[async_trait]
pub trait EventStore: Send {
    /// Insert a `processing` event. `None` if the external id already exists.
    async fn insert_event(
        &mut self,
        event: &NewWebhookEvent,
    ) -> Result<Option<WebhookEvent>, PipelineError>;

    async fn find_event(
        &mut self,
        external_event_id: &ExternalEventId,
    ) -> Result<Option<WebhookEvent>, PipelineError>;

    /// Atomically move a `failed` event with `attempts < max_attempts` back to
    /// `processing`, bumping `attempts`. `None` if the event is not eligible.
    async fn readmit_failed_event(
        &mut self,
        external_event_id: &ExternalEventId,
        max_attempts: i32,
    ) -> Result<Option<WebhookEvent>, PipelineError>;

    /// `processing → processed` for the given attempt. `None` if the event is
    /// no longer `processing` or has since been re-admitted under a newer attempt.
    async fn mark_event_processed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        payment_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<Option<WebhookEvent>, PipelineError>;

    /// `processing → failed` for the given attempt. Returns whether a row changed.
    async fn mark_event_failed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        error_message: &str,
    ) -> Result<bool, PipelineError>;

    /// Fail every `processing` event not touched since `cutoff`.
    async fn reap_stale_events(
        &mut self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64, PipelineError>;
}

#[async_trait]
pub trait UserRepository: Send {
    async fn find_user_by_email(&mut self, email: &Email) -> Result<Option<User>, PipelineError>;

    /// `None` if a user with this email already exists.
    async fn insert_user(&mut self, user: &NewUser) -> Result<Option<User>, PipelineError>;

    /// Exclusive row lock on the user, held until the transaction ends.
    async fn lock_user(&mut self, user_id: Uuid) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait PaymentLedger: Send {
    async fn find_payment(
        &mut self,
        external_payment_id: &ExternalPaymentId,
    ) -> Result<Option<Payment>, PipelineError>;

    /// `None` if a payment with this external id already exists.
    async fn insert_payment(&mut self, payment: &NewPayment)
    -> Result<Option<Payment>, PipelineError>;

    async fn link_payment_subscription(
        &mut self,
        payment_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Payment, PipelineError>;
}

#[async_trait]
pub trait SubscriptionRepository: Send {
    /// The user's `active` subscription with `end_date > now`, locked exclusively.
    async fn find_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError>;

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, PipelineError>;

    async fn extend_subscription(
        &mut self,
        subscription_id: Uuid,
        new_end_date: DateTime<Utc>,
    ) -> Result<Subscription, PipelineError>;

    /// Mark `active` subscriptions with `end_date <= now` as `expired`,
    /// for one user or for everyone.
    async fn expire_lapsed_subscriptions(
        &mut self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, PipelineError>;
}

#[async_trait]
pub trait StoreTx: EventStore + UserRepository + PaymentLedger + SubscriptionRepository {
    async fn commit(self) -> Result<(), PipelineError>;

    async fn rollback(self) -> Result<(), PipelineError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, PipelineError>;
}
