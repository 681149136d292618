//! In-process store for tests and local runs without PostgreSQL.
//!
//! A transaction holds one store-wide lock from `begin` until commit or
//! drop, and works on a private copy of the tables. That is stricter than
//! row-level locking (transactions are fully serialized) but gives the same
//! guarantees the pipeline relies on. Not for multi-process deployments.

use {
    crate::domain::{
        error::PipelineError,
        event::{EventStatus, NewWebhookEvent, WebhookEvent},
        id::{Email, ExternalEventId, ExternalPaymentId},
        payment::{NewPayment, Payment},
        store::{EventStore, PaymentLedger, Store, StoreTx, SubscriptionRepository, UserRepository},
        subscription::{NewSubscription, Subscription, SubscriptionStatus},
        user::{NewUser, User},
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    std::{collections::HashMap, sync::Arc, time::Duration},
    tokio::sync::{Mutex, OwnedMutexGuard},
    uuid::Uuid,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
struct Tables {
    events: HashMap<Uuid, WebhookEvent>,
    users: HashMap<Uuid, User>,
    payments: HashMap<Uuid, Payment>,
    subscriptions: HashMap<Uuid, Subscription>,
}

#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            lock_timeout,
        }
    }

    /// Committed events, oldest first.
    pub async fn events(&self) -> Vec<WebhookEvent> {
        let tables = self.tables.lock().await;
        let mut events: Vec<_> = tables.events.values().cloned().collect();
        events.sort_by_key(|e| e.id);
        events
    }

    pub async fn users(&self) -> Vec<User> {
        let tables = self.tables.lock().await;
        let mut users: Vec<_> = tables.users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub async fn payments(&self) -> Vec<Payment> {
        let tables = self.tables.lock().await;
        let mut payments: Vec<_> = tables.payments.values().cloned().collect();
        payments.sort_by_key(|p| p.id);
        payments
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let tables = self.tables.lock().await;
        let mut subscriptions: Vec<_> = tables.subscriptions.values().cloned().collect();
        subscriptions.sort_by_key(|s| s.id);
        subscriptions
    }
}

pub struct MemoryTx {
    committed: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, PipelineError> {
        let committed = tokio::time::timeout(self.lock_timeout, self.tables.clone().lock_owned())
            .await
            .map_err(|_| PipelineError::LockTimeout(self.lock_timeout))?;
        let working = committed.clone();
        Ok(MemoryTx { committed, working })
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self) -> Result<(), PipelineError> {
        let MemoryTx {
            mut committed,
            working,
        } = self;
        *committed = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), PipelineError> {
        Ok(())
    }
}

impl MemoryTx {
    fn event_by_external_id(&mut self, external_event_id: &str) -> Option<&mut WebhookEvent> {
        self.working
            .events
            .values_mut()
            .find(|e| e.external_event_id == external_event_id)
    }
}

#[async_trait]
impl EventStore for MemoryTx {
    async fn insert_event(
        &mut self,
        event: &NewWebhookEvent,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        if self
            .event_by_external_id(event.external_event_id.as_str())
            .is_some()
        {
            return Ok(None);
        }
        let now = Utc::now();
        let stored = WebhookEvent {
            id: event.id,
            external_event_id: event.external_event_id.as_str().to_string(),
            event_type: event.event_type.clone(),
            raw_payload: event.raw_payload.clone(),
            status: EventStatus::Processing,
            attempts: 1,
            payment_id: None,
            processed_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.working.events.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn find_event(
        &mut self,
        external_event_id: &ExternalEventId,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        Ok(self
            .event_by_external_id(external_event_id.as_str())
            .cloned())
    }

    async fn readmit_failed_event(
        &mut self,
        external_event_id: &ExternalEventId,
        max_attempts: i32,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        let Some(event) = self.event_by_external_id(external_event_id.as_str()) else {
            return Ok(None);
        };
        if event.status != EventStatus::Failed || event.attempts >= max_attempts {
            return Ok(None);
        }
        event.status = EventStatus::Processing;
        event.attempts += 1;
        event.error_message = None;
        event.updated_at = Utc::now();
        Ok(Some(event.clone()))
    }

    async fn mark_event_processed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        payment_id: Uuid,
        processed_at: DateTime<Utc>,
    ) -> Result<Option<WebhookEvent>, PipelineError> {
        match self.working.events.get_mut(&event_id) {
            Some(event)
                if event.status == EventStatus::Processing && event.attempts == attempt =>
            {
                event.status = EventStatus::Processed;
                event.payment_id = Some(payment_id);
                event.processed_at = Some(processed_at);
                event.error_message = None;
                event.updated_at = Utc::now();
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_event_failed(
        &mut self,
        event_id: Uuid,
        attempt: i32,
        error_message: &str,
    ) -> Result<bool, PipelineError> {
        match self.working.events.get_mut(&event_id) {
            Some(event)
                if event.status == EventStatus::Processing && event.attempts == attempt =>
            {
                event.status = EventStatus::Failed;
                event.error_message = Some(error_message.to_string());
                event.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reap_stale_events(
        &mut self,
        cutoff: DateTime<Utc>,
        error_message: &str,
    ) -> Result<u64, PipelineError> {
        let now = Utc::now();
        let mut reaped = 0;
        for event in self.working.events.values_mut() {
            if event.status == EventStatus::Processing && event.updated_at < cutoff {
                event.status = EventStatus::Failed;
                event.error_message = Some(error_message.to_string());
                event.updated_at = now;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

#[async_trait]
impl UserRepository for MemoryTx {
    async fn find_user_by_email(&mut self, email: &Email) -> Result<Option<User>, PipelineError> {
        Ok(self
            .working
            .users
            .values()
            .find(|u| u.email == email.as_str())
            .cloned())
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<Option<User>, PipelineError> {
        if self.find_user_by_email(&user.email).await?.is_some() {
            return Ok(None);
        }
        let stored = User {
            id: user.id,
            email: user.email.as_str().to_string(),
            external_user_id: user.external_user_id.clone(),
            created_at: Utc::now(),
        };
        self.working.users.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn lock_user(&mut self, user_id: Uuid) -> Result<(), PipelineError> {
        // The whole store is already held exclusively; only check existence.
        if self.working.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(PipelineError::Processing(format!(
                "cannot lock missing user {user_id}"
            )))
        }
    }
}

#[async_trait]
impl PaymentLedger for MemoryTx {
    async fn find_payment(
        &mut self,
        external_payment_id: &ExternalPaymentId,
    ) -> Result<Option<Payment>, PipelineError> {
        Ok(self
            .working
            .payments
            .values()
            .find(|p| p.external_payment_id == external_payment_id.as_str())
            .cloned())
    }

    async fn insert_payment(
        &mut self,
        payment: &NewPayment,
    ) -> Result<Option<Payment>, PipelineError> {
        if self
            .find_payment(payment.external_payment_id())
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let now = Utc::now();
        let stored = Payment {
            id: payment.id(),
            external_payment_id: payment.external_payment_id().as_str().to_string(),
            user_id: payment.user_id(),
            money: payment.money().clone(),
            status: payment.status(),
            payment_date: payment.payment_date(),
            subscription_id: None,
            metadata: payment.metadata().clone(),
            created_at: now,
            updated_at: now,
        };
        self.working.payments.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn link_payment_subscription(
        &mut self,
        payment_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Payment, PipelineError> {
        let payment = self
            .working
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| PipelineError::Processing(format!("payment {payment_id} not found")))?;
        payment.subscription_id = Some(subscription_id);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryTx {
    async fn find_active_subscription(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, PipelineError> {
        Ok(self
            .working
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .max_by_key(|s| s.end_date)
            .cloned())
    }

    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, PipelineError> {
        let clash = self
            .working
            .subscriptions
            .values()
            .any(|s| s.user_id == subscription.user_id && s.status == SubscriptionStatus::Active);
        if clash {
            return Err(PipelineError::Processing(format!(
                "user {} already has an active subscription",
                subscription.user_id
            )));
        }
        let now = Utc::now();
        let stored = Subscription {
            id: subscription.id,
            user_id: subscription.user_id,
            plan_id: subscription.plan_id.clone(),
            status: SubscriptionStatus::Active,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            auto_renew: subscription.auto_renew,
            created_at: now,
            updated_at: now,
        };
        self.working.subscriptions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn extend_subscription(
        &mut self,
        subscription_id: Uuid,
        new_end_date: DateTime<Utc>,
    ) -> Result<Subscription, PipelineError> {
        let subscription = self
            .working
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| {
                PipelineError::Processing(format!("subscription {subscription_id} not found"))
            })?;
        subscription.end_date = new_end_date;
        subscription.updated_at = Utc::now();
        Ok(subscription.clone())
    }

    async fn expire_lapsed_subscriptions(
        &mut self,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, PipelineError> {
        let mut expired = 0;
        for subscription in self.working.subscriptions.values_mut() {
            let in_scope = user_id.is_none_or(|id| id == subscription.user_id);
            if in_scope
                && subscription.status == SubscriptionStatus::Active
                && subscription.end_date <= now
            {
                subscription.status = SubscriptionStatus::Expired;
                subscription.updated_at = Utc::now();
                expired += 1;
            }
        }
        Ok(expired)
    }
}
