use {
    super::dedup::admit,
    super::ledger::{resolve_payment, resolve_user},
    super::subscription::activate_or_renew,
    crate::domain::error::{ErrorKind, PipelineError},
    crate::domain::event::{AdmitOutcome, EventStatus, WebhookEvent},
    crate::domain::notification::PaymentNotification,
    crate::domain::outcome::ProcessOutcome,
    crate::domain::payment::{NewPayment, NewPaymentParams, Payment},
    crate::domain::store::{EventStore, Store, StoreTx},
    crate::domain::subscription::Subscription,
    crate::domain::user::User,
    chrono::{DateTime, Utc},
};

/// Everything the business transaction produced, handed back explicitly
/// once it has committed.
#[derive(Debug)]
pub struct AppliedEvent {
    pub event: WebhookEvent,
    pub user: User,
    pub payment: Payment,
    pub payment_created: bool,
    pub subscription: Option<Subscription>,
}

/// Run one notification through dedup and, if admitted, the atomic
/// user → payment → subscription transition.
///
/// `Err` is returned only when nothing durable could be recorded (the gate
/// itself failed, or recording the failure failed). Business failures come
/// back as `Ok(ProcessOutcome::Failed)` with the event marked `failed`.
#[tracing::instrument(
    name = "process_notification",
    skip_all,
    fields(
        external_event_id = %notification.external_event_id,
        external_payment_id = %notification.external_payment_id,
    )
)]
pub async fn process_notification<S: Store>(
    store: &S,
    notification: &PaymentNotification,
    max_attempts: i32,
) -> Result<ProcessOutcome, PipelineError> {
    let event = match admit(store, &notification.new_event(), max_attempts).await? {
        AdmitOutcome::Admitted(event) => event,
        AdmitOutcome::Duplicate(prior) => return Ok(duplicate_outcome(prior, max_attempts)),
    };

    match apply(store, &event, notification, Utc::now()).await {
        Ok(applied) => {
            tracing::info!(
                event_id = %applied.event.id,
                payment_id = %applied.payment.id,
                user_id = %applied.user.id,
                subscription_id = ?applied.subscription.as_ref().map(|s| s.id),
                payment_created = applied.payment_created,
                "webhook processed"
            );
            Ok(ProcessOutcome::Success {
                event_id: applied.event.id,
                payment_id: applied.payment.id,
                user_id: applied.user.id,
                subscription_id: applied.payment.subscription_id,
                payment_created: applied.payment_created,
            })
        }
        Err(err) => record_failure(store, &event, err).await,
    }
}

fn duplicate_outcome(prior: WebhookEvent, max_attempts: i32) -> ProcessOutcome {
    match prior.status {
        EventStatus::Processed => {
            tracing::warn!(event_id = %prior.id, "duplicate event, already processed");
            ProcessOutcome::AlreadyProcessed {
                event_id: prior.id,
                payment_id: prior.payment_id,
            }
        }
        EventStatus::Processing => {
            tracing::warn!(event_id = %prior.id, "duplicate event, still in flight");
            ProcessOutcome::InFlight { event_id: prior.id }
        }
        // Lost a readmit race to another delivery; budget remains.
        EventStatus::Failed if prior.attempts < max_attempts => {
            tracing::warn!(
                event_id = %prior.id,
                attempt = prior.attempts,
                "duplicate event failed concurrently, retry later"
            );
            ProcessOutcome::Failed {
                event_id: prior.id,
                kind: ErrorKind::TransientStoreFailure,
                reason: format!(
                    "event failed on attempt {}, retry later",
                    prior.attempts
                ),
            }
        }
        EventStatus::Failed => {
            let reason = format!(
                "giving up after {} attempts: {}",
                prior.attempts,
                prior.error_message.as_deref().unwrap_or("unknown error")
            );
            tracing::error!(event_id = %prior.id, %reason, "event permanently failed");
            ProcessOutcome::Failed {
                event_id: prior.id,
                kind: ErrorKind::PermanentProcessingFailure,
                reason,
            }
        }
    }
}

async fn apply<S: Store>(
    store: &S,
    event: &WebhookEvent,
    notification: &PaymentNotification,
    now: DateTime<Utc>,
) -> Result<AppliedEvent, PipelineError> {
    let mut tx = store.begin().await?;

    match apply_in(&mut tx, event, notification, now).await {
        Ok(applied) => {
            tx.commit().await?;
            Ok(applied)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(event_id = %event.id, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn apply_in<T: StoreTx>(
    tx: &mut T,
    event: &WebhookEvent,
    notification: &PaymentNotification,
    now: DateTime<Utc>,
) -> Result<AppliedEvent, PipelineError> {
    let user = resolve_user(
        tx,
        &notification.email,
        notification.external_user_id.as_deref(),
    )
    .await?;

    let new_payment = NewPayment::new(NewPaymentParams {
        external_payment_id: notification.external_payment_id.clone(),
        user_id: user.id,
        money: notification.money.clone(),
        payment_date: now,
        webhook_event_id: event.id,
        external_event_id: event.external_event_id.clone(),
        plan_id: notification.plan_id.clone(),
        original_payload: notification.raw_payload.clone(),
    });
    let (payment, payment_created) = resolve_payment(tx, &new_payment).await?;

    // A replayed payment must not extend the subscription a second time.
    let (payment, subscription) = if payment_created {
        let (subscription, payment) =
            activate_or_renew(tx, &payment, &notification.plan_id, now).await?;
        (payment, Some(subscription))
    } else {
        (payment, None)
    };

    let event = tx
        .mark_event_processed(event.id, event.attempts, payment.id, now)
        .await?
        .ok_or_else(|| {
            PipelineError::Processing(format!(
                "event {} attempt {} no longer owns the event",
                event.id, event.attempts
            ))
        })?;

    Ok(AppliedEvent {
        event,
        user,
        payment,
        payment_created,
        subscription,
    })
}

/// Persist `failed` in a fresh transaction, outside the rolled-back one.
async fn record_failure<S: Store>(
    store: &S,
    event: &WebhookEvent,
    err: PipelineError,
) -> Result<ProcessOutcome, PipelineError> {
    let kind = match err.kind() {
        ErrorKind::TransientStoreFailure => ErrorKind::TransientStoreFailure,
        _ => ErrorKind::PermanentProcessingFailure,
    };
    let reason = err.to_string();

    if let Err(record_err) = mark_failed(store, event, &reason).await {
        tracing::error!(
            event_id = %event.id,
            external_event_id = %event.external_event_id,
            error = %err,
            record_error = %record_err,
            "processing failed and failure could not be recorded; event left for the reaper"
        );
        return Err(err);
    }

    match kind {
        ErrorKind::TransientStoreFailure => tracing::warn!(
            event_id = %event.id,
            attempt = event.attempts,
            error = %reason,
            "processing failed on a transient store error, event marked failed"
        ),
        _ => tracing::error!(
            event_id = %event.id,
            external_event_id = %event.external_event_id,
            event_type = %event.event_type,
            attempt = event.attempts,
            payload = %event.raw_payload,
            error = %reason,
            "processing failed, event marked failed"
        ),
    }

    Ok(ProcessOutcome::Failed {
        event_id: event.id,
        kind,
        reason,
    })
}

async fn mark_failed<S: Store>(
    store: &S,
    event: &WebhookEvent,
    reason: &str,
) -> Result<(), PipelineError> {
    let mut tx = store.begin().await?;
    let changed = tx
        .mark_event_failed(event.id, event.attempts, reason)
        .await?;
    tx.commit().await?;
    if !changed {
        tracing::warn!(event_id = %event.id, "event was no longer processing when marking failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn failed_event(attempts: i32) -> WebhookEvent {
        let now = Utc::now();
        WebhookEvent {
            id: Uuid::now_v7(),
            external_event_id: "evt_dup".to_string(),
            event_type: "payment.succeeded".to_string(),
            raw_payload: serde_json::json!({}),
            status: EventStatus::Failed,
            attempts,
            payment_id: None,
            processed_at: None,
            error_message: Some("lock timeout".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn failed_duplicate_with_budget_left_is_transient() {
        match duplicate_outcome(failed_event(1), 5) {
            ProcessOutcome::Failed { kind, reason, .. } => {
                assert_eq!(kind, ErrorKind::TransientStoreFailure);
                assert!(!reason.contains("giving up"), "{reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn failed_duplicate_with_budget_spent_is_permanent() {
        match duplicate_outcome(failed_event(5), 5) {
            ProcessOutcome::Failed { kind, reason, .. } => {
                assert_eq!(kind, ErrorKind::PermanentProcessingFailure);
                assert!(reason.starts_with("giving up after 5 attempts"), "{reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
