use {
    crate::domain::error::PipelineError,
    crate::domain::event::{AdmitOutcome, EventStatus, NewWebhookEvent},
    crate::domain::store::{EventStore, Store, StoreTx},
};

/// Deduplication gate. Commits on its own so the `processing` row is visible
/// to concurrent deliveries before any business work starts.
pub async fn admit<S: Store>(
    store: &S,
    event: &NewWebhookEvent,
    max_attempts: i32,
) -> Result<AdmitOutcome, PipelineError> {
    let mut tx = store.begin().await?;
    let outcome = admit_in(&mut tx, event, max_attempts).await?;
    tx.commit().await?;
    Ok(outcome)
}

async fn admit_in<T: EventStore>(
    tx: &mut T,
    event: &NewWebhookEvent,
    max_attempts: i32,
) -> Result<AdmitOutcome, PipelineError> {
    // Unique constraint decides the race: only one inserter gets a row back.
    if let Some(inserted) = tx.insert_event(event).await? {
        return Ok(AdmitOutcome::Admitted(inserted));
    }

    if let Some(readmitted) = tx
        .readmit_failed_event(&event.external_event_id, max_attempts)
        .await?
    {
        tracing::info!(
            external_event_id = %event.external_event_id,
            attempt = readmitted.attempts,
            "failed event re-admitted for retry"
        );
        return Ok(AdmitOutcome::Admitted(readmitted));
    }

    let prior = tx
        .find_event(&event.external_event_id)
        .await?
        .ok_or_else(|| {
            PipelineError::Processing(format!(
                "event {} conflicted on insert but cannot be found",
                event.external_event_id
            ))
        })?;

    // The holder may have committed `failed` between our readmit and find;
    // each statement sees a fresh snapshot, so one more readmit picks it up.
    if prior.status == EventStatus::Failed && prior.attempts < max_attempts {
        if let Some(readmitted) = tx
            .readmit_failed_event(&event.external_event_id, max_attempts)
            .await?
        {
            tracing::info!(
                external_event_id = %event.external_event_id,
                attempt = readmitted.attempts,
                "event failed concurrently, re-admitted for retry"
            );
            return Ok(AdmitOutcome::Admitted(readmitted));
        }
    }

    Ok(AdmitOutcome::Duplicate(prior))
}
