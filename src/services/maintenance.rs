use {
    crate::domain::error::PipelineError,
    crate::domain::store::{EventStore, Store, StoreTx, SubscriptionRepository},
    chrono::{DateTime, Utc},
    std::time::Duration,
    tokio::sync::watch,
};

pub const STALE_EVENT_MESSAGE: &str = "processing timed out";

/// Fail events stuck in `processing` since before `now - stale_after`, so the
/// next delivery re-admits them. Returns the number of reaped events.
pub async fn reap_stale_events<S: Store>(
    store: &S,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<u64, PipelineError> {
    let stale_after = chrono::Duration::from_std(stale_after)
        .map_err(|e| PipelineError::Processing(format!("invalid stale threshold: {e}")))?;
    let mut tx = store.begin().await?;
    let reaped = tx
        .reap_stale_events(now - stale_after, STALE_EVENT_MESSAGE)
        .await?;
    tx.commit().await?;
    Ok(reaped)
}

/// Flip `active` subscriptions whose end date has passed to `expired`.
pub async fn expire_lapsed_subscriptions<S: Store>(
    store: &S,
    now: DateTime<Utc>,
) -> Result<u64, PipelineError> {
    let mut tx = store.begin().await?;
    let expired = tx.expire_lapsed_subscriptions(None, now).await?;
    tx.commit().await?;
    Ok(expired)
}

/// Periodically reap stale `processing` events.
pub async fn run_reaper<S: Store>(
    store: S,
    interval: Duration,
    stale_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("stale event reaper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("stale event reaper shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match reap_stale_events(&store, stale_after, Utc::now()).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(count = n, "reaped stale processing events"),
            Err(e) => tracing::error!(error = %e, "reaper error"),
        }
    }
}

/// Periodically expire lapsed subscriptions.
pub async fn run_expiry_sweep<S: Store>(
    store: S,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("subscription expiry sweep started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("subscription expiry sweep shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match expire_lapsed_subscriptions(&store, Utc::now()).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "expired lapsed subscriptions"),
            Err(e) => tracing::error!(error = %e, "expiry sweep error"),
        }
    }
}
