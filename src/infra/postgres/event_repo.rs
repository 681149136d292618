use {
    crate::domain::error::PipelineError,
    crate::domain::event::{EventStatus, NewWebhookEvent, WebhookEvent},
    chrono::{DateTime, Utc},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub external_event_id: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub payment_id: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for WebhookEvent {
    type Error = PipelineError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(WebhookEvent {
            status: EventStatus::try_from(row.status.as_str())?,
            id: row.id,
            external_event_id: row.external_event_id,
            event_type: row.event_type,
            raw_payload: row.raw_payload,
            attempts: row.attempts,
            payment_id: row.payment_id,
            processed_at: row.processed_at,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_event(row: Option<EventRow>) -> Result<Option<WebhookEvent>, PipelineError> {
    row.map(WebhookEvent::try_from).transpose()
}

/// Insert a new event in `processing`. Returns `None` on a duplicate
/// external_event_id; a concurrent inserter blocks here until the first
/// one commits or rolls back.
pub async fn insert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &NewWebhookEvent,
) -> Result<Option<WebhookEvent>, PipelineError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        INSERT INTO webhook_events (id, external_event_id, event_type, raw_payload, status, attempts)
        VALUES ($1, $2, $3, $4, 'processing', 1)
        ON CONFLICT (external_event_id) DO NOTHING
        RETURNING id, external_event_id, event_type, raw_payload, status, attempts,
                  payment_id, processed_at, error_message, created_at, updated_at
        "#,
    )
    .bind(event.id)
    .bind(event.external_event_id.as_str())
    .bind(&event.event_type)
    .bind(&event.raw_payload)
    .fetch_optional(&mut **tx)
    .await?;

    into_event(row)
}

pub async fn find_by_external_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    external_event_id: &str,
) -> Result<Option<WebhookEvent>, PipelineError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT id, external_event_id, event_type, raw_payload, status, attempts,
               payment_id, processed_at, error_message, created_at, updated_at
        FROM webhook_events
        WHERE external_event_id = $1
        "#,
    )
    .bind(external_event_id)
    .fetch_optional(&mut **tx)
    .await?;

    into_event(row)
}

/// Single conditional UPDATE so that of two concurrent retries only one
/// sees the row still `failed`.
pub async fn readmit_failed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    external_event_id: &str,
    max_attempts: i32,
) -> Result<Option<WebhookEvent>, PipelineError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        UPDATE webhook_events
        SET status = 'processing',
            attempts = attempts + 1,
            error_message = NULL,
            updated_at = now()
        WHERE external_event_id = $1
          AND status = 'failed'
          AND attempts < $2
        RETURNING id, external_event_id, event_type, raw_payload, status, attempts,
                  payment_id, processed_at, error_message, created_at, updated_at
        "#,
    )
    .bind(external_event_id)
    .bind(max_attempts)
    .fetch_optional(&mut **tx)
    .await?;

    into_event(row)
}

pub async fn mark_processed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempt: i32,
    payment_id: Uuid,
    processed_at: DateTime<Utc>,
) -> Result<Option<WebhookEvent>, PipelineError> {
    let row = sqlx::query_as::<_, EventRow>(
        r#"
        UPDATE webhook_events
        SET status = 'processed',
            payment_id = $3,
            processed_at = $4,
            error_message = NULL,
            updated_at = now()
        WHERE id = $1 AND attempts = $2 AND status = 'processing'
        RETURNING id, external_event_id, event_type, raw_payload, status, attempts,
                  payment_id, processed_at, error_message, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(attempt)
    .bind(payment_id)
    .bind(processed_at)
    .fetch_optional(&mut **tx)
    .await?;

    into_event(row)
}

pub async fn mark_failed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempt: i32,
    error_message: &str,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'failed', error_message = $3, updated_at = now()
        WHERE id = $1 AND attempts = $2 AND status = 'processing'
        "#,
    )
    .bind(id)
    .bind(attempt)
    .bind(error_message)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail events stuck in 'processing' since before `cutoff`.
/// Returns the number of reaped events.
pub async fn reap_stale(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cutoff: DateTime<Utc>,
    error_message: &str,
) -> Result<u64, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE webhook_events
        SET status = 'failed', error_message = $2, updated_at = now()
        WHERE status = 'processing' AND updated_at < $1
        "#,
    )
    .bind(cutoff)
    .bind(error_message)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}
