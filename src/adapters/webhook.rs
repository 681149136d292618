use {
    super::signature::SIGNATURE_HEADER,
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{
            error::PipelineError,
            id::{Email, ExternalEventId, ExternalPaymentId},
            money::{Currency, Money, MoneyAmount},
            notification::{DEFAULT_PLAN_ID, PaymentNotification},
            outcome::ProcessOutcome,
            store::Store,
        },
        services::webhook_pipeline::process_notification,
    },
    axum::{body::Bytes, extract::State, http::HeaderMap},
    chrono::Utc,
    serde::Deserialize,
};

const MAX_EVENT_TYPE_LEN: usize = 255;

/// Wire shape of a payment notification. Field checks happen in
/// [`WebhookPayload::into_notification`], not during deserialization, so
/// every violation maps to the same error kind.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub id: String,
    #[serde(alias = "type")]
    pub event_type: String,
    pub external_payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub email: String,
    #[serde(default)]
    pub external_user_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

impl WebhookPayload {
    pub fn into_notification(
        self,
        raw_payload: serde_json::Value,
    ) -> Result<PaymentNotification, PipelineError> {
        let event_type = self.event_type.trim();
        if event_type.is_empty() || event_type.len() > MAX_EVENT_TYPE_LEN {
            return Err(PipelineError::Validation(format!(
                "event type must be 1..={MAX_EVENT_TYPE_LEN} bytes"
            )));
        }

        let money = Money::new(
            MoneyAmount::new(self.amount)?,
            Currency::parse(&self.currency)?,
        );

        let external_user_id = self
            .external_user_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let plan_id = self
            .plan_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PLAN_ID.to_string());

        Ok(PaymentNotification {
            external_event_id: ExternalEventId::new(self.id)?,
            external_payment_id: ExternalPaymentId::new(self.external_payment_id)?,
            event_type: event_type.to_string(),
            money,
            email: Email::parse(&self.email)?,
            external_user_id,
            plan_id,
            raw_payload,
        })
    }
}

pub fn parse_notification(body: &[u8]) -> Result<PaymentNotification, PipelineError> {
    let raw: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| PipelineError::Validation(format!("invalid JSON body: {e}")))?;
    let payload: WebhookPayload = serde_json::from_value(raw.clone())
        .map_err(|e| PipelineError::Validation(format!("invalid payload: {e}")))?;
    payload.into_notification(raw)
}

/// Verify, parse and hand off to the pipeline. Nothing is written before the
/// signature and payload checks pass.
#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(external_event_id = tracing::field::Empty, event_type = tracing::field::Empty)
)]
pub async fn webhook_handler<S: Store + Clone + 'static>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ProcessOutcome, ApiError> {
    let sig = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            PipelineError::WebhookSignature(format!("missing {SIGNATURE_HEADER} header"))
        })?;
    state.verifier.verify(&body, sig, Utc::now())?;

    let notification = parse_notification(&body)?;
    let span = tracing::Span::current();
    span.record(
        "external_event_id",
        tracing::field::display(&notification.external_event_id),
    );
    span.record("event_type", notification.event_type.as_str());
    tracing::info!("webhook received");

    Ok(process_notification(&state.store, &notification, state.max_attempts).await?)
}
