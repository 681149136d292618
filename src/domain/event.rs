use {
    super::error::PipelineError,
    super::id::ExternalEventId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Processing,
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// `processing → {processed, failed}`. A failed event goes back to
    /// `processing` only when it is re-admitted for another attempt.
    pub fn can_transition_to(&self, next: &EventStatus) -> bool {
        matches!(
            (self, next),
            (Self::Processing, Self::Processed)
                | (Self::Processing, Self::Failed)
                | (Self::Failed, Self::Processing)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EventStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown event status: {other}"
            ))),
        }
    }
}

/// Stored inbound notification.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub external_event_id: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    pub status: EventStatus,
    pub attempts: i32,
    pub payment_id: Option<Uuid>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// For INSERT; id generated in Rust via Uuid::now_v7().
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub id: Uuid,
    pub external_event_id: ExternalEventId,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
}

impl NewWebhookEvent {
    pub fn new(
        external_event_id: ExternalEventId,
        event_type: impl Into<String>,
        raw_payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            external_event_id,
            event_type: event_type.into(),
            raw_payload,
        }
    }
}

/// Result of running a notification through the deduplication gate.
#[derive(Debug)]
pub enum AdmitOutcome {
    /// This caller now holds the event in `processing` and must finish it.
    Admitted(WebhookEvent),
    /// Someone already handled or is handling it; carries the stored record.
    Duplicate(WebhookEvent),
}
