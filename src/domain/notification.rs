use {
    super::event::NewWebhookEvent,
    super::id::{Email, ExternalEventId, ExternalPaymentId},
    super::money::Money,
};

pub const DEFAULT_PLAN_ID: &str = "default";

/// A schema-checked, signature-verified payment notification. This is the
/// only input the processing pipeline accepts.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    pub external_event_id: ExternalEventId,
    pub external_payment_id: ExternalPaymentId,
    pub event_type: String,
    pub money: Money,
    pub email: Email,
    pub external_user_id: Option<String>,
    pub plan_id: String,
    pub raw_payload: serde_json::Value,
}

impl PaymentNotification {
    pub fn new_event(&self) -> NewWebhookEvent {
        NewWebhookEvent::new(
            self.external_event_id.clone(),
            self.event_type.clone(),
            self.raw_payload.clone(),
        )
    }
}
