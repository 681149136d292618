use {
    super::error::PipelineError,
    super::id::ExternalPaymentId,
    super::money::Money,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for PaymentStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "completed" => Ok(Self::Completed),
            other => Err(PipelineError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// Full payment record from the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub external_payment_id: String,
    pub user_id: Uuid,
    pub money: Money,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
    pub subscription_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Id of the webhook event whose processing created this payment.
    pub fn webhook_event_id(&self) -> Option<Uuid> {
        self.metadata
            .get("webhook_event_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

pub struct NewPaymentParams {
    pub external_payment_id: ExternalPaymentId,
    pub user_id: Uuid,
    pub money: Money,
    pub payment_date: DateTime<Utc>,
    pub webhook_event_id: Uuid,
    pub external_event_id: String,
    pub plan_id: String,
    pub original_payload: serde_json::Value,
}

/// For INSERT; id generated in Rust via Uuid::now_v7(). Always `completed`.
#[derive(Debug, Clone)]
pub struct NewPayment {
    id: Uuid,
    external_payment_id: ExternalPaymentId,
    user_id: Uuid,
    money: Money,
    status: PaymentStatus,
    payment_date: DateTime<Utc>,
    metadata: serde_json::Value,
}

impl NewPayment {
    pub fn new(params: NewPaymentParams) -> Self {
        let metadata = serde_json::json!({
            "webhook_event_id": params.webhook_event_id,
            "external_event_id": params.external_event_id,
            "plan_id": params.plan_id,
            "original_payload": params.original_payload,
        });
        Self {
            id: Uuid::now_v7(),
            external_payment_id: params.external_payment_id,
            user_id: params.user_id,
            money: params.money,
            status: PaymentStatus::Completed,
            payment_date: params.payment_date,
            metadata,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn external_payment_id(&self) -> &ExternalPaymentId {
        &self.external_payment_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn money(&self) -> &Money {
        &self.money
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn payment_date(&self) -> DateTime<Utc> {
        self.payment_date
    }

    pub fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }
}
