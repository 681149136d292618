use {super::error::ErrorKind, uuid::Uuid};

/// What the pipeline reports back to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Processed now. `payment_created` is false when the payment already
    /// existed and this event only confirmed it.
    Success {
        event_id: Uuid,
        payment_id: Uuid,
        user_id: Uuid,
        subscription_id: Option<Uuid>,
        payment_created: bool,
    },
    /// Duplicate delivery of a completed event.
    AlreadyProcessed {
        event_id: Uuid,
        payment_id: Option<Uuid>,
    },
    /// Duplicate delivery of an event some other worker is processing.
    InFlight { event_id: Uuid },
    /// Refused before anything was written.
    Rejected { kind: ErrorKind, reason: String },
    /// Business transaction failed; the event is durably marked `failed`.
    Failed {
        event_id: Uuid,
        kind: ErrorKind,
        reason: String,
    },
}

impl ProcessOutcome {
    /// `None` for a fresh success, otherwise the classification the caller acts on.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::AlreadyProcessed { .. } => Some(ErrorKind::DuplicateCompleted),
            Self::InFlight { .. } => Some(ErrorKind::DuplicateInFlight),
            Self::Rejected { kind, .. } | Self::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::AlreadyProcessed { .. } => "duplicate",
            Self::InFlight { .. } => "processing",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}
