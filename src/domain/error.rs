use {std::fmt, std::time::Duration, thiserror::Error};

/// Caller-facing classification of everything that is not a plain success.
/// The transport layer decides on status codes from this, never from messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedInput,
    Unauthenticated,
    DuplicateInFlight,
    DuplicateCompleted,
    /// Retryable: connection loss, lock-wait timeout, serialization failure.
    TransientStoreFailure,
    /// Not retryable; always logged with full context.
    PermanentProcessingFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedInput => "malformed_input",
            Self::Unauthenticated => "unauthenticated",
            Self::DuplicateInFlight => "duplicate_in_flight",
            Self::DuplicateCompleted => "duplicate_completed",
            Self::TransientStoreFailure => "transient_store_failure",
            Self::PermanentProcessingFailure => "permanent_processing_failure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DuplicateInFlight | Self::TransientStoreFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),

    #[error("lock wait timed out after {0:?}")]
    LockTimeout(Duration),

    #[error("processing: {0}")]
    Processing(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::MalformedInput,
            Self::WebhookSignature(_) => ErrorKind::Unauthenticated,
            Self::LockTimeout(_) => ErrorKind::TransientStoreFailure,
            Self::Database(err) if is_transient(err) => ErrorKind::TransientStoreFailure,
            Self::Database(_) | Self::Serialization(_) | Self::Processing(_) => {
                ErrorKind::PermanentProcessingFailure
            }
        }
    }
}

/// SQLSTATEs worth letting the sender's redelivery absorb.
const TRANSIENT_SQLSTATES: &[&str] = &[
    "55P03", // lock_not_available (lock_timeout)
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "57014", // query_canceled (statement_timeout)
    "57P01", // admin_shutdown
    "53300", // too_many_connections
];

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
        _ => false,
    }
}
