use crate::domain::{
    error::{ErrorKind, PipelineError},
    outcome::ProcessOutcome,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Newtype so the domain error can be returned straight from axum handlers.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None | Some(ErrorKind::DuplicateCompleted) => StatusCode::OK,
        Some(ErrorKind::DuplicateInFlight) => StatusCode::ACCEPTED,
        Some(ErrorKind::MalformedInput) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::Unauthenticated) => StatusCode::UNAUTHORIZED,
        Some(ErrorKind::TransientStoreFailure) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorKind::PermanentProcessingFailure) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        match kind {
            ErrorKind::MalformedInput | ErrorKind::Unauthenticated => {
                tracing::warn!(error = %self.0, "webhook rejected");
                ProcessOutcome::Rejected {
                    kind,
                    reason: self.0.to_string(),
                }
                .into_response()
            }
            _ => {
                tracing::error!(error = %self.0, error_kind = %kind, "webhook not recorded");
                let body = serde_json::json!({
                    "status": "error",
                    "error_code": kind.as_str(),
                    "message": "internal error",
                });
                (status_for(Some(kind)), Json(body)).into_response()
            }
        }
    }
}

impl IntoResponse for ProcessOutcome {
    fn into_response(self) -> Response {
        let status = status_for(self.kind());
        let body = match &self {
            Self::Success {
                event_id,
                payment_id,
                payment_created,
                ..
            } => serde_json::json!({
                "status": self.status_label(),
                "event_id": event_id,
                "payment_id": payment_id,
                "payment_created": payment_created,
            }),
            Self::AlreadyProcessed {
                event_id,
                payment_id,
            } => serde_json::json!({
                "status": self.status_label(),
                "message": "already processed",
                "event_id": event_id,
                "payment_id": payment_id,
            }),
            Self::InFlight { event_id } => serde_json::json!({
                "status": self.status_label(),
                "message": "already processing",
                "event_id": event_id,
            }),
            Self::Rejected { kind, reason } => serde_json::json!({
                "status": self.status_label(),
                "error_code": kind.as_str(),
                "message": reason,
            }),
            // Error text stays in the event row and the logs.
            Self::Failed { event_id, kind, .. } => serde_json::json!({
                "status": self.status_label(),
                "error_code": kind.as_str(),
                "event_id": event_id,
            }),
        };
        (status, Json(body)).into_response()
    }
}
