use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::compliance::ComplianceError;
use crate::workflows::verification::VerificationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Caller-facing error tag attached to every failed engine operation.
///
/// All kinds are recoverable by the caller; none of them signal corrupted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StageMismatch,
    CaseClosed,
    InsufficientEvidence,
    StaleState,
    InsufficientAmount,
    InvalidReason,
    NotFound,
    FeedbackRequired,
    InvalidTransition,
    SlotUnavailable,
    InvalidDefinition,
    InvoiceOutstanding,
    NothingOutstanding,
    Unavailable,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::StageMismatch => "stage_mismatch",
            Self::CaseClosed => "case_closed",
            Self::InsufficientEvidence => "insufficient_evidence",
            Self::StaleState => "stale_state",
            Self::InsufficientAmount => "insufficient_amount",
            Self::InvalidReason => "invalid_reason",
            Self::NotFound => "not_found",
            Self::FeedbackRequired => "feedback_required",
            Self::InvalidTransition => "invalid_transition",
            Self::SlotUnavailable => "slot_unavailable",
            Self::InvalidDefinition => "invalid_definition",
            Self::InvoiceOutstanding => "invoice_outstanding",
            Self::NothingOutstanding => "nothing_outstanding",
            Self::Unavailable => "unavailable",
        }
    }

    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::StaleState
            | Self::InvoiceOutstanding
            | Self::CaseClosed
            | Self::InvalidTransition
            | Self::NothingOutstanding => StatusCode::CONFLICT,
            Self::StageMismatch
            | Self::InsufficientEvidence
            | Self::InsufficientAmount
            | Self::InvalidReason
            | Self::FeedbackRequired
            | Self::SlotUnavailable
            | Self::InvalidDefinition => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Render an engine failure as the JSON body the UI uses to pick its error state.
pub fn error_response(kind: ErrorKind, message: impl fmt::Display) -> Response {
    let body = Json(json!({
        "error": message.to_string(),
        "kind": kind.label(),
    }));
    (kind.status_code(), body).into_response()
}

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Verification(VerificationError),
    Compliance(ComplianceError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Verification(err) => write!(f, "verification error: {}", err),
            AppError::Compliance(err) => write!(f, "compliance error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Verification(err) => Some(err),
            AppError::Compliance(err) => Some(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = match &self {
            AppError::Verification(err) => err.kind(),
            AppError::Compliance(err) => err.kind(),
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => {
                let body = Json(json!({ "error": self.to_string() }));
                return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
            }
        };

        error_response(kind, &self)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<VerificationError> for AppError {
    fn from(value: VerificationError) -> Self {
        Self::Verification(value)
    }
}

impl From<ComplianceError> for AppError {
    fn from(value: ComplianceError) -> Self {
        Self::Compliance(value)
    }
}
