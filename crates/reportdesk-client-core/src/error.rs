use thiserror::Error;

use crate::auth::AuthInputError;

/// Every failure the client core can surface to a caller.
///
/// All kinds are recoverable: the caller shows them as a dismissable
/// notification and the user may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("request timed out after {timeout_ms}ms")]
    NetworkTimeout { timeout_ms: u64 },
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("your plan does not include app access")]
    AccessBlocked,
    #[error("no session token; sign in first")]
    MissingToken,
    #[error("missing required file sets: {}", .0.join(", "))]
    MissingRequiredSets(Vec<String>),
    #[error("no active job")]
    NoActiveJob,
    #[error("no file selected for upload")]
    MissingFile,
    #[error("a submit for this job is already in flight")]
    SubmitInFlight,
    #[error("verification succeeded but the server returned no session token")]
    VerifyMissingSessionToken,
    #[error("invalid input: {0}")]
    InvalidInput(#[from] AuthInputError),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Builds an HTTP error, falling back to `HTTP <status>` when the server
    /// supplied no usable message.
    pub fn http(status: u16, message: Option<String>) -> Self {
        let message = message
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("HTTP {status}"));
        Self::Http { status, message }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short stable code used in structured logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NetworkTimeout { .. } => "timeout",
            Self::NetworkFailure(_) => "network",
            Self::Http { .. } => "http",
            Self::Rejected(_) => "rejected",
            Self::AccessBlocked => "access_blocked",
            Self::MissingToken => "missing_token",
            Self::MissingRequiredSets(_) => "missing_required_sets",
            Self::NoActiveJob => "no_active_job",
            Self::MissingFile => "missing_file",
            Self::SubmitInFlight => "submit_in_flight",
            Self::VerifyMissingSessionToken => "verify_missing_session_token",
            Self::InvalidInput(_) => "invalid_input",
            Self::Decode(_) => "decode",
        }
    }
}
