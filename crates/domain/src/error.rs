use serde::{Deserialize, Serialize};

/// Shared error type used across all Paseo crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pairing offer: {0}")]
    InvalidOffer(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("ambiguous identifier '{identifier}'")]
    AmbiguousIdentifier {
        identifier: String,
        /// Up to five short ids of matching agents.
        candidates: Vec<String>,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("not a git repository: {0}")]
    NotGitRepo(String),

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("merge conflict: {message}")]
    MergeConflict {
        message: String,
        conflicts: Vec<String>,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wire error codes. Every [`Error`] variant maps onto exactly one code;
/// clients switch on the code, never the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidOffer,
    InvalidIdentifier,
    AmbiguousIdentifier,
    BadRequest,
    AgentNotFound,
    DuplicateRequestId,
    NotGitRepo,
    NotAllowed,
    MergeConflict,
    Timeout,
    ProviderError,
    Config,
    Cancelled,
    Internal,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidOffer(_) => ErrorCode::InvalidOffer,
            Error::InvalidIdentifier(_) => ErrorCode::InvalidIdentifier,
            Error::AmbiguousIdentifier { .. } => ErrorCode::AmbiguousIdentifier,
            Error::BadRequest(_) => ErrorCode::BadRequest,
            Error::AgentNotFound(_) => ErrorCode::AgentNotFound,
            Error::DuplicateRequestId(_) => ErrorCode::DuplicateRequestId,
            Error::NotGitRepo(_) => ErrorCode::NotGitRepo,
            Error::NotAllowed(_) => ErrorCode::NotAllowed,
            Error::MergeConflict { .. } => ErrorCode::MergeConflict,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Provider { .. } => ErrorCode::ProviderError,
            Error::Config(_) => ErrorCode::Config,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Serializable error payload carried in `error_response` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    /// Candidate short ids for `ambiguous_identifier` errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
}

impl From<&Error> for WireError {
    fn from(e: &Error) -> Self {
        let candidates = match e {
            Error::AmbiguousIdentifier { candidates, .. } => candidates.clone(),
            _ => Vec::new(),
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            candidates,
        }
    }
}

/// Checkout/worktree error taxonomy, propagated verbatim to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutErrorCode {
    NotGitRepo,
    NotAllowed,
    MergeConflict,
    Unknown,
}

/// Structured checkout failure payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutError {
    pub code: CheckoutErrorCode,
    pub message: String,
    /// Conflicted paths for `MERGE_CONFLICT`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
}

impl From<&Error> for CheckoutError {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotGitRepo(m) => Self {
                code: CheckoutErrorCode::NotGitRepo,
                message: m.clone(),
                conflicts: Vec::new(),
            },
            Error::NotAllowed(m) => Self {
                code: CheckoutErrorCode::NotAllowed,
                message: m.clone(),
                conflicts: Vec::new(),
            },
            Error::MergeConflict { message, conflicts } => Self {
                code: CheckoutErrorCode::MergeConflict,
                message: message.clone(),
                conflicts: conflicts.clone(),
            },
            other => Self {
                code: CheckoutErrorCode::Unknown,
                message: other.to_string(),
                conflicts: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorCode::AmbiguousIdentifier).unwrap();
        assert_eq!(json, "\"ambiguous_identifier\"");
        let json = serde_json::to_string(&ErrorCode::DuplicateRequestId).unwrap();
        assert_eq!(json, "\"duplicate_request_id\"");
    }

    #[test]
    fn checkout_codes_serialize_screaming() {
        let json = serde_json::to_string(&CheckoutErrorCode::NotAllowed).unwrap();
        assert_eq!(json, "\"NOT_ALLOWED\"");
        let json = serde_json::to_string(&CheckoutErrorCode::MergeConflict).unwrap();
        assert_eq!(json, "\"MERGE_CONFLICT\"");
    }

    #[test]
    fn wire_error_carries_candidates() {
        let err = Error::AmbiguousIdentifier {
            identifier: "ab12".into(),
            candidates: vec!["ab12cdef".into(), "ab12efff".into()],
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.code, ErrorCode::AmbiguousIdentifier);
        assert_eq!(wire.candidates.len(), 2);
    }

    #[test]
    fn merge_conflict_maps_to_checkout_error() {
        let err = Error::MergeConflict {
            message: "2 files conflict".into(),
            conflicts: vec!["src/a.rs".into(), "src/b.rs".into()],
        };
        let ce = CheckoutError::from(&err);
        assert_eq!(ce.code, CheckoutErrorCode::MergeConflict);
        assert_eq!(ce.conflicts.len(), 2);
    }

    #[test]
    fn unknown_fallback() {
        let ce = CheckoutError::from(&Error::Internal("boom".into()));
        assert_eq!(ce.code, CheckoutErrorCode::Unknown);
    }
}
