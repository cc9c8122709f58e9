//! Error types for audit-node

use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Admission denied: {0}")]
    AdmissionDenied(String),

    #[error("Contract has expired.")]
    ContractExpired,

    #[error("Challenge already answered")]
    ChallengeAlreadyAnswered,

    #[error("Proof corrupted")]
    VerifierCorrupted,

    #[error("Verifier exhausted: no challenges remain for this contract")]
    VerifierExhausted,

    #[error("Invalid proof")]
    InvalidProof,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NodeError {
    /// HTTP status for this error when it reaches a farmer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            NodeError::NotFound(_) => StatusCode::NOT_FOUND,
            NodeError::InvalidParameter(_) | NodeError::Json(_) => StatusCode::BAD_REQUEST,
            NodeError::AdmissionDenied(_) => StatusCode::FORBIDDEN,
            NodeError::ContractExpired
            | NodeError::ChallengeAlreadyAnswered
            | NodeError::VerifierExhausted => StatusCode::CONFLICT,
            NodeError::VerifierCorrupted | NodeError::InvalidProof => StatusCode::BAD_REQUEST,
            NodeError::Internal(_)
            | NodeError::Database(_)
            | NodeError::Pool(_)
            | NodeError::Io(_)
            | NodeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a farmer. Storage failures are not echoed.
    pub fn client_message(&self) -> String {
        match self {
            NodeError::NotFound(msg)
            | NodeError::InvalidParameter(msg)
            | NodeError::AdmissionDenied(msg) => msg.clone(),
            NodeError::Json(_) => "Malformed JSON body.".to_string(),
            NodeError::Internal(_)
            | NodeError::Database(_)
            | NodeError::Pool(_)
            | NodeError::Io(_)
            | NodeError::Config(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Failures reported by a [`crate::verifier::Verifier`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    /// The per-contract state can produce no further challenges.
    #[error("verifier state exhausted")]
    Exhausted,

    /// A proof or state could not be decoded.
    #[error("verifier input corrupted: {0}")]
    Corrupted(String),
}

impl From<VerifierError> for NodeError {
    fn from(e: VerifierError) -> Self {
        match e {
            VerifierError::Exhausted => NodeError::VerifierExhausted,
            VerifierError::Corrupted(_) => NodeError::VerifierCorrupted,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_hides_storage_details() {
        let err = NodeError::Internal("disk on fire at /var/lib/node".into());
        assert_eq!(err.client_message(), "Internal error");
        assert!(err.is_internal());
    }

    #[test]
    fn test_json_error_is_a_client_error_without_parser_detail() {
        let err: NodeError = serde_json::from_str::<serde_json::Value>("{\"proof\": ")
            .unwrap_err()
            .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.client_message(), "Malformed JSON body.");
        assert!(!err.is_internal());
    }

    #[test]
    fn test_expired_message_matches_wire_text() {
        assert_eq!(NodeError::ContractExpired.client_message(), "Contract has expired.");
        assert_eq!(NodeError::ContractExpired.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_verifier_error_mapping() {
        assert!(matches!(NodeError::from(VerifierError::Exhausted), NodeError::VerifierExhausted));
        assert!(matches!(
            NodeError::from(VerifierError::Corrupted("bad".into())),
            NodeError::VerifierCorrupted
        ));
    }
}
