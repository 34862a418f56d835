use crate::model::{BookingStatus, ConflictReport, Ms};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unavailable: {0}")]
    Conflict(ConflictReport),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("only {remaining_ms}ms left before check-in, {required_ms}ms required")]
    LeadTime { remaining_ms: Ms, required_ms: Ms },
    #[error("invoice sequence allocation failed: {0}")]
    SequenceAllocation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("collaborator failed: {0}")]
    Collaborator(String),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// The conflict report, when the failure was an availability conflict.
    pub fn conflict_report(&self) -> Option<&ConflictReport> {
        match self {
            EngineError::Conflict(report) => Some(report),
            _ => None,
        }
    }
}
