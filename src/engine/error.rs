use ulid::Ulid;

use crate::model::RequestStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Admission or input rules failed. User-correctable, expected control
    /// flow; carries a displayable reason and the blocking request ids.
    Refused {
        reason: String,
        blocking: Vec<Ulid>,
    },
    /// State-machine guard violated: the request is not in a state from
    /// which `action` is legal. Stale caller, not a bug in the engine.
    InvalidTransition {
        request: Ulid,
        from: RequestStatus,
        action: &'static str,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Missing rule / balance row / current period — a setup or migration
    /// bug. Surfaced to the caller and logged for operators.
    DataIntegrity(&'static str),
    LimitExceeded(&'static str),
    /// Store I/O failure; safe to retry the whole operation.
    JournalError(String),
}

impl EngineError {
    pub(crate) fn refused(reason: impl Into<String>, blocking: Vec<Ulid>) -> Self {
        EngineError::Refused {
            reason: reason.into(),
            blocking,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Refused { reason, blocking } => {
                if blocking.is_empty() {
                    write!(f, "refused: {reason}")
                } else {
                    write!(f, "refused: {reason} ({} blocking)", blocking.len())
                }
            }
            EngineError::InvalidTransition {
                request,
                from,
                action,
            } => write!(
                f,
                "invalid transition: {action} not legal from {from:?} on request {request}"
            ),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DataIntegrity(msg) => write!(f, "data integrity: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
