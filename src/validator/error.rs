use ulid::Ulid;

use crate::model::ValidationReport;
use crate::repo::RepoError;

/// System failures. Rule violations are not errors: they travel inside a
/// [`ValidationReport`], and only become `Rejected` when a write is refused.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidInput(String),
    Rejected(Box<ValidationReport>),
    LimitExceeded(&'static str),
    Repository(RepoError),
    JournalError(String),
}

impl EngineError {
    /// Short stable label, used on the wire and as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Rejected(_) => "rejected",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Repository(_) => "repository",
            EngineError::JournalError(_) => "journal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Rejected(report) => {
                write!(f, "appointment rejected: {}", report.errors.join("; "))
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Repository(e) => write!(f, "{e}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Repository(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(e: RepoError) -> Self {
        EngineError::Repository(e)
    }
}
