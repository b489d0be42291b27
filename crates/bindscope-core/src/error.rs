//! Error types for bindscope-core.

use thiserror::Error;

use crate::protocol::ResultKind;

/// Result type for bindscope-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bindscope-core.
///
/// Job-level failures (`Launch`, `Io`, `Deserialization`,
/// `UnexpectedResultKind`) never escape the engine: they are handed to the
/// owner of the failed work unit. Problems reported by the snippet itself are
/// not errors at all and travel inside a [`crate::SnippetResult`].
#[derive(Debug, Error)]
pub enum Error {
    /// The snippet process could not be started.
    #[error("launch failed: {0}")]
    Launch(String),

    /// IO error while talking to a snippet process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The snippet output did not parse as a result object.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The snippet produced a well-formed result of the wrong kind.
    #[error("unexpected result kind: expected {expected}, got {found}")]
    UnexpectedResultKind {
        expected: ResultKind,
        found: ResultKind,
    },

    /// Invalid or incomplete configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Module or module context not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid operation (e.g., activating an unknown context).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Recomputation was cancelled.
    #[error("execution aborted")]
    Aborted,
}

impl Error {
    /// Whether the failure leaves the owning node stale so that the next
    /// update retries it.
    pub fn is_job_failure(&self) -> bool {
        matches!(
            self,
            Error::Launch(_)
                | Error::Io(_)
                | Error::Deserialization(_)
                | Error::UnexpectedResultKind { .. }
        )
    }

    /// Render the error together with a recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Launch(_) => Some(
                "check the interpreter path (BINDSCOPE_JAVA, JAVA_HOME or PATH) and the support classpath (BINDSCOPE_SUPPORT_PATH)",
            ),
            Error::Deserialization(_) => {
                Some("the snippet must write exactly one result object to stdout")
            }
            Error::UnexpectedResultKind { .. } => {
                Some("the support library may not match this version of bindscope")
            }
            Error::Config(_) => Some("see `bindscope --help` for the configuration file lookup order"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
