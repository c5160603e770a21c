use thiserror::Error;

/// Canonical spool error taxonomy used across crates.
///
/// Classification guidance:
/// - [`SpoolError::Logical`]: API misuse detected at runtime (programmer bug)
/// - [`SpoolError::Execution`]: failures raised while a pipeline executes
/// - [`SpoolError::Cancelled`]: execution stopped by user request or timeout
/// - [`SpoolError::InvalidConfig`]: configuration/environment contract violations
/// - [`SpoolError::Io`]: raw OS failures from std APIs (thread spawn, ...)
#[derive(Debug, Error)]
pub enum SpoolError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - `num_threads = 0`
    /// - unparsable `SPOOL_*` environment values
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Protocol violations by the caller.
    ///
    /// Examples:
    /// - pushing after the pipeline finished without a cancellation
    /// - building a pushing executor from a pipeline whose input is connected
    /// - pushing a record batch whose schema does not match the header
    #[error("logical error: {0}")]
    Logical(String),

    /// Failures raised by processors while the pipeline runs.
    ///
    /// Examples:
    /// - a transform or sink returning an error
    /// - a processor panicking on the worker thread
    /// - arrow conversion failures
    #[error("execution error: {0}")]
    Execution(String),

    /// The run was cancelled by the user or stopped by a timeout.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpoolError {
    /// `true` for [`SpoolError::Cancelled`], so callers can tell "cancelled"
    /// apart from "failed".
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SpoolError::Cancelled(_))
    }
}

/// Standard spool result alias.
pub type Result<T> = std::result::Result<T, SpoolError>;
