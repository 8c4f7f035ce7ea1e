//! Error types for session operations

use crate::buffers::BufferHandle;
use crucible_backends::BackendError;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that can occur while driving a compute session
///
/// Every condition here is recoverable except `BackendUnavailable`, which
/// only occurs at session creation: without a device nothing can proceed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No compute device could be acquired at session creation
    #[error("compute backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Kernel source file could not be read
    #[error("kernel source unreadable: {0}")]
    Io(#[from] std::io::Error),

    /// Kernel source rejected by the device compiler
    #[error("kernel compilation failed: {diagnostic}")]
    CompileFailed { diagnostic: String },

    /// Pipeline construction rejected by the device
    #[error("pipeline build failed: {diagnostic}")]
    PipelineBuildFailed { diagnostic: String },

    /// Named entry point absent from the compiled library
    #[error("kernel function not found: {0}")]
    FunctionNotFound(String),

    /// Buffer handle out of range or already released
    #[error("invalid buffer handle: {0}")]
    InvalidHandle(BufferHandle),

    /// Device memory could not satisfy the allocation
    #[error("buffer allocation failed: requested {requested} bytes")]
    AllocationFailed { requested: usize },

    /// Dispatch or limits query attempted with no function selected
    #[error("no active compute pipeline")]
    NoActivePipeline,

    /// Shared-session handle not present in the registry
    #[error("unknown session handle: {0}")]
    UnknownSession(u64),

    /// Backend fault with no session-level meaning, surfaced verbatim
    #[error("backend fault: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) => SessionError::BackendUnavailable(reason),
            BackendError::Allocation { requested } => SessionError::AllocationFailed { requested },
            BackendError::Compile { diagnostic } => SessionError::CompileFailed { diagnostic },
            BackendError::PipelineBuild { diagnostic } => SessionError::PipelineBuildFailed { diagnostic },
            BackendError::FunctionNotFound(name) => SessionError::FunctionNotFound(name),
            // Raw backend handles never reach callers; one of these arriving
            // here means session bookkeeping and backend state disagree.
            other => SessionError::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        let err: SessionError = BackendError::compile("bad token").into();
        assert!(matches!(err, SessionError::CompileFailed { .. }));

        let err: SessionError = BackendError::Allocation { requested: 64 }.into();
        assert!(matches!(err, SessionError::AllocationFailed { requested: 64 }));

        let err: SessionError = BackendError::FunctionNotFound("adder".into()).into();
        assert!(matches!(err, SessionError::FunctionNotFound(name) if name == "adder"));

        let err: SessionError = BackendError::InvalidBuffer(9).into();
        assert!(matches!(err, SessionError::Backend(_)));
    }

    #[test]
    fn test_io_error_is_distinct_from_compile() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.metal");
        let err: SessionError = io.into();
        assert!(matches!(err, SessionError::Io(_)));
    }
}
