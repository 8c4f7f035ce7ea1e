//! Error types for compute backend operations

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while driving a compute backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No usable device could be acquired. The one unrecoverable condition:
    /// nothing else can proceed without a device.
    #[error("compute device unavailable: {0}")]
    Unavailable(String),

    /// Device memory allocation failed
    #[error("device allocation failed: requested {requested} bytes")]
    Allocation { requested: usize },

    /// Kernel source rejected by the backend compiler
    #[error("kernel compilation failed: {diagnostic}")]
    Compile { diagnostic: String },

    /// Pipeline construction rejected by the backend
    #[error("pipeline build failed: {diagnostic}")]
    PipelineBuild { diagnostic: String },

    /// Named entry point absent from the compiled library
    #[error("kernel function not found: {0}")]
    FunctionNotFound(String),

    /// Invalid buffer handle
    #[error("invalid device buffer handle: {0}")]
    InvalidBuffer(u64),

    /// Invalid library handle
    #[error("invalid library handle: {0}")]
    InvalidLibrary(u64),

    /// Invalid pipeline handle
    #[error("invalid pipeline handle: {0}")]
    InvalidPipeline(u64),

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: offset {offset} + len {len} > buffer size {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    /// Operation not supported by this backend
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Create a compile error from a backend diagnostic
    pub fn compile(diagnostic: impl Into<String>) -> Self {
        Self::Compile {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a pipeline build error from a backend diagnostic
    pub fn pipeline_build(diagnostic: impl Into<String>) -> Self {
        Self::PipelineBuild {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}
