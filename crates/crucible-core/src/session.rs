//! Compute session: the composition root
//!
//! A `Session` owns exactly one backend handle, one pipeline compiler and
//! one buffer registry, and drives the dispatch engine. Lifecycle:
//!
//! ```text
//! Uninitialized ──new──▶ Ready(no pipeline) ◀──compile──┐
//!                              │                        │
//!                        select_function          (recompile)
//!                              ▼                        │
//!                        Ready(pipeline active) ────────┘
//! ```
//!
//! `dispatch` is only legal with an active pipeline. Destruction releases
//! everything in reverse acquisition order (pipeline, library, buffers,
//! then the backend handle) so no object outlives what it depends on.

use std::path::Path;
use std::ptr::NonNull;

use crucible_backends::{ComputeBackend, GridExtent, PipelineLimits};

#[cfg(target_vendor = "apple")]
use crucible_backends::MetalBackend;

use crate::buffers::{BufferHandle, BufferRegistry};
use crate::compiler::PipelineCompiler;
use crate::dispatch::{self, DispatchRequest, SizingPolicy};
use crate::error::Result;

/// A single GPU compute session
pub struct Session {
    compiler: PipelineCompiler,
    buffers: BufferRegistry,
    policy: SizingPolicy,
    backend: Box<dyn ComputeBackend>,
}

impl Session {
    /// Open a session on the system GPU
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` when no device can be acquired. This is
    /// the one unrecoverable condition: no further operation can proceed
    /// without a device.
    pub fn new() -> Result<Self> {
        #[cfg(target_vendor = "apple")]
        {
            let backend = MetalBackend::new()?;
            Ok(Self::with_backend(Box::new(backend)))
        }
        #[cfg(not(target_vendor = "apple"))]
        {
            Err(crate::error::SessionError::BackendUnavailable(
                "no GPU backend on this platform; open the session with an explicit backend".into(),
            ))
        }
    }

    /// Open a session on an explicit backend
    pub fn with_backend(backend: Box<dyn ComputeBackend>) -> Self {
        tracing::info!(backend = backend.name(), "compute session opened");
        Self {
            compiler: PipelineCompiler::default(),
            buffers: BufferRegistry::default(),
            policy: SizingPolicy::default(),
            backend,
        }
    }

    /// Open a session on an explicit backend with a sizing policy
    pub fn with_backend_and_policy(backend: Box<dyn ComputeBackend>, policy: SizingPolicy) -> Self {
        let mut session = Self::with_backend(backend);
        session.policy = policy;
        session
    }

    /// Name of the backend driving this session
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The sizing policy dispatches use
    pub fn sizing_policy(&self) -> SizingPolicy {
        self.policy
    }

    /// Change the sizing policy for subsequent dispatches
    pub fn set_sizing_policy(&mut self, policy: SizingPolicy) {
        self.policy = policy;
    }

    // ============================================================================================
    // Kernel lifecycle
    // ============================================================================================

    /// Compile kernel source text
    ///
    /// Supersedes any previously compiled library and invalidates the
    /// active function: dispatching again requires a fresh
    /// [`select_function`](Self::select_function).
    ///
    /// # Errors
    ///
    /// Returns `CompileFailed` carrying the device compiler's diagnostic.
    pub fn compile_source(&mut self, source: &str) -> Result<()> {
        self.compiler.compile(self.backend.as_mut(), source)
    }

    /// Read a kernel source file fully into memory, then compile it
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read, distinct from
    /// `CompileFailed`, which means the device rejected the source.
    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), bytes = source.len(), "kernel source loaded");
        self.compile_source(&source)
    }

    /// Select the kernel entry point for subsequent dispatches
    ///
    /// Atomic with respect to the previous selection: on failure the
    /// session has *no* active function and dispatch reports
    /// `NoActivePipeline` until a selection succeeds.
    ///
    /// # Errors
    ///
    /// Returns `FunctionNotFound` when the entry point does not exist in
    /// the current library (or no library is compiled), `PipelineBuildFailed`
    /// when the device rejects the pipeline.
    pub fn select_function(&mut self, name: &str) -> Result<()> {
        self.compiler.select_function(self.backend.as_mut(), name)
    }

    /// Hardware limits of the active pipeline
    ///
    /// # Errors
    ///
    /// Returns `NoActivePipeline` when no function is selected.
    pub fn limits(&self) -> Result<PipelineLimits> {
        self.compiler.limits()
    }

    /// Max threads per group of the active pipeline, `None` without one
    pub fn max_threads_per_group(&self) -> Option<u32> {
        self.compiler.limits().ok().map(|l| l.max_threads_per_group)
    }

    /// Execution width of the active pipeline, `None` without one
    pub fn execution_width(&self) -> Option<u32> {
        self.compiler.limits().ok().map(|l| l.execution_width)
    }

    /// Name of the active function, if any
    pub fn active_function(&self) -> Option<&str> {
        self.compiler.function_name()
    }

    // ============================================================================================
    // Buffers
    // ============================================================================================

    /// Allocate a host-visible device buffer of `size` bytes
    ///
    /// Handles are dense integers assigned in creation order, stable for
    /// the session's lifetime.
    pub fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.buffers.allocate(self.backend.as_mut(), size)
    }

    /// Release a buffer
    ///
    /// The handle is dead afterwards; releasing it again is an error.
    pub fn release_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers.release(self.backend.as_mut(), handle)
    }

    /// Byte size a buffer was created with
    pub fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.buffers.size(handle)
    }

    /// Borrow a pointer into the host-visible memory backing a buffer
    ///
    /// No bounds information is attached; the caller is responsible for
    /// staying within the byte size the buffer was created with.
    ///
    /// # Safety of use
    ///
    /// The pointer is valid exactly as long as the buffer is live.
    /// Dereferencing it after [`release_buffer`](Self::release_buffer) (or
    /// after the session is dropped) is undefined behavior; this is a caller
    /// contract, not a library-internal concern. Prefer
    /// [`write_buffer`](Self::write_buffer) /
    /// [`read_buffer`](Self::read_buffer) where a copy is acceptable.
    pub fn buffer_ptr(&self, handle: BufferHandle) -> Result<NonNull<u8>> {
        let raw = self.buffers.raw(handle)?;
        Ok(self.backend.buffer_ptr(raw)?)
    }

    /// Copy bytes into a buffer at a byte offset
    pub fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let raw = self.buffers.raw(handle)?;
        self.backend.copy_to_buffer(raw, offset, data)?;
        Ok(())
    }

    /// Copy bytes out of a buffer at a byte offset
    pub fn read_buffer(&self, handle: BufferHandle, offset: usize, data: &mut [u8]) -> Result<()> {
        let raw = self.buffers.raw(handle)?;
        self.backend.copy_from_buffer(raw, offset, data)?;
        Ok(())
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        self.buffers.live()
    }

    // ============================================================================================
    // Dispatch
    // ============================================================================================

    /// Submit one unit of compute work
    ///
    /// Resolves the request's bindings, computes the thread-group shape
    /// from the active pipeline's limits, and submits. Blocks until
    /// completion only when the request asks for it; otherwise ordering is
    /// the caller's responsibility via a later synchronous dispatch or
    /// [`synchronize`](Self::synchronize).
    ///
    /// # Errors
    ///
    /// Returns `NoActivePipeline` when no function is selected, or
    /// `InvalidHandle` when a bound (non-sentinel) buffer is absent.
    pub fn dispatch(&mut self, request: &DispatchRequest) -> Result<()> {
        dispatch::execute(self.backend.as_mut(), &self.compiler, &self.buffers, self.policy, request)
    }

    /// Block until previously submitted work has completed
    pub fn synchronize(&mut self) -> Result<()> {
        self.backend.synchronize()?;
        Ok(())
    }

    // ============================================================================================
    // Introspection
    // ============================================================================================

    /// Downcast the backend for backend-specific inspection
    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    /// Downcast the backend mutably
    pub fn backend_mut(&mut self) -> &mut dyn ComputeBackend {
        self.backend.as_mut()
    }

    /// Convenience: dispatch `items` work-items with slot-ordered bindings
    ///
    /// `None` entries leave their slot unbound, mirroring the request
    /// sentinel.
    pub fn run(&mut self, items: u32, buffers: &[Option<BufferHandle>]) -> Result<()> {
        let request = DispatchRequest {
            global: GridExtent::linear(items),
            buffers: buffers.to_vec(),
            wait: true,
        };
        self.dispatch(&request)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Reverse acquisition order: pipeline, library, buffers. The
        // backend handle itself goes down with the struct afterwards.
        self.compiler.release_all(self.backend.as_mut());
        self.buffers.release_all(self.backend.as_mut());
        tracing::info!(backend = self.backend.name(), "compute session closed");
    }
}
