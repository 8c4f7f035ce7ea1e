//! Compute backend trait for kernel compilation and dispatch
//!
//! This trait is the seam between the session layer and the GPU runtime:
//! everything the session needs from a device is expressed here, so the
//! session itself never touches a driver API.

use std::ptr::NonNull;

use super::types::{GridExtent, GroupExtent, LibraryId, PipelineId, PipelineLimits, RawBufferId, SlotBinding};
use crate::error::Result;

/// Compute backend trait
///
/// Backends implement this trait to provide kernel compilation, buffer
/// storage, and compute dispatch on a concrete device.
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────────────┐
/// │                  ComputeBackend Trait                    │
/// │  - compile_library() / create_pipeline()                 │
/// │  - Buffer management (allocate/free/copy/pointer)        │
/// │  - dispatch() / synchronize()                            │
/// └─────────────────────┬───────────────────────────────────┘
///                       │
///              ┌────────┴────────┐
///              ▼                 ▼
///        ┌──────────┐      ┌──────────┐
///        │  Metal   │      │   Host   │
///        │ Backend  │      │ Backend  │
///        └──────────┘      └──────────┘
/// ```
///
/// # Ownership
///
/// The backend owns every device-side object it hands a handle out for.
/// Handles are never reused after release; a released handle reports an
/// invalid-handle error from then on.
///
/// # Usage
///
/// ```rust
/// use crucible_backends::{ComputeBackend, GridExtent, GroupExtent, HostBackend, SlotBinding};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = HostBackend::new();
///
/// let library = backend.compile_library("kernel void copy() {}")?;
/// let pipeline = backend.create_pipeline(library, "copy")?;
///
/// let buffer = backend.allocate_buffer(1024)?;
/// backend.dispatch(
///     pipeline,
///     GridExtent::linear(1024),
///     GroupExtent::linear(64),
///     &[SlotBinding::new(0, buffer)],
///     true,
/// )?;
///
/// backend.free_buffer(buffer)?;
/// # Ok(())
/// # }
/// ```
pub trait ComputeBackend: Send {
    /// Short name of the backend ("metal", "host", ...)
    fn name(&self) -> &'static str;

    // ============================================================================================
    // Kernel compilation
    // ============================================================================================

    /// Compile kernel source text into a library
    ///
    /// # Errors
    ///
    /// Returns `Compile` with the device compiler's diagnostic when the
    /// source is rejected.
    fn compile_library(&mut self, source: &str) -> Result<LibraryId>;

    /// Release a compiled library
    ///
    /// # Errors
    ///
    /// Returns an error if the library handle is invalid.
    fn release_library(&mut self, library: LibraryId) -> Result<()>;

    /// Resolve a named entry point in a library and build its pipeline
    ///
    /// # Errors
    ///
    /// Returns `FunctionNotFound` when the library has no such entry point,
    /// or `PipelineBuild` with the device diagnostic when construction fails.
    fn create_pipeline(&mut self, library: LibraryId, function: &str) -> Result<PipelineId>;

    /// Release a pipeline
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline handle is invalid.
    fn release_pipeline(&mut self, pipeline: PipelineId) -> Result<()>;

    /// Hardware limits reported by a live pipeline
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline handle is invalid.
    fn pipeline_limits(&self, pipeline: PipelineId) -> Result<PipelineLimits>;

    // ============================================================================================
    // Buffer management
    // ============================================================================================

    /// Allocate a host-visible device buffer of the given size in bytes
    ///
    /// # Errors
    ///
    /// Returns `Allocation` when the device cannot satisfy the request.
    fn allocate_buffer(&mut self, size: usize) -> Result<RawBufferId>;

    /// Free a previously allocated buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer handle is invalid.
    fn free_buffer(&mut self, buffer: RawBufferId) -> Result<()>;

    /// Get buffer size in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer handle is invalid.
    fn buffer_len(&self, buffer: RawBufferId) -> Result<usize>;

    /// Borrow a pointer into the host-visible memory backing a buffer
    ///
    /// The pointer stays valid exactly as long as the buffer is live;
    /// dereferencing it after `free_buffer` is a caller contract violation.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer handle is invalid.
    fn buffer_ptr(&self, buffer: RawBufferId) -> Result<NonNull<u8>>;

    /// Copy bytes from host memory into a buffer at a byte offset
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or the write would run past
    /// the end of the buffer.
    fn copy_to_buffer(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]) -> Result<()>;

    /// Copy bytes out of a buffer at a byte offset into host memory
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is invalid or the read would run past
    /// the end of the buffer.
    fn copy_from_buffer(&self, buffer: RawBufferId, offset: usize, data: &mut [u8]) -> Result<()>;

    // ============================================================================================
    // Dispatch
    // ============================================================================================

    /// Submit one unit of compute work
    ///
    /// Binds each buffer to its kernel argument slot, launches `grid`
    /// work-items shaped into `group`-sized thread groups, and blocks until
    /// completion only when `wait` is set. Without `wait` the call returns
    /// immediately; ordering is then the caller's responsibility via a later
    /// blocking dispatch or [`synchronize`](Self::synchronize).
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline or any bound buffer handle is
    /// invalid.
    fn dispatch(
        &mut self,
        pipeline: PipelineId,
        grid: GridExtent,
        group: GroupExtent,
        bindings: &[SlotBinding],
        wait: bool,
    ) -> Result<()>;

    /// Block until previously submitted work has completed
    fn synchronize(&mut self) -> Result<()>;

    // ============================================================================================
    // Type introspection
    // ============================================================================================

    /// Downcast backend to `&dyn Any` for type-specific access
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast backend to `&mut dyn Any` for type-specific access
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}
