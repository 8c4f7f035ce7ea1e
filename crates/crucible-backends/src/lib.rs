//! Compute backends for crucible kernel dispatch
//!
//! This crate provides:
//! - **ComputeBackend Trait**: the seam between the session layer and the
//!   GPU runtime (compilation, buffers, dispatch)
//! - **Metal Backend**: Apple GPU implementation over shared storage
//! - **Host Backend**: host-memory reference implementation, always
//!   available
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   crucible Session                       │
//! │        (compile → select → bind → dispatch)              │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                 ComputeBackend Trait                     │
//! │  (libraries, pipelines, buffers, dispatch, waiting)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!              ┌────────┴────────┐
//!              ▼                 ▼
//!        ┌──────────┐      ┌──────────┐
//!        │  Metal   │      │   Host   │
//!        └──────────┘      └──────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use crucible_backends::{ComputeBackend, GridExtent, GroupExtent, HostBackend, SlotBinding};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = HostBackend::new();
//!
//! let library = backend.compile_library("kernel void fill() {}")?;
//! let pipeline = backend.create_pipeline(library, "fill")?;
//!
//! let buffer = backend.allocate_buffer(256)?;
//! backend.copy_to_buffer(buffer, 0, &[7u8; 4])?;
//!
//! backend.dispatch(
//!     pipeline,
//!     GridExtent::linear(64),
//!     GroupExtent::linear(64),
//!     &[SlotBinding::new(0, buffer)],
//!     true,
//! )?;
//!
//! backend.free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod error;

// Re-export public API
pub use backend::{ComputeBackend, GridExtent, GroupExtent, LibraryId, PipelineId, PipelineLimits, RawBufferId, SlotBinding};
pub use backends::host::DispatchRecord;
pub use backends::{HostBackend, MetalBackend};
pub use error::{BackendError, Result};
