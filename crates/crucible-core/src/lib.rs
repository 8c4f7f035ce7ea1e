//! # crucible-core
//!
//! GPU compute session manager and dispatch geometry engine.
//!
//! A [`Session`] owns the full compile-link-bind-execute lifecycle of one
//! GPU compute context: it compiles kernel source into a library, selects
//! an entry point into an executable pipeline, allocates host-visible
//! device buffers with stable handles, and dispatches parallel work with a
//! thread-group sizing algorithm that adapts to 1-D, 2-D and 3-D
//! workloads.
//!
//! # Usage
//!
//! ```rust
//! use crucible_core::{DispatchRequest, Session};
//! use crucible_backends::HostBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // On a machine with a GPU: Session::new()
//! let mut session = Session::with_backend(Box::new(HostBackend::new()));
//!
//! session.compile_source(
//!     "kernel void adder(device int *a [[buffer(0)]],
//!                        device int *b [[buffer(1)]],
//!                        device int *out [[buffer(2)]],
//!                        uint id [[thread_position_in_grid]]) {
//!          out[id] = a[id] + b[id];
//!      }",
//! )?;
//! session.select_function("adder")?;
//!
//! let a = session.allocate_buffer(400)?;
//! let b = session.allocate_buffer(400)?;
//! let out = session.allocate_buffer(400)?;
//!
//! session.dispatch(&DispatchRequest::linear(100).bind(a).bind(b).bind(out))?;
//!
//! session.release_buffer(out)?;
//! # Ok(())
//! # }
//! ```
//!
//! Binding layers that share one session between several owners use the
//! [`shared`] module's reference-counted handles instead of owning a
//! [`Session`] directly.

pub mod buffers;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod shared;

mod compiler;

// Re-export public API
pub use buffers::BufferHandle;
pub use dispatch::{thread_group_extent, DispatchRequest, SizingPolicy};
pub use error::{Result, SessionError};
pub use session::Session;

// Re-export the backend seam so most callers need only this crate
pub use crucible_backends::{
    BackendError, ComputeBackend, GridExtent, GroupExtent, HostBackend, MetalBackend, PipelineLimits,
};
