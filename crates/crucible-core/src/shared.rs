//! Shared session handles for binding layers
//!
//! Sessions can be shared between multiple logical owners through opaque
//! `u64` handles with explicit reference counting: `create` hands out a
//! handle at count 1, `retain` bumps it, `release` drops it and destroys
//! the session on the last release. This replaces the process-wide
//! singleton instance a binding layer would otherwise reach for: no owner
//! can destroy state another owner still uses.
//!
//! ## Thread safety
//!
//! The registry is one `Mutex<HashMap>`; callers from any thread are
//! serialized through it, which is exactly the session's concurrency
//! contract (no two threads mutate a session at once). Handle generation
//! uses atomic operations. Handles start at 1; 0 is never a valid handle.

use std::collections::HashMap;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crucible_backends::{ComputeBackend, HostBackend, MetalBackend};

use crate::buffers::BufferHandle;
use crate::dispatch::DispatchRequest;
use crate::error::{Result, SessionError};
use crate::session::Session;

// Global handle counter for unique handle generation
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

struct SharedSession {
    session: Session,
    refs: usize,
}

lazy_static::lazy_static! {
    /// Registry of all shared sessions
    static ref SESSION_REGISTRY: Arc<Mutex<HashMap<u64, SharedSession>>> =
        Arc::new(Mutex::new(HashMap::new()));
}

/// Generate a unique session handle
fn generate_handle() -> u64 {
    HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Lock the registry, recovering from a poisoned mutex
///
/// If a panic poisoned the lock the data is still valid; recover it rather
/// than cascading the failure into every later caller.
fn lock_registry(mutex: &Arc<Mutex<HashMap<u64, SharedSession>>>) -> MutexGuard<'_, HashMap<u64, SharedSession>> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("session registry mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Run an operation against a shared session
///
/// # Errors
///
/// Returns `UnknownSession` when the handle is not in the registry.
pub fn with_session<R>(handle: u64, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
    let mut registry = lock_registry(&SESSION_REGISTRY);
    let shared = registry.get_mut(&handle).ok_or(SessionError::UnknownSession(handle))?;
    f(&mut shared.session)
}

/// Create a shared session on the system GPU
///
/// The handle starts with a reference count of 1.
///
/// # Errors
///
/// Returns `BackendUnavailable` when no device can be acquired.
pub fn create() -> Result<u64> {
    register(Session::new()?)
}

/// Create a shared session on an explicit backend
pub fn create_with_backend(backend: Box<dyn ComputeBackend>) -> Result<u64> {
    register(Session::with_backend(backend))
}

/// Create a shared session on a named backend
///
/// Accepts `"metal"`, `"host"`, or `"auto"`; auto picks the GPU when one
/// is present and falls back to the host backend otherwise.
///
/// # Errors
///
/// Returns `BackendUnavailable` for `"metal"` without a device, or for an
/// unrecognised backend name.
pub fn create_named(backend: &str) -> Result<u64> {
    match backend.to_lowercase().as_str() {
        "metal" => create(),
        "host" => create_with_backend(Box::new(HostBackend::new())),
        "auto" => {
            if MetalBackend::is_available() {
                create()
            } else {
                tracing::debug!("no GPU available, auto backend falling back to host");
                create_with_backend(Box::new(HostBackend::new()))
            }
        }
        other => Err(SessionError::BackendUnavailable(format!(
            "unknown backend name: {other}"
        ))),
    }
}

fn register(session: Session) -> Result<u64> {
    let handle = generate_handle();
    let backend = session.backend_name();

    lock_registry(&SESSION_REGISTRY).insert(handle, SharedSession { session, refs: 1 });

    tracing::info!(handle, backend, "shared session created");
    Ok(handle)
}

/// Add one owner to a shared session
pub fn retain(handle: u64) -> Result<()> {
    let mut registry = lock_registry(&SESSION_REGISTRY);
    let shared = registry.get_mut(&handle).ok_or(SessionError::UnknownSession(handle))?;
    shared.refs += 1;

    tracing::debug!(handle, refs = shared.refs, "session retained");
    Ok(())
}

/// Drop one owner; the last release destroys the session
///
/// Destruction runs the full teardown: pipeline, library, every live
/// buffer, then the backend handle.
pub fn release(handle: u64) -> Result<()> {
    let mut registry = lock_registry(&SESSION_REGISTRY);
    let shared = registry.get_mut(&handle).ok_or(SessionError::UnknownSession(handle))?;

    shared.refs -= 1;
    if shared.refs == 0 {
        registry.remove(&handle);
        tracing::info!(handle, "shared session destroyed");
    } else {
        tracing::debug!(handle, refs = shared.refs, "session released");
    }
    Ok(())
}

/// Current reference count of a shared session
pub fn reference_count(handle: u64) -> Result<usize> {
    let registry = lock_registry(&SESSION_REGISTRY);
    registry
        .get(&handle)
        .map(|s| s.refs)
        .ok_or(SessionError::UnknownSession(handle))
}

// ================================================================================================
// Per-operation wrappers: the session contract as consumed by a binding layer
// ================================================================================================

/// Compile kernel source text in a shared session
pub fn compile_from_text(handle: u64, source: &str) -> Result<()> {
    with_session(handle, |s| s.compile_source(source))
}

/// Read a kernel source file and compile it in a shared session
pub fn compile_from_path(handle: u64, path: impl AsRef<Path>) -> Result<()> {
    with_session(handle, |s| s.compile_file(path))
}

/// Select the kernel entry point in a shared session
pub fn select_function(handle: u64, name: &str) -> Result<()> {
    with_session(handle, |s| s.select_function(name))
}

/// Allocate a buffer in a shared session
pub fn allocate_buffer(handle: u64, size: usize) -> Result<BufferHandle> {
    with_session(handle, |s| s.allocate_buffer(size))
}

/// Borrow the host pointer of a buffer in a shared session
///
/// The pointer is valid only while the buffer (and the session) is alive;
/// see [`Session::buffer_ptr`] for the caller contract.
pub fn buffer_ptr(handle: u64, buffer: BufferHandle) -> Result<NonNull<u8>> {
    with_session(handle, |s| s.buffer_ptr(buffer))
}

/// Release a buffer in a shared session
pub fn release_buffer(handle: u64, buffer: BufferHandle) -> Result<()> {
    with_session(handle, |s| s.release_buffer(buffer))
}

/// Submit one dispatch in a shared session
pub fn dispatch(handle: u64, request: &DispatchRequest) -> Result<()> {
    with_session(handle, |s| s.dispatch(request))
}

/// Max threads per group of the active pipeline, `None` without one
pub fn max_threads_per_group(handle: u64) -> Result<Option<u32>> {
    with_session(handle, |s| Ok(s.max_threads_per_group()))
}

/// Execution width of the active pipeline, `None` without one
pub fn execution_width(handle: u64) -> Result<Option<u32>> {
    with_session(handle, |s| Ok(s.execution_width()))
}

/// Clear the registry, destroying every shared session
///
/// # Warning
///
/// Invalidates all outstanding handles. Use only for testing.
pub fn clear_registry() {
    lock_registry(&SESSION_REGISTRY).clear();
    tracing::info!("session registry cleared");
}
