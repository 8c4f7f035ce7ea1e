//! Session buffer registry
//!
//! An ordered collection of device buffers with dense, stable handles.
//! Handles are assigned sequentially from 0 in creation order; releasing a
//! buffer tombstones its slot without compacting, so every handle keeps its
//! meaning for the registry's whole lifetime and a released handle reports
//! invalid forever after.

use std::fmt;

use crucible_backends::{ComputeBackend, RawBufferId, SlotBinding};

use crate::error::{Result, SessionError};

/// Handle to a session buffer
///
/// Dense index into the session's buffer registry, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

impl BufferHandle {
    /// Create a handle from a registry index
    pub const fn new(index: u32) -> Self {
        BufferHandle(index)
    }

    /// Get the registry index
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// One live registry entry
#[derive(Debug, Clone, Copy)]
pub(crate) struct BufferEntry {
    /// Backend buffer backing this entry
    pub raw: RawBufferId,

    /// Byte size fixed at creation
    pub size: usize,
}

/// Buffer registry owned by a session
///
/// Released slots stay tombstoned (`None`); indices are never reused.
#[derive(Default)]
pub(crate) struct BufferRegistry {
    entries: Vec<Option<BufferEntry>>,
}

impl BufferRegistry {
    /// Allocate a backend buffer and register it under the next handle
    pub fn allocate(&mut self, backend: &mut dyn ComputeBackend, size: usize) -> Result<BufferHandle> {
        if size == 0 {
            return Err(SessionError::AllocationFailed { requested: 0 });
        }

        let raw = backend.allocate_buffer(size)?;
        self.entries.push(Some(BufferEntry { raw, size }));

        let handle = BufferHandle::new((self.entries.len() - 1) as u32);
        tracing::debug!(handle = %handle, size, "buffer allocated");
        Ok(handle)
    }

    /// Release a buffer and tombstone its slot
    ///
    /// Releasing the same handle twice is an error, not a no-op: it
    /// surfaces double-free bugs at the first opportunity.
    pub fn release(&mut self, backend: &mut dyn ComputeBackend, handle: BufferHandle) -> Result<()> {
        let slot = self
            .entries
            .get_mut(handle.index() as usize)
            .ok_or(SessionError::InvalidHandle(handle))?;
        let entry = slot.take().ok_or(SessionError::InvalidHandle(handle))?;

        backend.free_buffer(entry.raw)?;
        tracing::debug!(handle = %handle, "buffer released");
        Ok(())
    }

    /// Look up a live entry
    pub fn entry(&self, handle: BufferHandle) -> Result<BufferEntry> {
        self.entries
            .get(handle.index() as usize)
            .copied()
            .flatten()
            .ok_or(SessionError::InvalidHandle(handle))
    }

    /// Backend buffer behind a live handle
    pub fn raw(&self, handle: BufferHandle) -> Result<RawBufferId> {
        Ok(self.entry(handle)?.raw)
    }

    /// Byte size of a live buffer
    pub fn size(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.entry(handle)?.size)
    }

    /// Resolve an ordered binding list into backend slot bindings
    ///
    /// The position in `requested` is the kernel argument slot; `None`
    /// means "no buffer at this slot" and is silently omitted. Any live
    /// handle resolves; any dead one is an error.
    pub fn resolve(&self, requested: &[Option<BufferHandle>]) -> Result<Vec<SlotBinding>> {
        let mut bindings = Vec::with_capacity(requested.len());
        for (slot, handle) in requested.iter().enumerate() {
            if let Some(handle) = handle {
                bindings.push(SlotBinding::new(slot as u32, self.raw(*handle)?));
            }
        }
        Ok(bindings)
    }

    /// Number of live buffers
    pub fn live(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Release every live buffer, oldest first
    ///
    /// Teardown path: backend failures are logged, not propagated, so one
    /// bad entry cannot strand the rest.
    pub fn release_all(&mut self, backend: &mut dyn ComputeBackend) {
        for (index, slot) in self.entries.iter_mut().enumerate() {
            if let Some(entry) = slot.take() {
                if let Err(err) = backend.free_buffer(entry.raw) {
                    tracing::warn!(index, error = %err, "failed to free buffer during teardown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_backends::HostBackend;

    #[test]
    fn test_handles_are_dense_and_sequential() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        let a = registry.allocate(&mut backend, 16).unwrap();
        let b = registry.allocate(&mut backend, 32).unwrap();
        let c = registry.allocate(&mut backend, 64).unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(c.index(), 2);
        assert_eq!(registry.size(b).unwrap(), 32);
        assert_eq!(registry.live(), 3);
    }

    #[test]
    fn test_release_tombstones_without_reuse() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        let a = registry.allocate(&mut backend, 16).unwrap();
        let b = registry.allocate(&mut backend, 16).unwrap();

        registry.release(&mut backend, a).unwrap();
        assert!(matches!(registry.raw(a), Err(SessionError::InvalidHandle(h)) if h == a));

        // New allocations never reuse the tombstoned index
        let c = registry.allocate(&mut backend, 16).unwrap();
        assert_eq!(c.index(), 2);
        assert_eq!(registry.live(), 2);
        assert!(registry.raw(b).is_ok());
    }

    #[test]
    fn test_double_release_is_an_error() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        let a = registry.allocate(&mut backend, 16).unwrap();
        registry.release(&mut backend, a).unwrap();
        assert!(matches!(
            registry.release(&mut backend, a),
            Err(SessionError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_out_of_range_handle() {
        let backend = HostBackend::new();
        let registry = BufferRegistry::default();
        let _ = backend;

        assert!(matches!(
            registry.raw(BufferHandle::new(5)),
            Err(SessionError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_zero_size_allocation_rejected() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        assert!(matches!(
            registry.allocate(&mut backend, 0),
            Err(SessionError::AllocationFailed { requested: 0 })
        ));
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn test_resolve_skips_sentinels() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        let a = registry.allocate(&mut backend, 16).unwrap();
        let b = registry.allocate(&mut backend, 16).unwrap();

        let bindings = registry.resolve(&[Some(a), None, Some(b)]).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].slot, 0);
        assert_eq!(bindings[1].slot, 2);
    }

    #[test]
    fn test_resolve_rejects_released_handles() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        let a = registry.allocate(&mut backend, 16).unwrap();
        registry.release(&mut backend, a).unwrap();

        assert!(matches!(
            registry.resolve(&[Some(a)]),
            Err(SessionError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_release_all() {
        let mut backend = HostBackend::new();
        let mut registry = BufferRegistry::default();

        let a = registry.allocate(&mut backend, 16).unwrap();
        let _b = registry.allocate(&mut backend, 16).unwrap();
        registry.release(&mut backend, a).unwrap();

        registry.release_all(&mut backend);
        assert_eq!(registry.live(), 0);
    }
}
