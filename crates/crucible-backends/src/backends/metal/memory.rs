//! Metal buffer management
//!
//! All buffers use shared storage mode: unified memory on Apple Silicon,
//! so the host pointer returned by `contents()` is directly readable and
//! writable without staging copies.

#[cfg(target_vendor = "apple")]
use metal::{Buffer as MetalBuffer, Device, MTLResourceOptions};

#[cfg(target_vendor = "apple")]
use std::collections::HashMap;
#[cfg(target_vendor = "apple")]
use std::ptr::NonNull;

#[cfg(target_vendor = "apple")]
use crate::backend::RawBufferId;
#[cfg(target_vendor = "apple")]
use crate::error::{BackendError, Result};

/// Buffer table for the Metal backend
#[cfg(target_vendor = "apple")]
pub struct MetalMemoryManager {
    /// Metal device for buffer allocation
    device: Device,

    /// Allocated buffers (handle -> Metal buffer)
    buffers: HashMap<u64, MetalBuffer>,

    /// Next buffer handle
    next_buffer: u64,
}

#[cfg(target_vendor = "apple")]
impl MetalMemoryManager {
    /// Create a new buffer table for `device`
    pub fn new(device: Device) -> Self {
        Self {
            device,
            buffers: HashMap::new(),
            next_buffer: 1,
        }
    }

    /// Allocate a shared-storage Metal buffer
    pub fn allocate(&mut self, size: usize) -> Result<RawBufferId> {
        if size == 0 {
            return Err(BackendError::Allocation { requested: 0 });
        }

        let buffer = self.device.new_buffer(size as u64, MTLResourceOptions::StorageModeShared);

        let id = RawBufferId::new(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id.id(), buffer);

        Ok(id)
    }

    /// Free a Metal buffer
    pub fn free(&mut self, buffer: RawBufferId) -> Result<()> {
        self.buffers
            .remove(&buffer.id())
            .ok_or(BackendError::InvalidBuffer(buffer.id()))?;
        Ok(())
    }

    /// Buffer size in bytes
    pub fn len(&self, buffer: RawBufferId) -> Result<usize> {
        Ok(self.get(buffer)?.length() as usize)
    }

    /// Host pointer into the shared-storage contents of a buffer
    pub fn host_ptr(&self, buffer: RawBufferId) -> Result<NonNull<u8>> {
        let contents = self.get(buffer)?.contents() as *mut u8;
        NonNull::new(contents)
            .ok_or_else(|| BackendError::unsupported("shared Metal buffer reported null contents"))
    }

    /// Copy host bytes into a buffer at a byte offset
    pub fn copy_to(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]) -> Result<()> {
        let target = self.get(buffer)?;
        let size = target.length() as usize;

        if offset + data.len() > size {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len(),
                size,
            });
        }

        unsafe {
            let contents = (target.contents() as *mut u8).add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), contents, data.len());
        }

        Ok(())
    }

    /// Copy buffer bytes at a byte offset out to host memory
    pub fn copy_from(&self, buffer: RawBufferId, offset: usize, data: &mut [u8]) -> Result<()> {
        let source = self.get(buffer)?;
        let size = source.length() as usize;

        if offset + data.len() > size {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len(),
                size,
            });
        }

        unsafe {
            let contents = (source.contents() as *const u8).add(offset);
            std::ptr::copy_nonoverlapping(contents, data.as_mut_ptr(), data.len());
        }

        Ok(())
    }

    /// Borrow the Metal buffer for encoding
    pub fn get(&self, buffer: RawBufferId) -> Result<&MetalBuffer> {
        self.buffers
            .get(&buffer.id())
            .ok_or(BackendError::InvalidBuffer(buffer.id()))
    }
}
