//! Metal backend for Apple GPUs
//!
//! Runs kernel compilation and compute dispatch on the system Metal device.
//!
//! # Architecture
//!
//! ```text
//! MetalBackend
//! ├── Device              - Metal GPU device
//! ├── CommandQueue        - Command submission queue
//! ├── MetalMemoryManager  - shared-storage buffers
//! └── MetalPipelineTable  - compiled libraries + pipelines
//! ```
//!
//! Buffers use shared storage mode, so the host pointer exposed through the
//! backend contract points straight at unified memory.

mod memory;
mod pipeline;

use crate::error::{BackendError, Result};

#[cfg(target_vendor = "apple")]
use std::ptr::NonNull;

#[cfg(target_vendor = "apple")]
use metal::{CommandBuffer, CommandQueue, Device, MTLSize};

#[cfg(target_vendor = "apple")]
use crate::backend::{
    ComputeBackend, GridExtent, GroupExtent, LibraryId, PipelineId, PipelineLimits, RawBufferId, SlotBinding,
};

#[cfg(target_vendor = "apple")]
use memory::MetalMemoryManager;

#[cfg(target_vendor = "apple")]
use pipeline::MetalPipelineTable;

/// Metal compute backend
///
/// One backend instance wraps one device and one command queue. At most one
/// unsynchronized dispatch is tracked at a time: a non-blocking dispatch
/// parks its command buffer until the next blocking dispatch or
/// [`synchronize`](ComputeBackend::synchronize).
#[cfg(target_vendor = "apple")]
pub struct MetalBackend {
    /// Metal device (GPU)
    device: Device,

    /// Command queue for work submission
    command_queue: CommandQueue,

    /// Buffer table
    memory: MetalMemoryManager,

    /// Library and pipeline tables
    pipelines: MetalPipelineTable,

    /// Command buffer of the most recent non-blocking dispatch
    pending: Option<CommandBuffer>,
}

// Metal framework objects are reference-counted and may be used from any
// thread as long as access is externally synchronized; every mutating path
// here goes through `&mut self`, so the owning session provides that.
#[cfg(target_vendor = "apple")]
unsafe impl Send for MetalBackend {}

#[cfg(target_vendor = "apple")]
impl MetalBackend {
    /// Acquire the system default Metal device
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when no Metal device exists; nothing else can
    /// proceed without one.
    pub fn new() -> Result<Self> {
        let device =
            Device::system_default().ok_or_else(|| BackendError::Unavailable("no Metal device found".into()))?;

        tracing::info!(device = %device.name(), "acquired Metal device");

        let command_queue = device.new_command_queue();
        let memory = MetalMemoryManager::new(device.clone());
        let pipelines = MetalPipelineTable::new();

        Ok(Self {
            device,
            command_queue,
            memory,
            pipelines,
            pending: None,
        })
    }

    /// Check whether a Metal device is present on this system
    pub fn is_available() -> bool {
        Device::system_default().is_some()
    }
}

#[cfg(target_vendor = "apple")]
impl ComputeBackend for MetalBackend {
    fn name(&self) -> &'static str {
        "metal"
    }

    fn compile_library(&mut self, source: &str) -> Result<LibraryId> {
        self.pipelines.compile(&self.device, source)
    }

    fn release_library(&mut self, library: LibraryId) -> Result<()> {
        self.pipelines.release_library(library)
    }

    fn create_pipeline(&mut self, library: LibraryId, function: &str) -> Result<PipelineId> {
        self.pipelines.create_pipeline(&self.device, library, function)
    }

    fn release_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.pipelines.release_pipeline(pipeline)
    }

    fn pipeline_limits(&self, pipeline: PipelineId) -> Result<PipelineLimits> {
        self.pipelines.limits(pipeline)
    }

    fn allocate_buffer(&mut self, size: usize) -> Result<RawBufferId> {
        self.memory.allocate(size)
    }

    fn free_buffer(&mut self, buffer: RawBufferId) -> Result<()> {
        self.memory.free(buffer)
    }

    fn buffer_len(&self, buffer: RawBufferId) -> Result<usize> {
        self.memory.len(buffer)
    }

    fn buffer_ptr(&self, buffer: RawBufferId) -> Result<NonNull<u8>> {
        self.memory.host_ptr(buffer)
    }

    fn copy_to_buffer(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]) -> Result<()> {
        self.memory.copy_to(buffer, offset, data)
    }

    fn copy_from_buffer(&self, buffer: RawBufferId, offset: usize, data: &mut [u8]) -> Result<()> {
        self.memory.copy_from(buffer, offset, data)
    }

    fn dispatch(
        &mut self,
        pipeline: PipelineId,
        grid: GridExtent,
        group: GroupExtent,
        bindings: &[SlotBinding],
        wait: bool,
    ) -> Result<()> {
        let pso = self.pipelines.get(pipeline)?;

        // Resolve every binding before any encoding starts, so an invalid
        // handle cannot leave a half-encoded command buffer behind.
        let mut resolved = Vec::with_capacity(bindings.len());
        for binding in bindings {
            resolved.push((binding.slot, self.memory.get(binding.buffer)?));
        }

        let command_buffer = self.command_queue.new_command_buffer().to_owned();
        let encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(pso);

        for (slot, buffer) in resolved {
            encoder.set_buffer(slot as u64, Some(buffer), 0);
        }

        let grid_size = MTLSize::new(grid.x as u64, grid.y as u64, grid.z as u64);
        let group_size = MTLSize::new(group.x as u64, group.y as u64, group.z as u64);
        encoder.dispatch_threads(grid_size, group_size);
        encoder.end_encoding();

        command_buffer.commit();

        tracing::debug!(pipeline = %pipeline, grid = %grid, group = %group, wait, "dispatched to Metal");

        if wait {
            command_buffer.wait_until_completed();
            self.pending = None;
        } else {
            self.pending = Some(command_buffer);
        }

        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        if let Some(command_buffer) = self.pending.take() {
            command_buffer.wait_until_completed();
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

// Stub for non-Apple platforms: constructing always fails, so the session
// layer reports the device as unavailable instead of failing to link.
#[cfg(not(target_vendor = "apple"))]
pub struct MetalBackend;

#[cfg(not(target_vendor = "apple"))]
impl MetalBackend {
    pub fn new() -> Result<Self> {
        Err(BackendError::Unavailable(
            "Metal backend only available on Apple platforms".into(),
        ))
    }

    pub fn is_available() -> bool {
        false
    }
}
