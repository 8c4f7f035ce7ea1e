//! Host-memory reference backend
//!
//! Implements the full backend contract against plain host allocations so
//! the session layer can be exercised on machines without a GPU. Buffers
//! are real memory (pointer round-trips behave exactly as on a device with
//! unified memory); compilation recognises `kernel void name(...)`
//! declarations so entry-point resolution has the same failure modes as a
//! device compiler; dispatches perform no computation but are recorded for
//! inspection.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

use crate::backend::{GridExtent, GroupExtent, LibraryId, PipelineId, PipelineLimits, RawBufferId, SlotBinding};
use crate::error::{BackendError, Result};
use crate::ComputeBackend;

/// Default limits, matching a typical desktop-class GPU
const DEFAULT_LIMITS: PipelineLimits = PipelineLimits::new(1024, 32);

/// One recorded dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Pipeline the work ran on
    pub pipeline: PipelineId,

    /// Global work size as submitted
    pub grid: GridExtent,

    /// Thread-group shape as submitted
    pub group: GroupExtent,

    /// Slot bindings, in submission order
    pub bindings: Vec<SlotBinding>,

    /// Whether the caller asked for synchronous completion
    pub waited: bool,
}

/// One host buffer: an owned, zero-initialised, 16-byte-aligned allocation
///
/// Device buffers guarantee scalar alignment and stay writable through
/// their mapped pointer for as long as they live; a raw allocation models
/// both exactly. Callers will view the pointer as `i32*`/`f32*` arrays.
struct HostBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
    len: usize,
}

// The allocation is exclusively owned by its backend entry.
unsafe impl Send for HostBuffer {}

impl HostBuffer {
    fn new(len: usize) -> Option<Self> {
        let layout = Layout::from_size_align(len.next_multiple_of(16), 16).ok()?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout, len })
    }

    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

struct HostLibrary {
    kernels: Vec<String>,
}

struct HostPipeline {
    function: String,
    limits: PipelineLimits,
}

/// Host-memory backend
///
/// The reference implementation of [`ComputeBackend`]: always available,
/// no device required. Used by tests and as a fallback target on machines
/// without a GPU.
pub struct HostBackend {
    buffers: HashMap<u64, HostBuffer>,
    libraries: HashMap<u64, HostLibrary>,
    pipelines: HashMap<u64, HostPipeline>,
    limits: PipelineLimits,
    dispatches: Vec<DispatchRecord>,
    next_buffer: u64,
    next_library: u64,
    next_pipeline: u64,
}

impl HostBackend {
    /// Create a host backend with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_LIMITS)
    }

    /// Create a host backend reporting the given pipeline limits
    ///
    /// Tests use this to pin dispatch geometry against known limits,
    /// including degenerate zero values a misbehaving driver could report.
    pub fn with_limits(limits: PipelineLimits) -> Self {
        Self {
            buffers: HashMap::new(),
            libraries: HashMap::new(),
            pipelines: HashMap::new(),
            limits,
            dispatches: Vec::new(),
            next_buffer: 1,
            next_library: 1,
            next_pipeline: 1,
        }
    }

    /// The host backend is always available
    pub fn is_available() -> bool {
        true
    }

    /// All dispatches recorded so far, oldest first
    pub fn dispatches(&self) -> &[DispatchRecord] {
        &self.dispatches
    }

    /// The most recent dispatch, if any
    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.dispatches.last()
    }

    /// Forget recorded dispatches
    pub fn clear_dispatches(&mut self) {
        self.dispatches.clear();
    }

    /// Name of the entry point a pipeline was built from
    pub fn pipeline_function(&self, pipeline: PipelineId) -> Result<&str> {
        self.pipelines
            .get(&pipeline.id())
            .map(|p| p.function.as_str())
            .ok_or(BackendError::InvalidPipeline(pipeline.id()))
    }

    fn buffer(&self, buffer: RawBufferId) -> Result<&HostBuffer> {
        self.buffers
            .get(&buffer.id())
            .ok_or(BackendError::InvalidBuffer(buffer.id()))
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the names declared as `kernel void <name>(...)` from source text
///
/// This is intentionally a token scan, not a parser: it gives the host
/// backend the same observable behavior as a device compiler (names resolve
/// or they don't) without defining a kernel language.
fn scan_kernel_names(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let tokens: Vec<&str> = source.split_whitespace().collect();
    for window in tokens.windows(3) {
        if window[0] == "kernel" && window[1] == "void" {
            let name: String = window[2]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

impl ComputeBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn compile_library(&mut self, source: &str) -> Result<LibraryId> {
        if source.trim().is_empty() {
            return Err(BackendError::compile("empty kernel source"));
        }

        let kernels = scan_kernel_names(source);
        let id = LibraryId::new(self.next_library);
        self.next_library += 1;
        self.libraries.insert(id.id(), HostLibrary { kernels });

        tracing::debug!(library = %id, "host library compiled");
        Ok(id)
    }

    fn release_library(&mut self, library: LibraryId) -> Result<()> {
        self.libraries
            .remove(&library.id())
            .ok_or(BackendError::InvalidLibrary(library.id()))?;
        Ok(())
    }

    fn create_pipeline(&mut self, library: LibraryId, function: &str) -> Result<PipelineId> {
        let lib = self
            .libraries
            .get(&library.id())
            .ok_or(BackendError::InvalidLibrary(library.id()))?;

        if !lib.kernels.iter().any(|k| k == function) {
            return Err(BackendError::FunctionNotFound(function.to_string()));
        }

        let id = PipelineId::new(self.next_pipeline);
        self.next_pipeline += 1;
        self.pipelines.insert(
            id.id(),
            HostPipeline {
                function: function.to_string(),
                limits: self.limits,
            },
        );

        Ok(id)
    }

    fn release_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.pipelines
            .remove(&pipeline.id())
            .ok_or(BackendError::InvalidPipeline(pipeline.id()))?;
        Ok(())
    }

    fn pipeline_limits(&self, pipeline: PipelineId) -> Result<PipelineLimits> {
        self.pipelines
            .get(&pipeline.id())
            .map(|p| p.limits)
            .ok_or(BackendError::InvalidPipeline(pipeline.id()))
    }

    fn allocate_buffer(&mut self, size: usize) -> Result<RawBufferId> {
        if size == 0 {
            return Err(BackendError::Allocation { requested: 0 });
        }

        let storage = HostBuffer::new(size).ok_or(BackendError::Allocation { requested: size })?;

        let id = RawBufferId::new(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id.id(), storage);

        Ok(id)
    }

    fn free_buffer(&mut self, buffer: RawBufferId) -> Result<()> {
        self.buffers
            .remove(&buffer.id())
            .ok_or(BackendError::InvalidBuffer(buffer.id()))?;
        Ok(())
    }

    fn buffer_len(&self, buffer: RawBufferId) -> Result<usize> {
        Ok(self.buffer(buffer)?.len)
    }

    fn buffer_ptr(&self, buffer: RawBufferId) -> Result<NonNull<u8>> {
        // The allocation never moves while the buffer lives in the map, so
        // the pointer is stable for the buffer's whole lifetime.
        Ok(self.buffer(buffer)?.ptr)
    }

    fn copy_to_buffer(&mut self, buffer: RawBufferId, offset: usize, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get_mut(&buffer.id())
            .ok_or(BackendError::InvalidBuffer(buffer.id()))?;

        if offset + data.len() > target.len {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len(),
                size: target.len,
            });
        }

        target.bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_from_buffer(&self, buffer: RawBufferId, offset: usize, data: &mut [u8]) -> Result<()> {
        let source = self.buffer(buffer)?;

        if offset + data.len() > source.len {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len(),
                size: source.len,
            });
        }

        data.copy_from_slice(&source.bytes()[offset..offset + data.len()]);
        Ok(())
    }

    fn dispatch(
        &mut self,
        pipeline: PipelineId,
        grid: GridExtent,
        group: GroupExtent,
        bindings: &[SlotBinding],
        wait: bool,
    ) -> Result<()> {
        if !self.pipelines.contains_key(&pipeline.id()) {
            return Err(BackendError::InvalidPipeline(pipeline.id()));
        }
        for binding in bindings {
            if !self.buffers.contains_key(&binding.buffer.id()) {
                return Err(BackendError::InvalidBuffer(binding.buffer.id()));
            }
        }

        self.dispatches.push(DispatchRecord {
            pipeline,
            grid,
            group,
            bindings: bindings.to_vec(),
            waited: wait,
        });

        tracing::debug!(pipeline = %pipeline, grid = %grid, group = %group, wait, "host dispatch recorded");
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDER: &str = r#"
        #include <metal_stdlib>
        using namespace metal;

        kernel void adder(device int *a [[buffer(0)]],
                          device int *b [[buffer(1)]],
                          device int *out [[buffer(2)]],
                          uint id [[thread_position_in_grid]]) {
            out[id] = a[id] + b[id];
        }

        kernel void doubler(device int *a [[buffer(0)]],
                            uint id [[thread_position_in_grid]]) {
            a[id] = a[id] * 2;
        }
    "#;

    #[test]
    fn test_scan_kernel_names() {
        assert_eq!(scan_kernel_names(ADDER), vec!["adder", "doubler"]);
        assert_eq!(scan_kernel_names("kernel void emptyFunc() {}"), vec!["emptyFunc"]);
        assert!(scan_kernel_names("void not_a_kernel() {}").is_empty());
    }

    #[test]
    fn test_compile_and_pipeline() {
        let mut backend = HostBackend::new();

        let library = backend.compile_library(ADDER).unwrap();
        let pipeline = backend.create_pipeline(library, "adder").unwrap();

        assert_eq!(backend.pipeline_function(pipeline).unwrap(), "adder");
        assert_eq!(backend.pipeline_limits(pipeline).unwrap(), PipelineLimits::new(1024, 32));
    }

    #[test]
    fn test_compile_empty_source() {
        let mut backend = HostBackend::new();
        let result = backend.compile_library("   \n  ");
        assert!(matches!(result, Err(BackendError::Compile { .. })));
    }

    #[test]
    fn test_function_not_found() {
        let mut backend = HostBackend::new();
        let library = backend.compile_library(ADDER).unwrap();
        let result = backend.create_pipeline(library, "missing");
        assert!(matches!(result, Err(BackendError::FunctionNotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_release_invalidates_handles() {
        let mut backend = HostBackend::new();

        let library = backend.compile_library(ADDER).unwrap();
        let pipeline = backend.create_pipeline(library, "adder").unwrap();

        backend.release_pipeline(pipeline).unwrap();
        assert!(backend.pipeline_limits(pipeline).is_err());
        assert!(backend.release_pipeline(pipeline).is_err());

        backend.release_library(library).unwrap();
        assert!(backend.create_pipeline(library, "adder").is_err());
    }

    #[test]
    fn test_buffer_roundtrip() {
        let mut backend = HostBackend::new();

        let buffer = backend.allocate_buffer(64).unwrap();
        assert_eq!(backend.buffer_len(buffer).unwrap(), 64);

        let data = b"host backend roundtrip";
        backend.copy_to_buffer(buffer, 8, data).unwrap();

        let mut result = vec![0u8; data.len()];
        backend.copy_from_buffer(buffer, 8, &mut result).unwrap();
        assert_eq!(result, data);

        backend.free_buffer(buffer).unwrap();
        assert!(backend.buffer_len(buffer).is_err());
    }

    #[test]
    fn test_buffer_pointer_is_live_memory() {
        let mut backend = HostBackend::new();

        let buffer = backend.allocate_buffer(16).unwrap();
        let ptr = backend.buffer_ptr(buffer).unwrap();

        unsafe {
            std::ptr::write(ptr.as_ptr().cast::<u32>(), 0xDEAD_BEEF);
        }

        let mut word = [0u8; 4];
        backend.copy_from_buffer(buffer, 0, &mut word).unwrap();
        assert_eq!(u32::from_ne_bytes(word), 0xDEAD_BEEF);
    }

    #[test]
    fn test_buffer_out_of_bounds() {
        let mut backend = HostBackend::new();

        let buffer = backend.allocate_buffer(16).unwrap();
        let result = backend.copy_to_buffer(buffer, 8, &[0u8; 16]);
        assert!(matches!(result, Err(BackendError::OutOfBounds { .. })));
    }

    #[test]
    fn test_zero_sized_allocation_rejected() {
        let mut backend = HostBackend::new();
        assert!(matches!(
            backend.allocate_buffer(0),
            Err(BackendError::Allocation { requested: 0 })
        ));
    }

    #[test]
    fn test_dispatch_recording() {
        let mut backend = HostBackend::new();

        let library = backend.compile_library(ADDER).unwrap();
        let pipeline = backend.create_pipeline(library, "adder").unwrap();
        let buffer = backend.allocate_buffer(32).unwrap();

        backend
            .dispatch(
                pipeline,
                GridExtent::linear(8),
                GroupExtent::linear(8),
                &[SlotBinding::new(2, buffer)],
                true,
            )
            .unwrap();

        let record = backend.last_dispatch().unwrap();
        assert_eq!(record.grid, GridExtent::linear(8));
        assert_eq!(record.group, GroupExtent::linear(8));
        assert_eq!(record.bindings, vec![SlotBinding::new(2, buffer)]);
        assert!(record.waited);
    }

    #[test]
    fn test_dispatch_rejects_dead_handles() {
        let mut backend = HostBackend::new();

        let library = backend.compile_library(ADDER).unwrap();
        let pipeline = backend.create_pipeline(library, "adder").unwrap();
        let buffer = backend.allocate_buffer(32).unwrap();
        backend.free_buffer(buffer).unwrap();

        let result = backend.dispatch(
            pipeline,
            GridExtent::linear(8),
            GroupExtent::linear(8),
            &[SlotBinding::new(0, buffer)],
            true,
        );
        assert!(matches!(result, Err(BackendError::InvalidBuffer(_))));
        assert!(backend.dispatches().is_empty());
    }
}
