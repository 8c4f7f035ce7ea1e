//! Metal library compilation and pipeline construction

#[cfg(target_vendor = "apple")]
use metal::{CompileOptions, ComputePipelineState, Device, Library};

#[cfg(target_vendor = "apple")]
use std::collections::HashMap;

#[cfg(target_vendor = "apple")]
use crate::backend::{LibraryId, PipelineId, PipelineLimits};
#[cfg(target_vendor = "apple")]
use crate::error::{BackendError, Result};

/// Library and pipeline tables for the Metal backend
///
/// Libraries and pipelines are handed out as opaque handles; the session
/// layer decides when each is superseded and released.
#[cfg(target_vendor = "apple")]
pub struct MetalPipelineTable {
    /// Compiled shader libraries (handle -> Metal library)
    libraries: HashMap<u64, Library>,

    /// Built compute pipelines (handle -> pipeline state)
    pipelines: HashMap<u64, ComputePipelineState>,

    /// Next library handle
    next_library: u64,

    /// Next pipeline handle
    next_pipeline: u64,
}

#[cfg(target_vendor = "apple")]
impl MetalPipelineTable {
    /// Create empty tables
    pub fn new() -> Self {
        Self {
            libraries: HashMap::new(),
            pipelines: HashMap::new(),
            next_library: 1,
            next_pipeline: 1,
        }
    }

    /// Compile kernel source into a new library
    ///
    /// The device compiler's diagnostic is carried verbatim on failure.
    pub fn compile(&mut self, device: &Device, source: &str) -> Result<LibraryId> {
        let library = device
            .new_library_with_source(source, &CompileOptions::new())
            .map_err(|e| BackendError::compile(e.to_string()))?;

        let id = LibraryId::new(self.next_library);
        self.next_library += 1;
        self.libraries.insert(id.id(), library);

        Ok(id)
    }

    /// Release a library
    pub fn release_library(&mut self, library: LibraryId) -> Result<()> {
        self.libraries
            .remove(&library.id())
            .ok_or(BackendError::InvalidLibrary(library.id()))?;
        Ok(())
    }

    /// Resolve `function` in a library and build its compute pipeline
    pub fn create_pipeline(&mut self, device: &Device, library: LibraryId, function: &str) -> Result<PipelineId> {
        let lib = self
            .libraries
            .get(&library.id())
            .ok_or(BackendError::InvalidLibrary(library.id()))?;

        let entry = lib
            .get_function(function, None)
            .map_err(|_| BackendError::FunctionNotFound(function.to_string()))?;

        let pipeline = device
            .new_compute_pipeline_state_with_function(&entry)
            .map_err(|e| BackendError::pipeline_build(e.to_string()))?;

        let id = PipelineId::new(self.next_pipeline);
        self.next_pipeline += 1;
        self.pipelines.insert(id.id(), pipeline);

        Ok(id)
    }

    /// Release a pipeline
    pub fn release_pipeline(&mut self, pipeline: PipelineId) -> Result<()> {
        self.pipelines
            .remove(&pipeline.id())
            .ok_or(BackendError::InvalidPipeline(pipeline.id()))?;
        Ok(())
    }

    /// Hardware limits reported by a pipeline
    pub fn limits(&self, pipeline: PipelineId) -> Result<PipelineLimits> {
        let pso = self.get(pipeline)?;
        Ok(PipelineLimits::new(
            pso.max_total_threads_per_threadgroup() as u32,
            pso.thread_execution_width() as u32,
        ))
    }

    /// Borrow the pipeline state for encoding
    pub fn get(&self, pipeline: PipelineId) -> Result<&ComputePipelineState> {
        self.pipelines
            .get(&pipeline.id())
            .ok_or(BackendError::InvalidPipeline(pipeline.id()))
    }
}
