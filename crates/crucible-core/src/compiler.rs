//! Pipeline compiler state machine
//!
//! Tracks the zero-or-one compiled library and the zero-or-one active
//! function/pipeline pair a session owns. Supersession rules:
//!
//! - compiling releases the active pipeline and the old library *before*
//!   the new compile; a failed compile therefore leaves neither, and
//!   dispatch reports the no-pipeline state until re-selection;
//! - re-selecting a function releases the previous pipeline first,
//!   atomically: a failed selection leaves no active function rather than
//!   a half-updated pair.

use crucible_backends::{ComputeBackend, LibraryId, PipelineId, PipelineLimits};

use crate::error::{Result, SessionError};

struct ActivePipeline {
    pipeline: PipelineId,
    function: String,
    limits: PipelineLimits,
}

/// Library/function/pipeline state for one session
#[derive(Default)]
pub(crate) struct PipelineCompiler {
    library: Option<LibraryId>,
    active: Option<ActivePipeline>,
}

impl PipelineCompiler {
    /// Compile new kernel source, superseding any previous library
    pub fn compile(&mut self, backend: &mut dyn ComputeBackend, source: &str) -> Result<()> {
        if let Some(active) = self.active.take() {
            backend.release_pipeline(active.pipeline)?;
        }
        if let Some(library) = self.library.take() {
            backend.release_library(library)?;
        }

        let library = backend.compile_library(source)?;
        self.library = Some(library);

        tracing::info!(library = %library, "kernel library compiled");
        Ok(())
    }

    /// Resolve a named entry point and make its pipeline active
    pub fn select_function(&mut self, backend: &mut dyn ComputeBackend, name: &str) -> Result<()> {
        // With no library there is nothing to resolve the name in.
        let library = self.library.ok_or_else(|| SessionError::FunctionNotFound(name.to_string()))?;

        if let Some(previous) = self.active.take() {
            backend.release_pipeline(previous.pipeline)?;
        }

        let pipeline = backend.create_pipeline(library, name)?;
        let limits = match backend.pipeline_limits(pipeline) {
            Ok(limits) => limits,
            Err(err) => {
                // Don't leak the half-built pipeline on the error path.
                let _ = backend.release_pipeline(pipeline);
                return Err(err.into());
            }
        };

        tracing::info!(function = name, pipeline = %pipeline, %limits, "kernel function selected");
        self.active = Some(ActivePipeline {
            pipeline,
            function: name.to_string(),
            limits,
        });
        Ok(())
    }

    /// Pipeline of the active function
    pub fn active_pipeline(&self) -> Result<PipelineId> {
        self.active
            .as_ref()
            .map(|a| a.pipeline)
            .ok_or(SessionError::NoActivePipeline)
    }

    /// Hardware limits of the active pipeline
    pub fn limits(&self) -> Result<PipelineLimits> {
        self.active.as_ref().map(|a| a.limits).ok_or(SessionError::NoActivePipeline)
    }

    /// Name of the active function, if any
    pub fn function_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.function.as_str())
    }

    /// Whether a library is currently compiled
    pub fn has_library(&self) -> bool {
        self.library.is_some()
    }

    /// Release the pipeline, then the library (reverse acquisition order)
    ///
    /// Teardown path: backend failures are logged, not propagated.
    pub fn release_all(&mut self, backend: &mut dyn ComputeBackend) {
        if let Some(active) = self.active.take() {
            if let Err(err) = backend.release_pipeline(active.pipeline) {
                tracing::warn!(error = %err, "failed to release pipeline during teardown");
            }
        }
        if let Some(library) = self.library.take() {
            if let Err(err) = backend.release_library(library) {
                tracing::warn!(error = %err, "failed to release library during teardown");
            }
        }
    }
}
