//! Types for backend handles and dispatch geometry

use std::fmt;

/// Handle to a compiled kernel library owned by a backend
///
/// Libraries are opaque handles; use [`ComputeBackend`](super::ComputeBackend)
/// methods to interact with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibraryId(pub u64);

impl LibraryId {
    /// Create a new library handle
    pub const fn new(id: u64) -> Self {
        LibraryId(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lib{}", self.0)
    }
}

/// Handle to a compute pipeline owned by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u64);

impl PipelineId {
    /// Create a new pipeline handle
    pub const fn new(id: u64) -> Self {
        PipelineId(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pso{}", self.0)
    }
}

/// Handle to a device buffer owned by a backend
///
/// Distinct from the session-level buffer handle: backends hand these out
/// in their own numbering and never reuse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBufferId(pub u64);

impl RawBufferId {
    /// Create a new raw buffer handle
    pub const fn new(id: u64) -> Self {
        RawBufferId(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RawBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raw{}", self.0)
    }
}

/// Global work size for a dispatch
///
/// Total number of logical work-items along each of up to 3 axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridExtent {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridExtent {
    /// Create new grid extents
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create a 1-D extent
    pub const fn linear(items: u32) -> Self {
        Self { x: items, y: 1, z: 1 }
    }

    /// Create a 2-D extent
    pub const fn planar(x: u32, y: u32) -> Self {
        Self { x, y, z: 1 }
    }

    /// Total number of work-items
    pub const fn total_items(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Same extent with every zero axis raised to 1
    pub const fn clamped(self) -> Self {
        Self {
            x: if self.x == 0 { 1 } else { self.x },
            y: if self.y == 0 { 1 } else { self.y },
            z: if self.z == 0 { 1 } else { self.z },
        }
    }
}

impl Default for GridExtent {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Thread-group shape for a dispatch
///
/// The per-group thread counts along each axis; the product must not exceed
/// the pipeline's max-threads-per-group limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupExtent {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GroupExtent {
    /// Create new group extents
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Create a 1-D group
    pub const fn linear(threads: u32) -> Self {
        Self { x: threads, y: 1, z: 1 }
    }

    /// Total number of threads per group
    pub const fn total_threads(&self) -> u32 {
        self.x * self.y * self.z
    }
}

impl Default for GroupExtent {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GroupExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Hardware execution limits reported by an active pipeline
///
/// Both values are positive whenever a pipeline is live; the dispatch
/// geometry treats a zero from a misbehaving driver as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    /// Upper bound on threads per group (product across all axes)
    pub max_threads_per_group: u32,

    /// Preferred execution width (SIMD lane count) of the device
    pub execution_width: u32,
}

impl PipelineLimits {
    /// Create new pipeline limits
    pub const fn new(max_threads_per_group: u32, execution_width: u32) -> Self {
        Self {
            max_threads_per_group,
            execution_width,
        }
    }
}

impl fmt::Display for PipelineLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_threads={}, width={}",
            self.max_threads_per_group, self.execution_width
        )
    }
}

/// A buffer bound to a kernel argument slot for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBinding {
    /// Kernel argument index the buffer is attached to
    pub slot: u32,

    /// Backend buffer to attach
    pub buffer: RawBufferId,
}

impl SlotBinding {
    /// Create a new slot binding
    pub const fn new(slot: u32, buffer: RawBufferId) -> Self {
        Self { slot, buffer }
    }
}

// ================================================================================================
// Tests
// ================================================================================================
