//! Dispatch engine: thread-group sizing and work submission
//!
//! The sizing algorithm turns an arbitrary global work size into a legal
//! thread-group shape under two hardware limits: `max_threads_per_group`
//! (`M`) and the preferred `execution_width` (`W`). The shape's thread
//! count never exceeds `M`, every axis is at least 1, and the dispatch
//! dimensionality (how many of the y/z axes exceed 1) picks the formula.

use crucible_backends::{ComputeBackend, GridExtent, GroupExtent, PipelineLimits};

use crate::buffers::{BufferHandle, BufferRegistry};
use crate::compiler::PipelineCompiler;
use crate::error::Result;

/// Thread-group sizing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizingPolicy {
    /// Occupancy-first (default): fill the group along the fast axis.
    ///
    /// 1-D groups take the full `M` threads; 2-D groups snap the fast axis
    /// to `W` and give the rest of the budget to y; 3-D groups snap x to
    /// `W` and split the remaining budget square-ish across y and z.
    #[default]
    Occupancy,

    /// Width-alignment-first legacy policy, kept selectable but not default.
    ///
    /// Differs only for 1-D dispatches: the group takes `min(Gx, M)`
    /// threads, rounded down to a multiple of `W` when possible. This
    /// trades occupancy for exact execution-width alignment and produces
    /// different (still legal) shapes than [`SizingPolicy::Occupancy`].
    WidthAligned,
}

/// Compute a legal thread-group shape for `global` under `limits`
///
/// Zero grid axes and zero limits (a misbehaving driver) are treated as 1,
/// so the result never contains a zero axis and never divides by zero.
pub fn thread_group_extent(global: GridExtent, limits: PipelineLimits, policy: SizingPolicy) -> GroupExtent {
    let global = global.clamped();
    let cap = limits.max_threads_per_group.max(1);
    let width = limits.execution_width.clamp(1, cap);

    if global.z > 1 {
        // Reserve the fast axis at the execution width, then split the
        // remaining thread budget square-ish across y and z.
        let budget = (cap / width).max(1);
        let y = budget.isqrt().max(1);
        let z = (budget / y).max(1);
        GroupExtent::new(width, y, z)
    } else if global.y > 1 {
        GroupExtent::new(width, (cap / width).max(1), 1)
    } else {
        match policy {
            SizingPolicy::Occupancy => GroupExtent::linear(cap),
            SizingPolicy::WidthAligned => {
                let mut x = global.x.min(cap).max(1);
                if x % width != 0 && x >= width {
                    x -= x % width;
                }
                GroupExtent::linear(x)
            }
        }
    }
}

/// One unit of compute work
///
/// The position in `buffers` is the kernel argument slot the buffer binds
/// to; `None` leaves that slot unbound. Unspecified trailing grid axes
/// default to 1.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Global work size
    pub global: GridExtent,

    /// Slot-ordered bindings; `None` skips the slot
    pub buffers: Vec<Option<BufferHandle>>,

    /// Block until the device reports completion
    pub wait: bool,
}

impl DispatchRequest {
    /// Dispatch over an arbitrary extent, synchronous by default
    pub fn new(global: GridExtent) -> Self {
        Self {
            global,
            buffers: Vec::new(),
            wait: true,
        }
    }

    /// Dispatch over `items` work-items along x
    pub fn linear(items: u32) -> Self {
        Self::new(GridExtent::linear(items))
    }

    /// Bind a buffer to the next argument slot
    pub fn bind(mut self, handle: BufferHandle) -> Self {
        self.buffers.push(Some(handle));
        self
    }

    /// Leave the next argument slot unbound
    pub fn skip_slot(mut self) -> Self {
        self.buffers.push(None);
        self
    }

    /// Return immediately instead of blocking on completion
    ///
    /// Ordering then becomes the caller's responsibility: issue a later
    /// synchronous dispatch or an explicit synchronize before reading
    /// results. No implicit fencing is provided.
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// Validate, size, and submit one dispatch
pub(crate) fn execute(
    backend: &mut dyn ComputeBackend,
    compiler: &PipelineCompiler,
    buffers: &BufferRegistry,
    policy: SizingPolicy,
    request: &DispatchRequest,
) -> Result<()> {
    let pipeline = compiler.active_pipeline()?;
    let limits = compiler.limits()?;

    let bindings = buffers.resolve(&request.buffers)?;

    let grid = request.global.clamped();
    let group = thread_group_extent(grid, limits, policy);

    backend.dispatch(pipeline, grid, group, &bindings, request.wait)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: PipelineLimits = PipelineLimits::new(1024, 32);

    #[test]
    fn test_one_dimensional_fills_the_group() {
        let group = thread_group_extent(GridExtent::linear(4096), LIMITS, SizingPolicy::Occupancy);
        assert_eq!(group, GroupExtent::new(1024, 1, 1));
    }

    #[test]
    fn test_two_dimensional_snaps_to_width() {
        let group = thread_group_extent(GridExtent::planar(256, 64), LIMITS, SizingPolicy::Occupancy);
        assert_eq!(group, GroupExtent::new(32, 32, 1));
    }

    #[test]
    fn test_three_dimensional_square_ish_split() {
        let group = thread_group_extent(GridExtent::new(256, 64, 8), LIMITS, SizingPolicy::Occupancy);
        // budget = 1024/32 = 32, y = isqrt(32) = 5, z = 32/5 = 6
        assert_eq!(group, GroupExtent::new(32, 5, 6));
        assert!(group.total_threads() <= LIMITS.max_threads_per_group);
    }

    #[test]
    fn test_group_never_exceeds_cap() {
        for (gx, gy, gz) in [(1, 1, 1), (100, 1, 1), (64, 64, 1), (32, 32, 32), (7, 3, 2)] {
            for (m, w) in [(1024, 32), (256, 64), (16, 32), (1, 1), (33, 8)] {
                let limits = PipelineLimits::new(m, w);
                for policy in [SizingPolicy::Occupancy, SizingPolicy::WidthAligned] {
                    let group = thread_group_extent(GridExtent::new(gx, gy, gz), limits, policy);
                    assert!(group.total_threads() <= m.max(1), "{group} exceeds {m} for {w}");
                    assert!(group.x >= 1 && group.y >= 1 && group.z >= 1);
                }
            }
        }
    }

    #[test]
    fn test_degenerate_limits_never_yield_zero() {
        for limits in [
            PipelineLimits::new(0, 32),
            PipelineLimits::new(1024, 0),
            PipelineLimits::new(0, 0),
        ] {
            for grid in [
                GridExtent::linear(64),
                GridExtent::planar(8, 8),
                GridExtent::new(4, 4, 4),
            ] {
                let group = thread_group_extent(grid, limits, SizingPolicy::Occupancy);
                assert!(group.x >= 1 && group.y >= 1 && group.z >= 1, "zero axis in {group}");
            }
        }
    }

    #[test]
    fn test_zero_grid_axes_are_clamped() {
        let group = thread_group_extent(GridExtent::new(0, 0, 0), LIMITS, SizingPolicy::Occupancy);
        assert_eq!(group, GroupExtent::new(1024, 1, 1));
    }

    #[test]
    fn test_width_aligned_rounds_down() {
        let group = thread_group_extent(GridExtent::linear(100), LIMITS, SizingPolicy::WidthAligned);
        // min(100, 1024) = 100, rounded down to a multiple of 32
        assert_eq!(group, GroupExtent::new(96, 1, 1));
    }

    #[test]
    fn test_width_aligned_small_grids_stay_exact() {
        // Below the execution width there is nothing to align to.
        let group = thread_group_extent(GridExtent::linear(20), LIMITS, SizingPolicy::WidthAligned);
        assert_eq!(group, GroupExtent::new(20, 1, 1));
    }

    #[test]
    fn test_width_aligned_caps_at_limit() {
        let group = thread_group_extent(GridExtent::linear(4096), LIMITS, SizingPolicy::WidthAligned);
        assert_eq!(group, GroupExtent::new(1024, 1, 1));
    }

    #[test]
    fn test_policies_agree_beyond_one_dimension() {
        for grid in [GridExtent::planar(64, 64), GridExtent::new(16, 16, 16)] {
            assert_eq!(
                thread_group_extent(grid, LIMITS, SizingPolicy::Occupancy),
                thread_group_extent(grid, LIMITS, SizingPolicy::WidthAligned),
            );
        }
    }

    #[test]
    fn test_width_wider_than_cap() {
        // W > M from a misreporting driver: the fast axis clamps to M.
        let group = thread_group_extent(GridExtent::planar(64, 64), PipelineLimits::new(16, 32), SizingPolicy::Occupancy);
        assert_eq!(group, GroupExtent::new(16, 1, 1));
    }

    #[test]
    fn test_request_builder() {
        let request = DispatchRequest::linear(100)
            .bind(BufferHandle::new(0))
            .skip_slot()
            .bind(BufferHandle::new(1))
            .no_wait();

        assert_eq!(request.global, GridExtent::linear(100));
        assert_eq!(
            request.buffers,
            vec![Some(BufferHandle::new(0)), None, Some(BufferHandle::new(1))]
        );
        assert!(!request.wait);
    }

    #[test]
    fn test_default_policy_is_occupancy() {
        assert_eq!(SizingPolicy::default(), SizingPolicy::Occupancy);
    }
}
