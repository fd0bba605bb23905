//! Accumulator analysis and rewrite for asynchronous tensor-core MMAs.
//!
//! Per candidate MMA the flow is strictly:
//!
//! 1. [`chain`]: find the accumulator's tensor-memory alloc/load pair and
//!    trace how the loaded value re-enters the allocation;
//! 2. [`override_point`]: find where the accumulator is reset;
//! 3. [`rewrite`]: decide eligibility, then hoist and multi-buffer the
//!    accumulator and thread a barrier ring around the MMA.
//!
//! Steps 1 and 2 never touch the graph. Step 3 checks every remaining
//! precondition before its first mutation.

pub mod chain;
pub mod operands;
pub mod override_point;
pub mod rewrite;

use mmapipe_ir::{Attribute, Graph, OpId, ValueId};

pub use chain::{AccChain, get_tmem_alloc_and_load, track_acc_chain};
pub use operands::{find_shmem_alloc, mmas_with_multi_buffered_operands};
pub use override_point::{acc_override_or_flag_false, acc_override_point_in_loop, acc_use_flag_false_in_loop};
pub use rewrite::{RingState, plan_mma_rewrite, rewrite_mma};

/// Stage annotation read by the stage scheduler.
pub const PIPELINE_STAGE_ATTR: &str = "mmapipe.pipeline_stage";

/// Marks loops whose MMAs were rewritten and that await scheduling.
pub const PIPELINE_ATTR: &str = "mmapipe.pipeline";

/// Loop-carried values added per rewritten MMA: phase, barrier index, insert index, extract index.
pub const ARGS_PER_MMA: usize = 4;

/// Condition under which an override applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideCondition {
    pub value: ValueId,
    /// The override applies when `value` is false.
    pub negated: bool,
}

/// Where the accumulator is reset to a fresh value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccOverridePoint {
    /// Operation producing the fresh value (or the reset flag).
    pub op: OpId,
    /// `None` means the override happens unconditionally.
    pub condition: Option<OverrideCondition>,
    /// Value to seed the new buffer slot with. `None` keeps the slot's contents.
    pub init_value: Option<ValueId>,
    /// Iterations between the override and the point it reaches the accumulator.
    pub distance: usize,
}

/// Everything known about one MMA's accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmaInfo {
    pub mma: OpId,
    /// Tensor-memory allocation feeding the MMA's accumulator operand.
    pub acc_alloc: OpId,
    /// Load of the accumulator after the MMA.
    pub acc_load: OpId,
    pub acc_def: Option<AccOverridePoint>,
    /// Carried-value slot through which the accumulator reaches the next iteration.
    pub yield_arg: Option<usize>,
    pub multi_buffered: bool,
    /// Populated once the loop carries the ring bookkeeping.
    pub ring: Option<RingState>,
    /// Barrier ring allocation, once created.
    pub barrier_alloc: Option<ValueId>,
}

pub(crate) fn annotate_stage(graph: &mut Graph, op: OpId, stage: u32) {
    graph.set_attr(op, PIPELINE_STAGE_ATTR, Attribute::Int(stage as i64));
}
