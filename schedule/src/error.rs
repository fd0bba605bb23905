//! Error types for MMA pipelining.
//!
//! Two layers: [`SkipReason`] is the outcome of the read-only analysis and
//! means "leave this MMA alone"; [`Error`] is fatal and aborts the pass.

use mmapipe_ir::{OpId, ValueId};
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a candidate MMA was left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SkipReason {
    // ── Ineligible construct ────────────────────────────────────────────
    /// The MMA sits inside a conditional within the loop body.
    #[snafu(display("{mma} is nested in a conditional, not directly in the loop body"))]
    NestedMma { mma: OpId },

    /// A or B does not trace back to a shared-memory allocation defined outside the loop.
    #[snafu(display("operands of {mma} are not buffered outside the loop"))]
    OperandsNotMultiBuffered { mma: OpId },

    /// The MMA depends on an operation that already carries a pipeline stage.
    #[snafu(display("{mma} depends on {staged}, which already has a pipeline stage"))]
    AlreadyStaged { mma: OpId, staged: OpId },

    /// No tensor-memory allocation/load pair in the MMA's block.
    #[snafu(display("accumulator of {mma} has no tensor-memory alloc/load pair in its block"))]
    NoAllocLoadPair { mma: OpId },

    // ── Unsafe accumulator flow ─────────────────────────────────────────
    /// The accumulator flows through control paths the rewrite cannot enumerate.
    #[snafu(display("accumulator loaded by {load} has divergent uses"))]
    DivergentAccumulator { load: OpId },

    /// The chain closes on a carried value the allocation does not read.
    #[snafu(display("accumulator chain closes on carried value {closing}, allocation reads {alloc_input:?}"))]
    ChainMismatch { closing: usize, alloc_input: Option<usize> },

    /// The override trace ended on an `scf.if` result.
    #[snafu(display("accumulator override of {alloc} is produced by scf.if {if_op}"))]
    OverrideThroughIf { alloc: OpId, if_op: OpId },

    /// The override is too many iterations away.
    #[snafu(display("accumulator override is {distance} iterations back, at most 1 is supported"))]
    OverrideTooFar { distance: usize },

    /// The override condition is defined inside a nested region of the body.
    #[snafu(display("override condition {condition} is not available in the loop body"))]
    ConditionNotInBody { condition: ValueId },

    // ── Infeasible buffering ────────────────────────────────────────────
    /// Read in the loop (needs multi-buffering) but never overridden (cannot seed the next slot).
    #[snafu(display("accumulator loaded by {load} is read in the loop but never overridden"))]
    InfeasibleBuffering { load: OpId },

    /// A use of the old accumulator the rewrite would leave dangling.
    #[snafu(display("accumulator value is used by {user} ({name}) in a way the rewrite cannot redirect"))]
    UnsupportedAccumulatorUse { user: OpId, name: String },
}

/// Fatal errors.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Error from the graph layer.
    #[snafu(context(false), display("IR error: {source}"))]
    IrError { source: mmapipe_ir::Error },

    /// A pipeline stage annotation outside `[0, num_stages)`.
    #[snafu(display("{op} is annotated with stage {stage}, schedule has {num_stages} stage(s)"))]
    StageOutOfRange { op: OpId, stage: i64, num_stages: u32 },

    /// A shared-memory operand that does not trace back to an allocation.
    #[snafu(display("cannot find the shared-memory allocation behind {op} ({name})"))]
    UntracedBuffer { op: OpId, name: String },

    /// Two barrier waits synchronize the same barrier allocation.
    #[snafu(display("barrier allocation {alloc} is waited on by both {first} and {second}"))]
    DuplicateBarrierWait { alloc: OpId, first: OpId, second: OpId },

    /// In-loop readers of an accumulator that share no point inside the loop to reload it.
    #[snafu(display("readers of accumulator load {load} have no common dominator inside {for_op}"))]
    ReadersOutsideLoop { load: OpId, for_op: OpId },

    /// The rewrite would annotate stages the expander's schedule cannot hold.
    #[snafu(display("ring of {num_stages} stage(s) does not fit a schedule of {schedule_stages} stage(s)"))]
    RingDeeperThanSchedule { num_stages: u32, schedule_stages: u32 },

    /// A body operation without an entry in the final schedule.
    #[snafu(display("{op} ({name}) was left out of the schedule of {for_op}"))]
    Unscheduled { for_op: OpId, op: OpId, name: String },

    /// The predication callback does not know how to guard this operation.
    #[snafu(display("cannot predicate {op} ({name})"))]
    CannotPredicate { op: OpId, name: String },

    /// The pipeline expander rejected a loop.
    #[snafu(display("pipeline expansion of {for_op} failed: {message}"))]
    Expander { for_op: OpId, message: String },
}
