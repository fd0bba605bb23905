//! Boundary with the pipeline expander.
//!
//! The expander turns a stage schedule into prologue, steady state and
//! epilogue code. It is supplied by the caller through [`PipelineExpander`];
//! this module only defines what it receives.

use bon::bon;
use mmapipe_ir::{Builder, Graph, OpId, OpKind, ValueId};

use crate::error::{CannotPredicateSnafu, Result};

/// Guard `op` with `pred`. Returns the (possibly replaced) operation.
pub type PredicateFn = fn(&mut Graph, OpId, ValueId) -> Result<OpId>;

/// Everything the expander needs for one loop.
#[derive(Debug, Clone)]
pub struct PipeliningOptions {
    pub num_stages: u32,
    /// Body operations with their stage, in emission order.
    pub schedule: Vec<(OpId, u32)>,
    /// Emit a separate epilogue instead of predicating the last iterations.
    pub peel_epilogue: bool,
    /// Predicates operations of iterations past the trip count.
    pub predicate: Option<PredicateFn>,
    /// The trip count may be unknown at compile time.
    pub support_dynamic_loops: bool,
}

#[bon]
impl PipeliningOptions {
    #[builder]
    pub fn builder(
        num_stages: u32,
        schedule: Vec<(OpId, u32)>,
        #[builder(default = false)] peel_epilogue: bool,
        predicate: Option<PredicateFn>,
        #[builder(default = true)] support_dynamic_loops: bool,
    ) -> Self {
        Self { num_stages, schedule, peel_epilogue, predicate, support_dynamic_loops }
    }

    /// Stage assigned to `op`, if scheduled.
    pub fn stage_of(&self, op: OpId) -> Option<u32> {
        self.schedule.iter().find(|(o, _)| *o == op).map(|&(_, stage)| stage)
    }
}

/// Pipeline expansion engine.
pub trait PipelineExpander {
    /// Expand `for_op` according to `options`. Returns the loop that replaces it.
    fn pipeline_for_loop(&mut self, graph: &mut Graph, for_op: OpId, options: &PipeliningOptions) -> Result<OpId>;
}

/// `pred && operand(slot)`, stored back into `slot`.
fn and_into_slot(graph: &mut Graph, op: OpId, slot: usize, pred: ValueId) -> Result<()> {
    let current = graph.operand(op, slot);
    let guarded = Builder::before(graph, op).andi(pred, current);
    graph.set_operand(op, slot, guarded)?;
    Ok(())
}

/// Default predication of scheduled operations.
///
/// Pure operations run unguarded. Side-effecting operations the
/// transform knows get their predicate (or mask) and-ed with `pred`; any
/// other side effect is refused.
pub fn predicate_op(graph: &mut Graph, op: OpId, pred: ValueId) -> Result<OpId> {
    let kind = graph.kind(op).clone();
    if kind.is_pure() || matches!(kind, OpKind::TmemAlloc) {
        return Ok(op);
    }
    match kind {
        OpKind::If => and_into_slot(graph, op, 0, pred)?,
        OpKind::AsyncCopyGlobalToLocal | OpKind::WaitBarrier => {
            // Optional trailing mask/predicate at slot 2.
            if graph.operands(op).len() > 2 {
                and_into_slot(graph, op, 2, pred)?;
            } else {
                graph.push_operand(op, pred);
            }
        }
        _ => match kind.predicate_slot() {
            Some(slot) => and_into_slot(graph, op, slot, pred)?,
            None => return CannotPredicateSnafu { op, name: graph.name(op) }.fail(),
        },
    }
    Ok(op)
}
