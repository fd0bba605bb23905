//! Clean-up canonicalization.
//!
//! Two rewrites iterated to a fixed point:
//!
//! - trivially dead operations (no side effects beyond allocating their own
//!   result, no uses) are erased;
//! - loop-carried values that carry nothing are folded away: values yielded
//!   unchanged, values whose yield is their own initial value, and values used
//!   neither in the body nor after the loop.
//!
//! Running it on an already canonical graph changes nothing.

use crate::error::{CanonicalizationDidNotConvergeSnafu, Result};
use crate::graph::{Graph, OpId};
use crate::op::OpKind;

/// Upper bound on clean-up rounds before reporting non-convergence.
pub const MAX_ITERATIONS: usize = 256;

impl Graph {
    /// Canonicalize the whole unit. Returns whether anything changed.
    pub fn canonicalize(&mut self) -> Result<bool> {
        let mut changed = false;
        for iteration in 0..MAX_ITERATIONS {
            let erased = self.erase_dead_ops()?;
            let folded = self.fold_loop_carried_values()?;
            tracing::trace!(iteration, erased, folded, "canonicalization round");
            if erased == 0 && folded == 0 {
                return Ok(changed);
            }
            changed = true;
        }
        CanonicalizationDidNotConvergeSnafu { iterations: MAX_ITERATIONS }.fail()
    }

    /// Whether `op` can be removed without changing behaviour.
    pub fn is_trivially_dead(&self, op: OpId) -> bool {
        let kind = self.kind(op);
        let removable = kind.is_pure() || matches!(kind, OpKind::TmemAlloc | OpKind::LocalAlloc);
        removable && self.regions(op).is_empty() && self.results(op).iter().all(|&v| !self.has_uses(v))
    }

    fn erase_dead_ops(&mut self) -> Result<usize> {
        let mut erased = 0;
        for op in self.all_ops().into_iter().rev() {
            if !self.is_erased(op) && self.is_trivially_dead(op) {
                self.erase_op(op)?;
                erased += 1;
            }
        }
        Ok(erased)
    }

    fn fold_loop_carried_values(&mut self) -> Result<usize> {
        let loops: Vec<OpId> = self.all_ops().into_iter().filter(|&op| matches!(self.kind(op), OpKind::For)).collect();
        let mut folded = 0;
        for for_op in loops {
            if self.is_erased(for_op) {
                continue;
            }
            let yield_op = self.for_yield(for_op)?;
            let mut drop = Vec::new();
            for index in 0..self.num_iter_args(for_op) {
                let arg = self.for_iter_arg(for_op, index);
                let init = self.for_init(for_op, index);
                let result = self.for_result(for_op, index);
                let yielded = self.operand(yield_op, index);

                if yielded == arg || yielded == init {
                    self.replace_all_uses_with(arg, init);
                    self.replace_all_uses_with(result, init);
                    drop.push(index);
                } else if !self.has_uses(arg) && !self.has_uses(result) {
                    drop.push(index);
                }
            }
            if !drop.is_empty() {
                folded += drop.len();
                let new_for = self.drop_for_iter_args(for_op, &drop)?;
                tracing::trace!(old = ?for_op, new = ?new_for, dropped = ?drop, "folded loop-carried values");
            }
        }
        Ok(folded)
    }
}
