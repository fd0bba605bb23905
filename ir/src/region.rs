//! Structured control-flow helpers: loop-carried values and loop rebuilding.
//!
//! A loop's carried-value list is part of its signature (operands, body block
//! arguments, yield operands and results must all agree in arity), so growing
//! or shrinking it retires the old `scf.for` and substitutes a new one that
//! takes over the old body block.

use snafu::{OptionExt, ensure};

use crate::error::{MissingTerminatorSnafu, NotALoopSnafu, Result};
use crate::graph::{BlockId, Graph, InsertPoint, OpId, ValueId};
use crate::op::{OpKind, for_op};
use crate::types::Type;

impl Graph {
    pub fn ensure_loop(&self, op: OpId) -> Result<()> {
        ensure!(matches!(self.kind(op), OpKind::For), NotALoopSnafu { op, name: self.name(op) });
        Ok(())
    }

    pub fn for_body(&self, for_op: OpId) -> BlockId {
        self.regions(for_op)[0]
    }

    pub fn for_induction_var(&self, for_op: OpId) -> ValueId {
        self.block_args(self.for_body(for_op))[0]
    }

    /// Body arguments standing for the carried values (induction variable excluded).
    pub fn for_iter_args(&self, for_op: OpId) -> &[ValueId] {
        &self.block_args(self.for_body(for_op))[1..]
    }

    pub fn for_iter_arg(&self, for_op: OpId, index: usize) -> ValueId {
        self.for_iter_args(for_op)[index]
    }

    pub fn for_inits(&self, for_op: OpId) -> &[ValueId] {
        &self.operands(for_op)[for_op::FIRST_INIT..]
    }

    pub fn for_init(&self, for_op: OpId, index: usize) -> ValueId {
        self.for_inits(for_op)[index]
    }

    pub fn for_result(&self, for_op: OpId, index: usize) -> ValueId {
        self.results(for_op)[index]
    }

    pub fn num_iter_args(&self, for_op: OpId) -> usize {
        self.results(for_op).len()
    }

    /// The `scf.yield` terminating the loop body.
    pub fn for_yield(&self, for_op: OpId) -> Result<OpId> {
        self.terminator(self.for_body(for_op)).context(MissingTerminatorSnafu { op: for_op })
    }

    /// If `value` is a carried-value argument of a loop body, return `(loop, carried index)`.
    pub fn as_iter_arg(&self, value: ValueId) -> Option<(OpId, usize)> {
        let (block, index) = self.block_arg_position(value)?;
        let owner = self.block_parent_op(block)?;
        (matches!(self.kind(owner), OpKind::For) && index > 0).then(|| (owner, index - 1))
    }

    pub fn if_then(&self, if_op: OpId) -> BlockId {
        self.regions(if_op)[0]
    }

    pub fn if_else(&self, if_op: OpId) -> BlockId {
        self.regions(if_op)[1]
    }

    /// Replace `for_op` by a loop carrying `new_inits` in addition to its current values.
    ///
    /// The new carried values get fresh body arguments appended after the existing
    /// ones; the yield is left untouched, so callers must follow up with
    /// [`Graph::append_to_for_yield`]. Uses of the old results are redirected to the
    /// matching results of the new loop and the old loop is erased.
    pub fn replace_for_with_new_signature(&mut self, for_op: OpId, new_inits: &[ValueId]) -> Result<OpId> {
        self.ensure_loop(for_op)?;
        let mut operands = self.operands(for_op).to_vec();
        operands.extend_from_slice(new_inits);
        let mut types: Vec<Type> = self.results(for_op).iter().map(|&v| self.value_type(v).clone()).collect();
        types.extend(new_inits.iter().map(|&v| self.value_type(v).clone()));

        let new_for = self.create_op(InsertPoint::Before(for_op), OpKind::For, &operands, &types, 0);
        self.copy_attrs(for_op, new_for);

        let body = self.for_body(for_op);
        self.move_block(body, new_for);
        for &init in new_inits {
            let ty = self.value_type(init).clone();
            self.add_block_arg(body, ty);
        }

        let old_results = self.results(for_op).to_vec();
        for (index, old) in old_results.into_iter().enumerate() {
            let new = self.for_result(new_for, index);
            self.replace_all_uses_with(old, new);
        }
        self.erase_op(for_op)?;
        tracing::trace!(old = ?for_op, new = ?new_for, added = new_inits.len(), "rebuilt loop with extended signature");
        Ok(new_for)
    }

    /// Append values to the loop's yield.
    pub fn append_to_for_yield(&mut self, for_op: OpId, values: &[ValueId]) -> Result<()> {
        let yield_op = self.for_yield(for_op)?;
        for &value in values {
            self.push_operand(yield_op, value);
        }
        Ok(())
    }

    /// Replace `for_op` by a loop without the carried values at `drop`.
    ///
    /// The dropped body arguments and results must have no remaining uses.
    pub(crate) fn drop_for_iter_args(&mut self, for_op: OpId, drop: &[usize]) -> Result<OpId> {
        self.ensure_loop(for_op)?;
        let yield_op = self.for_yield(for_op)?;
        let keep: Vec<usize> = (0..self.num_iter_args(for_op)).filter(|i| !drop.contains(i)).collect();

        let mut operands = self.operands(for_op)[..for_op::FIRST_INIT].to_vec();
        operands.extend(keep.iter().map(|&i| self.for_init(for_op, i)));
        let types: Vec<Type> = keep.iter().map(|&i| self.value_type(self.for_result(for_op, i)).clone()).collect();
        let yielded: Vec<ValueId> = keep.iter().map(|&i| self.operand(yield_op, i)).collect();

        let new_for = self.create_op(InsertPoint::Before(for_op), OpKind::For, &operands, &types, 0);
        self.copy_attrs(for_op, new_for);
        self.set_operands(yield_op, &yielded);

        let body = self.for_body(for_op);
        self.move_block(body, new_for);
        let arg_positions: Vec<usize> = drop.iter().map(|i| i + 1).collect();
        self.remove_block_args(body, &arg_positions);

        for (new_index, &old_index) in keep.iter().enumerate() {
            let old = self.for_result(for_op, old_index);
            let new = self.for_result(new_for, new_index);
            self.replace_all_uses_with(old, new);
        }
        self.erase_op(for_op)?;
        Ok(new_for)
    }
}
