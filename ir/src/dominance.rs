//! Dominance for structured regions.
//!
//! Blocks here never branch to each other, so dominance reduces to nesting plus
//! program order: `a` dominates `b` if `a`'s block encloses `b` and `a` comes
//! first. Queries walk the live graph every time; nothing is cached, so results
//! stay correct across rewrites.

use crate::graph::{BlockId, Graph, OpId, ValueId};

impl Graph {
    /// Whether `a` properly dominates `b`.
    ///
    /// An operation enclosing `b` counts as dominating it.
    pub fn properly_dominates(&self, a: OpId, b: OpId) -> bool {
        if a == b {
            return false;
        }
        let Some(block) = self.parent_block(a) else {
            return false;
        };
        match self.find_ancestor_op_in_block(block, b) {
            Some(ancestor) if ancestor == a => true,
            Some(ancestor) => self.is_before_in_block(a, ancestor),
            None => false,
        }
    }

    /// Whether `value` is available at `op`.
    pub fn value_dominates(&self, value: ValueId, op: OpId) -> bool {
        match self.defining_op(value) {
            Some(def) => self.properly_dominates(def, op),
            None => self.value_block(value).is_some_and(|block| self.find_ancestor_op_in_block(block, op).is_some()),
        }
    }

    /// Innermost block enclosing every block in `blocks`.
    pub fn nearest_common_block(&self, blocks: &[BlockId]) -> Option<BlockId> {
        let (&first, rest) = blocks.split_first()?;
        let mut chain = self.block_chain(first);
        for &block in rest {
            let other = self.block_chain(block);
            chain.retain(|b| other.contains(b));
        }
        chain.first().copied()
    }

    /// `block` followed by every block enclosing it, innermost first.
    fn block_chain(&self, block: BlockId) -> Vec<BlockId> {
        let mut chain = vec![block];
        let mut current = block;
        while let Some(owner) = self.block_parent_op(current)
            && let Some(parent) = self.parent_block(owner)
        {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Earliest operation, in the innermost common block, that is or encloses one of `ops`.
    ///
    /// Inserting right before the returned operation makes a value available to all of `ops`.
    pub fn nearest_common_dominator(&self, ops: &[OpId]) -> Option<OpId> {
        match ops {
            [] => None,
            [single] => Some(*single),
            _ => {
                let blocks: Vec<BlockId> = ops.iter().filter_map(|&op| self.parent_block(op)).collect();
                let block = self.nearest_common_block(&blocks)?;
                let ancestors: Vec<OpId> =
                    ops.iter().filter_map(|&op| self.find_ancestor_op_in_block(block, op)).collect();
                ancestors.into_iter().min_by_key(|&op| self.position_in_block(op))
            }
        }
    }
}
