//! Backward slices.

use std::collections::HashSet;

use crate::graph::{Graph, OpId};

/// Options for [`Graph::backward_slice`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceOptions {
    /// Stop at block arguments instead of continuing into the owning operation.
    pub omit_block_arguments: bool,
}

impl Graph {
    /// Every operation `op` transitively depends on through its (nested) operands.
    ///
    /// The result is in discovery order and excludes `op` itself.
    pub fn backward_slice(&self, op: OpId, options: SliceOptions) -> Vec<OpId> {
        let mut visited = HashSet::new();
        let mut slice = Vec::new();
        let mut worklist = vec![op];
        while let Some(current) = worklist.pop() {
            for value in self.nested_operands(current) {
                let producer = match self.defining_op(value) {
                    Some(def) => Some(def),
                    None if options.omit_block_arguments => None,
                    None => self.value_block(value).and_then(|block| self.block_parent_op(block)),
                };
                if let Some(producer) = producer
                    && producer != op
                    && visited.insert(producer)
                {
                    slice.push(producer);
                    worklist.push(producer);
                }
            }
        }
        slice
    }
}
