//! Shared-memory operand tracing.

use std::collections::HashSet;

use mmapipe_ir::op::mma;
use mmapipe_ir::{Graph, OpId, OpKind, ValueId};

/// The shared-memory allocation behind a memory descriptor.
///
/// Looks through loop-carried values (into the yielded value), transposed
/// views and one slot subview. Returns `None` for anything else.
pub fn find_shmem_alloc(graph: &Graph, value: ValueId) -> Option<OpId> {
    let mut visited = HashSet::new();
    let mut current = value;
    loop {
        if !visited.insert(current) {
            return None;
        }
        if let Some((for_op, slot)) = graph.as_iter_arg(current) {
            let yield_op = graph.for_yield(for_op).ok()?;
            current = graph.operand(yield_op, slot);
            continue;
        }
        let def = graph.defining_op(current)?;
        if matches!(graph.kind(def), OpKind::MemDescTrans) {
            current = graph.operand(def, 0);
            continue;
        }
        return match graph.kind(def) {
            OpKind::LocalAlloc => Some(def),
            OpKind::MemDescSubview => graph
                .defining_op(graph.operand(def, 0))
                .filter(|&alloc| matches!(graph.kind(alloc), OpKind::LocalAlloc)),
            _ => None,
        };
    }
}

/// Keep the MMAs whose A and B operands live in shared memory allocated outside `for_op`.
///
/// Those operands are already buffered per iteration, so the MMA can run ahead of them.
pub fn mmas_with_multi_buffered_operands(graph: &Graph, for_op: OpId, mmas: &[OpId]) -> Vec<OpId> {
    let outside = |value: ValueId| find_shmem_alloc(graph, value).is_some_and(|alloc| !graph.is_ancestor(for_op, alloc));
    mmas.iter()
        .copied()
        .filter(|&op| outside(graph.operand(op, mma::A)) && outside(graph.operand(op, mma::B)))
        .collect()
}
