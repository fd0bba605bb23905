//! Accumulator-chain analysis.
//!
//! Starting at the accumulator load, follow the loaded value through the
//! edges that can carry it back into the allocation:
//!
//! ```text
//! load ──► scf.yield (loop) ──► iter_arg ──► tmem_alloc     closes the chain
//!      ──► scf.yield (if)   ──► if result
//!      ──► arith.select     ──► select result
//! ```
//!
//! Every edge other than the direct one is divergent: a plain use reached
//! through it means the accumulator may be observed on a path the rewrite
//! cannot enumerate.

use std::collections::HashSet;

use itertools::Itertools;
use mmapipe_ir::op::mma;
use mmapipe_ir::{Graph, OpId, OpKind, ValueId};

/// Result of [`track_acc_chain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccChain {
    /// Carried-value slot through which the loaded accumulator re-enters the allocation.
    pub yield_arg: Option<usize>,
    /// Some use of the accumulator cannot be proven safe.
    pub divergent: bool,
}

/// The tensor-memory allocation feeding `mma`'s accumulator and a load of it.
///
/// Both must live in the MMA's block.
pub fn get_tmem_alloc_and_load(graph: &Graph, mma_op: OpId) -> Option<(OpId, OpId)> {
    let block = graph.parent_block(mma_op);
    let alloc = graph.defining_op(graph.operand(mma_op, mma::D))?;
    if !matches!(graph.kind(alloc), OpKind::TmemAlloc) || graph.parent_block(alloc) != block {
        return None;
    }
    graph
        .users(graph.result(alloc))
        .find(|&user| matches!(graph.kind(user), OpKind::TmemLoad) && graph.parent_block(user) == block)
        .map(|load| (alloc, load))
}

/// Users of the loaded accumulator that read it directly (not selects or yields), in use order.
pub fn direct_acc_uses(graph: &Graph, load: OpId) -> Vec<OpId> {
    graph
        .users(graph.result(load))
        .filter(|&user| !matches!(graph.kind(user), OpKind::Select | OpKind::Yield))
        .unique()
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Reach {
    value: ValueId,
    yield_arg: Option<usize>,
    divergent: bool,
    through_if: bool,
    selects: usize,
    /// Passed a select with no constant side, which can never become an override.
    through_blend: bool,
}

/// Trace the accumulator loaded by `load` back to `alloc` within `for_op`.
///
/// The chain closes only along a path of loop yields plus at most one select
/// with a constant side (the future override point). Closing through an
/// `scf.if`, through a blending select or through several selects counts as
/// divergent, as does any ordinary use reached through a divergent edge or a
/// yield of some other region.
pub fn track_acc_chain(graph: &Graph, for_op: OpId, load: OpId, alloc: OpId) -> AccChain {
    let mut chain = AccChain::default();
    let start = Reach {
        value: graph.result(load),
        yield_arg: None,
        divergent: false,
        through_if: false,
        selects: 0,
        through_blend: false,
    };
    let mut visited = HashSet::from([start.value]);
    let mut queue = vec![start];

    while let Some(reach) = queue.pop() {
        for u in graph.uses(reach.value) {
            let next = match graph.kind(u.owner) {
                OpKind::Yield => match graph.parent_op(u.owner) {
                    Some(parent) if parent == for_op => Some(Reach {
                        value: graph.for_iter_arg(for_op, u.index),
                        yield_arg: Some(u.index),
                        divergent: true,
                        ..reach
                    }),
                    Some(parent) if matches!(graph.kind(parent), OpKind::If) => Some(Reach {
                        value: graph.results(parent)[u.index],
                        divergent: true,
                        through_if: true,
                        ..reach
                    }),
                    _ => {
                        chain.divergent = true;
                        None
                    }
                },
                OpKind::Select => {
                    let owner = u.owner;
                    let resets = graph.is_constant(graph.operand(owner, 1)) || graph.is_constant(graph.operand(owner, 2));
                    Some(Reach {
                        value: graph.result(owner),
                        divergent: true,
                        selects: reach.selects + 1,
                        through_blend: reach.through_blend || !resets,
                        ..reach
                    })
                }
                _ if u.owner == alloc => {
                    if reach.through_if || reach.through_blend || reach.selects > 1 {
                        chain.divergent = true;
                    } else {
                        chain.yield_arg = reach.yield_arg;
                    }
                    None
                }
                _ => {
                    chain.divergent |= reach.divergent;
                    None
                }
            };
            if let Some(next) = next
                && visited.insert(next.value)
            {
                queue.push(next);
            }
        }
    }

    tracing::trace!(load = %load, yield_arg = ?chain.yield_arg, divergent = chain.divergent, "tracked accumulator chain");
    chain
}

/// Carried-value slot the allocation's initial value comes from.
///
/// A reset select in front of the allocation is looked through on its
/// non-constant side.
pub fn alloc_input_slot(graph: &Graph, for_op: OpId, alloc: OpId) -> Option<usize> {
    let mut input = *graph.operands(alloc).first()?;
    if let Some(def) = graph.defining_op(input)
        && matches!(graph.kind(def), OpKind::Select)
    {
        let on_true = graph.operand(def, 1);
        let on_false = graph.operand(def, 2);
        input = match (graph.is_constant(on_true), graph.is_constant(on_false)) {
            (true, false) => on_false,
            (false, true) => on_true,
            _ => return None,
        };
    }
    graph.as_iter_arg(input).filter(|&(owner, _)| owner == for_op).map(|(_, slot)| slot)
}
