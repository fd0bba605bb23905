//! Hoisting, multi-buffering and the barrier ring.
//!
//! [`plan_mma_rewrite`] decides everything without touching the graph;
//! [`rewrite_mma`] then commits. After the rewrite one MMA looks like:
//!
//! ```text
//! %acc  = tmem_alloc                     (hoisted, N slots if multi-buffered)
//! %bars = local_alloc [N] + init_barrier (one per slot)
//! scf.for ... iter_args(..., %phase, %bar_idx, %ins_idx, %ext_idx) {
//!   mma(a, b, subview(%acc, %ins_idx), ..., subview(%bars, %bar_idx))   stage 0
//!   wait_barrier(subview(%bars, %bar_idx), %phase)                      stage N-1
//!   %bar_idx, %phase advance (phase flips on wrap)                      stage 0
//!   tmem_load(subview(%acc, %ext_idx)) for in-loop readers              stage N-1
//! }
//! inval_barrier + local_dealloc
//! ```

use mmapipe_ir::op::mma;
use mmapipe_ir::{
    Builder, CmpPredicate, Graph, InsertPoint, MemDescType, MemorySpace, OpId, OpKind, ScalarType, SliceOptions,
    Type, ValueId,
};
use snafu::OptionExt;

use super::chain::{alloc_input_slot, direct_acc_uses, get_tmem_alloc_and_load, track_acc_chain};
use super::override_point::acc_override_or_flag_false;
use super::{ARGS_PER_MMA, AccOverridePoint, MmaInfo, OverrideCondition, PIPELINE_STAGE_ATTR, annotate_stage};
use crate::error::{ReadersOutsideLoopSnafu, Result, SkipReason};

/// Loop-carried ring bookkeeping of one rewritten MMA.
///
/// Holds the values current at the end of the rewrite: block arguments
/// right after the loop is extended, the advanced values once their update
/// has been emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingState {
    pub phase: ValueId,
    pub barrier_idx: ValueId,
    pub insert_idx: ValueId,
    pub extract_idx: ValueId,
    /// Carried-value index of the phase; the three indices follow it.
    pub first_slot: usize,
}

impl RingState {
    /// Carried-value index of the extract index.
    pub fn extract_slot(&self) -> usize {
        self.first_slot + 3
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Decide whether `mma_op` in `for_op` can be rewritten, and how.
///
/// Read-only: on `Err` the graph is exactly as it was.
pub fn plan_mma_rewrite(graph: &Graph, for_op: OpId, mma_op: OpId) -> Result<MmaInfo, SkipReason> {
    let body = graph.for_body(for_op);
    if graph.parent_block(mma_op) != Some(body) {
        return Err(SkipReason::NestedMma { mma: mma_op });
    }

    let slice = graph.backward_slice(mma_op, SliceOptions { omit_block_arguments: true });
    if let Some(&staged) = slice.iter().find(|&&op| graph.has_attr(op, PIPELINE_STAGE_ATTR)) {
        return Err(SkipReason::AlreadyStaged { mma: mma_op, staged });
    }

    let (acc_alloc, acc_load) =
        get_tmem_alloc_and_load(graph, mma_op).ok_or(SkipReason::NoAllocLoadPair { mma: mma_op })?;

    let chain = track_acc_chain(graph, for_op, acc_load, acc_alloc);
    if chain.divergent {
        return Err(SkipReason::DivergentAccumulator { load: acc_load });
    }
    if let Some(closing) = chain.yield_arg {
        let alloc_input = alloc_input_slot(graph, for_op, acc_alloc);
        if alloc_input != Some(closing) {
            return Err(SkipReason::ChainMismatch { closing, alloc_input });
        }
    }

    let acc_def = acc_override_or_flag_false(graph, for_op, mma_op, acc_alloc, acc_load)?;
    if let Some(def) = acc_def
        && def.distance > 1
    {
        return Err(SkipReason::OverrideTooFar { distance: def.distance });
    }

    // Readers inside the loop would race the next MMA on a single buffer; a
    // new slot can only be seeded where the accumulator is overridden anyway.
    let requires_multi = !direct_acc_uses(graph, acc_load).is_empty();
    if requires_multi && acc_def.is_none() {
        return Err(SkipReason::InfeasibleBuffering { load: acc_load });
    }
    // A fresh value is written while the previous MMA may still be running, so it goes to the next slot.
    let seeds_fresh_value = acc_def.is_some_and(|def| def.init_value.is_some());

    if let Some(def) = acc_def
        && let Some(condition) = def.condition
        && (requires_multi || def.init_value.is_some())
    {
        let value = condition.value;
        if graph.value_block(value) != Some(body) && !graph.is_defined_outside(value, for_op) {
            return Err(SkipReason::ConditionNotInBody { condition: value });
        }
    }

    check_acc_uses(graph, for_op, mma_op, acc_alloc, acc_load, acc_def, chain.yield_arg)?;

    Ok(MmaInfo {
        mma: mma_op,
        acc_alloc,
        acc_load,
        acc_def,
        yield_arg: chain.yield_arg,
        multi_buffered: requires_multi || seeds_fresh_value,
        ring: None,
        barrier_alloc: None,
    })
}

/// Override select that becomes dead once the accumulator is hoisted.
fn absorbed_select(
    graph: &Graph,
    for_op: OpId,
    acc_alloc: OpId,
    acc_def: Option<AccOverridePoint>,
    yield_arg: Option<usize>,
) -> Option<OpId> {
    let op = acc_def?.op;
    if !matches!(graph.kind(op), OpKind::Select) {
        return None;
    }
    let yield_op = graph.for_yield(for_op).ok()?;
    graph
        .uses(graph.result(op))
        .iter()
        .all(|u| (u.owner == acc_alloc && u.index == 0) || (u.owner == yield_op && Some(u.index) == yield_arg))
        .then_some(op)
}

/// Every use of the old allocation and load must be one the rewrite redirects or removes.
fn check_acc_uses(
    graph: &Graph,
    for_op: OpId,
    mma_op: OpId,
    acc_alloc: OpId,
    acc_load: OpId,
    acc_def: Option<AccOverridePoint>,
    yield_arg: Option<usize>,
) -> Result<(), SkipReason> {
    let unsupported = |user: OpId| SkipReason::UnsupportedAccumulatorUse { user, name: graph.name(user) };

    for u in graph.uses(graph.result(acc_alloc)) {
        let redirected = (u.owner == mma_op && u.index == mma::D) || u.owner == acc_load;
        if !redirected {
            return Err(unsupported(u.owner));
        }
    }

    let select = absorbed_select(graph, for_op, acc_alloc, acc_def, yield_arg);
    for u in graph.uses(graph.result(acc_load)) {
        let removed = match graph.kind(u.owner) {
            OpKind::Yield => graph.parent_op(u.owner) == Some(for_op) && Some(u.index) == yield_arg,
            OpKind::Select => Some(u.owner) == select,
            _ => true,
        };
        if !removed {
            return Err(unsupported(u.owner));
        }
    }
    Ok(())
}

// ============================================================================
// Rewrite
// ============================================================================

/// Commit the rewrite planned in `info`. Returns the rebuilt loop.
#[tracing::instrument(skip_all, fields(mma = %info.mma, multi_buffered = info.multi_buffered))]
pub fn rewrite_mma(graph: &mut Graph, for_op: OpId, info: &mut MmaInfo, num_stages: u32) -> Result<OpId> {
    assert!(num_stages >= 1, "pipeline needs at least one stage");
    let (for_op, mut ring) = extend_loop(graph, for_op)?;
    annotate_stage(graph, info.mma, 0);

    hoist_acc_alloc(graph, for_op, info, &mut ring, num_stages)?;
    create_barrier_ring(graph, for_op, info, &mut ring, num_stages)?;
    info.ring = Some(ring);

    tracing::debug!(for_op = %for_op, acc_alloc = %info.acc_alloc, "rewrote MMA");
    Ok(for_op)
}

/// Rebuild the loop with phase, barrier index, insert index and extract index, all starting at zero.
fn extend_loop(graph: &mut Graph, for_op: OpId) -> Result<(OpId, RingState)> {
    let first_slot = graph.num_iter_args(for_op);
    let zero = Builder::before(graph, for_op).const_i32(0);
    let for_op = graph.replace_for_with_new_signature(for_op, &[zero; ARGS_PER_MMA])?;

    let [phase, barrier_idx, insert_idx, extract_idx] =
        std::array::from_fn(|i| graph.for_iter_arg(for_op, first_slot + i));
    graph.append_to_for_yield(for_op, &[phase, barrier_idx, insert_idx, extract_idx])?;

    Ok((for_op, RingState { phase, barrier_idx, insert_idx, extract_idx, first_slot }))
}

fn hoist_acc_alloc(
    graph: &mut Graph,
    for_op: OpId,
    info: &mut MmaInfo,
    ring: &mut RingState,
    num_stages: u32,
) -> Result<()> {
    let Type::MemDesc(old_ty) = graph.value_type(graph.result(info.acc_alloc)).clone() else {
        unreachable!("tmem_alloc always yields a memory descriptor");
    };
    let new_ty = if info.multi_buffered {
        old_ty.multi_buffered(i64::from(num_stages))
    } else {
        MemDescType { mutable: true, ..old_ty }
    };

    let mut b = Builder::before(graph, for_op);
    let new_alloc_op = b.create(OpKind::TmemAlloc, &[], &[Type::MemDesc(new_ty)]);
    let new_alloc = b.graph().result(new_alloc_op);
    if let Some(k) = info.yield_arg {
        let init = b.graph().for_init(for_op, k);
        let slot = if info.multi_buffered { b.subview_at(new_alloc, 0) } else { new_alloc };
        let always = b.const_bool(true);
        b.tmem_store(slot, init, always);
    }

    let insert_slice =
        if info.multi_buffered { Builder::before(graph, info.mma).subview(new_alloc, ring.insert_idx) } else { new_alloc };
    graph.set_operand(info.mma, mma::D, insert_slice)?;

    update_acc_uses_in_loop(graph, for_op, info, ring, new_alloc, num_stages)?;
    update_acc_uses_after_loop(graph, for_op, info, ring, new_alloc);

    // Short-circuit the carried accumulator; clean-up folds the slot away.
    if let Some(k) = info.yield_arg {
        let yield_op = graph.for_yield(for_op)?;
        let init = graph.for_init(for_op, k);
        graph.set_operand(yield_op, k, init)?;
    }

    if let Some(def) = info.acc_def
        && info.multi_buffered
    {
        update_acc_defs_in_loop(graph, for_op, def, ring, new_alloc, num_stages)?;
    }

    erase_replaced(graph, info)?;
    info.acc_alloc = new_alloc_op;
    Ok(())
}

/// Route in-loop readers through one fresh load of the extract slot.
fn update_acc_uses_in_loop(
    graph: &mut Graph,
    for_op: OpId,
    info: &MmaInfo,
    ring: &RingState,
    new_alloc: ValueId,
    num_stages: u32,
) -> Result<()> {
    let direct = direct_acc_uses(graph, info.acc_load);
    if direct.is_empty() {
        return Ok(());
    }
    let dom = graph
        .nearest_common_dominator(&direct)
        .filter(|&dom| dom != for_op && graph.is_ancestor(for_op, dom))
        .context(ReadersOutsideLoopSnafu { load: info.acc_load, for_op })?;
    let old = graph.result(info.acc_load);
    let ty = graph.value_type(old).clone();

    let mut b = Builder::before(graph, dom);
    let slice = if info.multi_buffered { b.subview(new_alloc, ring.extract_idx) } else { new_alloc };
    let load_op = b.create(OpKind::TmemLoad, &[slice], &[ty]);
    let load = graph.result(load_op);

    if let Some(anchor) = graph.find_ancestor_op_in_block(graph.for_body(for_op), load_op) {
        annotate_stage(graph, anchor, num_stages - 1);
    }
    for user in direct {
        graph.replace_uses_of_with(user, old, load);
    }
    Ok(())
}

/// Reload the final accumulator after the loop if its carried result is used.
fn update_acc_uses_after_loop(graph: &mut Graph, for_op: OpId, info: &MmaInfo, ring: &RingState, new_alloc: ValueId) {
    let Some(k) = info.yield_arg else {
        return;
    };
    let result = graph.for_result(for_op, k);
    if !graph.has_uses(result) {
        return;
    }
    let ty = graph.value_type(result).clone();
    let extract = graph.for_result(for_op, ring.extract_slot());

    let mut b = Builder::after(graph, for_op);
    let slice = if info.multi_buffered { b.subview(new_alloc, extract) } else { new_alloc };
    let load = b.tmem_load(slice, ty);
    graph.replace_all_uses_with(result, load);
}

/// Emit the negation of a negated override condition right after its definition.
fn materialize_condition(graph: &mut Graph, condition: OverrideCondition) -> ValueId {
    if !condition.negated {
        return condition.value;
    }
    let ip = match graph.defining_op(condition.value) {
        Some(def) => InsertPoint::After(def),
        None => InsertPoint::Start(graph.value_block(condition.value).expect("block arguments belong to a block")),
    };
    let mut b = Builder::new(graph, ip);
    let always = b.const_bool(true);
    b.xori(condition.value, always)
}

/// Insertion point for the override bookkeeping: after both the override and its condition.
fn override_anchor(graph: &Graph, for_op: OpId, def: &AccOverridePoint, condition: Option<ValueId>) -> InsertPoint {
    let body = graph.for_body(for_op);
    [Some(def.op), condition.and_then(|c| graph.defining_op(c))]
        .into_iter()
        .flatten()
        .filter(|&op| graph.parent_block(op) == Some(body))
        .max_by_key(|&op| graph.position_in_block(op))
        .map_or(InsertPoint::Start(body), InsertPoint::After)
}

fn select_op(b: &mut Builder<'_>, condition: ValueId, on_true: ValueId, on_false: ValueId) -> (OpId, ValueId) {
    let ty = b.graph().value_type(on_true).clone();
    let op = b.create(OpKind::Select, &[condition, on_true, on_false], &[ty]);
    (op, b.graph().result(op))
}

/// `index + 1` wrapped to zero at `n`, kept as is unless `condition` holds.
fn advance_index(
    b: &mut Builder<'_>,
    index: ValueId,
    n: ValueId,
    zero: ValueId,
    one: ValueId,
    condition: Option<ValueId>,
) -> (OpId, ValueId) {
    let inc = b.addi(index, one);
    let wrap = b.cmpi(CmpPredicate::Eq, inc, n);
    let (mut op, mut next) = select_op(b, wrap, zero, inc);
    if let Some(condition) = condition {
        (op, next) = select_op(b, condition, next, index);
    }
    (op, next)
}

fn replace_uses_dominated_by(graph: &mut Graph, dominator: OpId, old: ValueId, new: ValueId) {
    graph.replace_uses_with_if(old, new, |g, u| g.properly_dominates(dominator, u.owner));
}

/// Advance the insert and extract indices at the override and seed the new slot.
fn update_acc_defs_in_loop(
    graph: &mut Graph,
    for_op: OpId,
    def: AccOverridePoint,
    ring: &mut RingState,
    new_alloc: ValueId,
    num_stages: u32,
) -> Result<()> {
    let condition = def.condition.map(|c| materialize_condition(graph, c));
    let ip = override_anchor(graph, for_op, &def, condition);

    let mut b = Builder::new(graph, ip);
    let n = b.const_i32(i64::from(num_stages));
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let (insert_op, new_insert) = advance_index(&mut b, ring.insert_idx, n, zero, one, condition);
    let (extract_op, new_extract) = advance_index(&mut b, ring.extract_idx, n, zero, one, condition);
    let store = def.init_value.map(|init| {
        let slot = b.subview(new_alloc, new_insert);
        let pred = match condition {
            Some(c) => c,
            None => b.const_bool(true),
        };
        b.tmem_store(slot, init, pred)
    });

    annotate_stage(graph, insert_op, 0);
    annotate_stage(graph, extract_op, 1.min(num_stages - 1));
    if let Some(store) = store {
        annotate_stage(graph, store, 0);
    }

    let yield_op = graph.for_yield(for_op)?;
    graph.replace_uses_of_with(yield_op, ring.insert_idx, new_insert);
    graph.replace_uses_of_with(yield_op, ring.extract_idx, new_extract);
    if def.distance == 0 {
        replace_uses_dominated_by(graph, insert_op, ring.insert_idx, new_insert);
        replace_uses_dominated_by(graph, extract_op, ring.extract_idx, new_extract);
    }

    ring.insert_idx = new_insert;
    ring.extract_idx = new_extract;
    Ok(())
}

/// Erase the old load, the old allocation and an absorbed override select.
fn erase_replaced(graph: &mut Graph, info: &MmaInfo) -> Result<()> {
    let select = info.acc_def.map(|d| d.op).filter(|&op| matches!(graph.kind(op), OpKind::Select));
    let mut pending: Vec<OpId> = select.into_iter().chain([info.acc_load, info.acc_alloc]).collect();

    let unused = |graph: &Graph, op: OpId| graph.results(op).iter().all(|&v| !graph.has_uses(v));
    while let Some(pos) = pending.iter().position(|&op| unused(graph, op)) {
        let op = pending.swap_remove(pos);
        graph.erase_op(op)?;
    }
    // An override select may stay alive as the seed value; the accumulator ops may not.
    for op in pending {
        if Some(op) != select {
            graph.erase_op(op)?;
        }
    }
    Ok(())
}

fn assign_barrier(graph: &mut Graph, mma_op: OpId, barrier: ValueId) -> Result<()> {
    let OpKind::Mma { scaled, has_barrier } = *graph.kind(mma_op) else {
        unreachable!("{mma_op} is not an MMA");
    };
    if has_barrier {
        graph.set_operand(mma_op, mma::barrier(scaled), barrier)?;
    } else {
        graph.push_operand(mma_op, barrier);
        *graph.kind_mut(mma_op) = OpKind::Mma { scaled, has_barrier: true };
    }
    Ok(())
}

/// Allocate `num_stages` barriers, signal the MMA on the current one and wait on it right after.
fn create_barrier_ring(
    graph: &mut Graph,
    for_op: OpId,
    info: &mut MmaInfo,
    ring: &mut RingState,
    num_stages: u32,
) -> Result<()> {
    let depth = i64::from(num_stages);

    let mut b = Builder::before(graph, for_op);
    let zero = b.const_i32(0);
    let one = b.const_i32(1);
    let n = b.const_i32(depth);
    let barriers = b.local_alloc(MemDescType::new(vec![depth], ScalarType::I64, MemorySpace::Shared), None);
    for i in 0..depth {
        let view = b.subview_at(barriers, i);
        b.init_barrier(view, 1);
    }

    let slice = Builder::before(graph, info.mma).subview(barriers, ring.barrier_idx);
    assign_barrier(graph, info.mma, slice)?;

    let mut b = Builder::after(graph, info.mma);
    let wait = b.wait_barrier(slice, ring.phase);
    let inc = b.addi(ring.barrier_idx, one);
    let wrap = b.cmpi(CmpPredicate::Eq, inc, n);
    let (barrier_op, new_barrier_idx) = select_op(&mut b, wrap, zero, inc);
    let flipped = b.xori(ring.phase, one);
    let (phase_op, new_phase) = select_op(&mut b, wrap, flipped, ring.phase);

    annotate_stage(graph, wait, num_stages - 1);
    replace_uses_dominated_by(graph, barrier_op, ring.barrier_idx, new_barrier_idx);
    replace_uses_dominated_by(graph, phase_op, ring.phase, new_phase);
    annotate_stage(graph, barrier_op, 0);
    annotate_stage(graph, phase_op, 0);
    ring.barrier_idx = new_barrier_idx;
    ring.phase = new_phase;

    let mut b = Builder::after(graph, for_op);
    for i in 0..depth {
        let view = b.subview_at(barriers, i);
        b.inval_barrier(view);
    }
    b.local_dealloc(barriers);
    info.barrier_alloc = Some(barriers);
    Ok(())
}
