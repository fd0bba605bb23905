//! Override-point detection.
//!
//! The accumulator is overridden where it stops being fed by the MMA's own
//! previous result: a reset select, a fresh value, or the MMA's `use_d` flag
//! going false. Detection is read-only; a negated condition is reported as
//! such and materialized by the rewrite.

use std::collections::HashSet;

use mmapipe_ir::op::mma;
use mmapipe_ir::{Graph, OpId, OpKind, ValueId};

use super::{AccOverridePoint, OverrideCondition};
use crate::error::SkipReason;

/// Follow `value` backward through `for_op`'s carried values.
///
/// Returns the value reached and the number of iterations crossed, or `None`
/// when the trace runs in a cycle.
fn trace_carried(graph: &Graph, for_op: OpId, value: ValueId) -> Option<(ValueId, usize)> {
    let mut seen = HashSet::new();
    let mut current = value;
    let mut distance = 0;
    while let Some((owner, slot)) = graph.as_iter_arg(current)
        && owner == for_op
    {
        if !seen.insert(current) {
            return None;
        }
        let yield_op = graph.for_yield(for_op).ok()?;
        current = graph.operand(yield_op, slot);
        distance += 1;
    }
    Some((current, distance))
}

/// Where the initial value of `alloc` is reset inside `for_op`.
///
/// Errors only for an override produced by an `scf.if`, which cannot be
/// turned into a buffer-slot update.
pub fn acc_override_point_in_loop(
    graph: &Graph,
    for_op: OpId,
    alloc: OpId,
    load: OpId,
) -> Result<Option<AccOverridePoint>, SkipReason> {
    let Some(&input) = graph.operands(alloc).first() else {
        // Uninitialized accumulator: nothing is carried, every iteration starts fresh.
        return Ok(Some(AccOverridePoint { op: alloc, condition: None, init_value: None, distance: 0 }));
    };
    let Some((value, distance)) = trace_carried(graph, for_op, input) else {
        return Ok(None);
    };
    let Some(def) = graph.defining_op(value) else {
        return Ok(None);
    };

    let point = match graph.kind(def) {
        OpKind::Select => {
            let condition = graph.operand(def, 0);
            let on_true = graph.operand(def, 1);
            let on_false = graph.operand(def, 2);
            match (graph.is_constant(on_true), graph.is_constant(on_false)) {
                (true, true) => AccOverridePoint { op: def, condition: None, init_value: Some(value), distance },
                (true, false) => AccOverridePoint {
                    op: def,
                    condition: Some(OverrideCondition { value: condition, negated: false }),
                    init_value: Some(on_true),
                    distance,
                },
                (false, true) => AccOverridePoint {
                    op: def,
                    condition: Some(OverrideCondition { value: condition, negated: true }),
                    init_value: Some(on_false),
                    distance,
                },
                (false, false) => return Ok(None),
            }
        }
        OpKind::If => return Err(SkipReason::OverrideThroughIf { alloc, if_op: def }),
        _ if def == load => return Ok(None),
        _ => AccOverridePoint { op: def, condition: None, init_value: Some(value), distance },
    };
    Ok(Some(point))
}

/// Override derived from the MMA's `use_d` flag: the accumulator is ignored whenever the flag is false.
pub fn acc_use_flag_false_in_loop(graph: &Graph, for_op: OpId, flag: ValueId) -> Option<AccOverridePoint> {
    let (value, distance) = trace_carried(graph, for_op, flag)?;
    let def = graph.defining_op(value)?;
    if !graph.is_ancestor(for_op, def) {
        return None;
    }
    assert!(graph.value_type(value).is_bool(), "use_d flag must be i1, got {}", graph.value_type(value));
    Some(AccOverridePoint {
        op: def,
        condition: Some(OverrideCondition { value, negated: true }),
        init_value: None,
        distance,
    })
}

/// Override point of `mma_op`'s accumulator, falling back to its `use_d` flag.
pub fn acc_override_or_flag_false(
    graph: &Graph,
    for_op: OpId,
    mma_op: OpId,
    alloc: OpId,
    load: OpId,
) -> Result<Option<AccOverridePoint>, SkipReason> {
    if let Some(point) = acc_override_point_in_loop(graph, for_op, alloc, load)? {
        return Ok(Some(point));
    }
    Ok(acc_use_flag_false_in_loop(graph, for_op, graph.operand(mma_op, mma::USE_D)))
}
