//! Stage assignment for loops whose MMAs were rewritten.
//!
//! The rewrite leaves stage annotations on a handful of operations (the MMA,
//! its wait, the index updates, in-loop accumulator loads). Starting from
//! those, stages spread to producers and consumers until nothing changes;
//! asynchronous copies are then pulled into the stage of whatever reads the
//! buffer they fill, and everything left over runs in stage 0.

use std::collections::HashMap;

use mmapipe_ir::{Graph, OpId, OpKind};

use crate::coarse_schedule::{Cluster, CoarseSchedule};
use crate::error::{DuplicateBarrierWaitSnafu, Result, StageOutOfRangeSnafu, UntracedBufferSnafu};
use crate::expander::{PipeliningOptions, predicate_op};
use crate::mma::{PIPELINE_STAGE_ATTR, find_shmem_alloc};

/// Spread stages to producers (stage 0 first) and consumers (last stage first) until stable.
fn schedule_dependencies(graph: &Graph, for_op: OpId, schedule: &mut CoarseSchedule, cluster: Cluster) {
    let body = graph.for_body(for_op);
    let num_stages = schedule.num_stages;
    let mut round = 0;
    loop {
        let mut changed = false;
        for stage in 0..num_stages {
            for &op in graph.block_ops_without_terminator(body) {
                if schedule.stage_of(op) == Some(stage) {
                    changed |= schedule.insert_deps_of_op(graph, op, stage, cluster, false);
                }
            }
        }
        for stage in (0..num_stages).rev() {
            for &op in graph.block_ops_without_terminator(body) {
                if schedule.stage_of(op) == Some(stage) {
                    changed |= schedule.insert_users_of_op(graph, for_op, op, stage, cluster);
                }
            }
        }
        round += 1;
        tracing::trace!(round, scheduled = schedule.len(), changed, "stage propagation round");
        if !changed {
            break;
        }
    }
}

/// Stage schedule of a rewritten loop, as ordered `(operation, stage)` pairs.
///
/// Consumes the stage annotations: they are gone from the graph afterwards.
#[tracing::instrument(skip_all, fields(for_op = %for_op, num_stages))]
pub fn mma_schedule(graph: &mut Graph, for_op: OpId, num_stages: u32) -> Result<Vec<(OpId, u32)>> {
    let body = graph.for_body(for_op);
    let mut schedule = CoarseSchedule::new(num_stages);
    let cluster = schedule.clusters.new_at_front();

    for &op in graph.block_ops_without_terminator(body) {
        let Some(attr) = graph.attr(op, PIPELINE_STAGE_ATTR) else {
            continue;
        };
        let stage = attr.as_int().unwrap_or(-1);
        let in_range = u32::try_from(stage).ok().filter(|&s| s < num_stages);
        let stage = in_range.ok_or_else(|| StageOutOfRangeSnafu { op, stage, num_stages }.build())?;
        schedule.insert(op, stage, cluster);
    }

    schedule_dependencies(graph, for_op, &mut schedule, cluster);
    align_async_copies(graph, for_op, &mut schedule, cluster)?;
    schedule_dependencies(graph, for_op, &mut schedule, cluster);

    let ops = graph.block_ops_without_terminator(body).to_vec();
    for op in ops {
        graph.remove_attr(op, PIPELINE_STAGE_ATTR);
        schedule.insert_if_absent(op, 0, cluster);
    }

    let final_schedule = schedule.create_final_schedule(graph, for_op)?;
    tracing::debug!(ops = final_schedule.len(), "computed stage schedule");
    Ok(final_schedule)
}

/// Put each asynchronous copy in the earliest stage that reads its buffer, and its barrier wait no later.
fn align_async_copies(graph: &Graph, for_op: OpId, schedule: &mut CoarseSchedule, cluster: Cluster) -> Result<()> {
    let body = graph.for_body(for_op);
    let ops = graph.block_ops_without_terminator(body);

    let mut alloc_to_wait: HashMap<OpId, OpId> = HashMap::new();
    let mut alloc_to_stage: HashMap<OpId, u32> = HashMap::new();
    for &op in ops {
        let kind = graph.kind(op);
        if matches!(kind, OpKind::WaitBarrier) {
            let alloc = find_shmem_alloc(graph, graph.operand(op, 0))
                .ok_or_else(|| UntracedBufferSnafu { op, name: graph.name(op) }.build())?;
            if let Some(&first) = alloc_to_wait.get(&alloc) {
                return DuplicateBarrierWaitSnafu { alloc, first, second: op }.fail();
            }
            alloc_to_wait.insert(alloc, op);
            continue;
        }
        if kind.async_copy_slots().is_some() {
            continue;
        }
        let Some(stage) = schedule.stage_of(op) else {
            continue;
        };
        for &operand in graph.operands(op) {
            if !graph.value_type(operand).is_memdesc() {
                continue;
            }
            if let Some(alloc) = find_shmem_alloc(graph, operand) {
                alloc_to_stage.entry(alloc).and_modify(|s| *s = (*s).min(stage)).or_insert(stage);
            }
        }
    }

    for &op in ops {
        let Some((buffer_slot, barrier_slot)) = graph.kind(op).async_copy_slots() else {
            continue;
        };
        let alloc = find_shmem_alloc(graph, graph.operand(op, buffer_slot))
            .ok_or_else(|| UntracedBufferSnafu { op, name: graph.name(op) }.build())?;
        let stage = alloc_to_stage.get(&alloc).copied().unwrap_or(0);
        schedule.insert(op, stage, cluster);
        tracing::trace!(copy = %op, stage, "aligned asynchronous copy with its reader");

        let Some(barrier_slot) = barrier_slot else {
            continue;
        };
        let barrier_alloc = find_shmem_alloc(graph, graph.operand(op, barrier_slot))
            .ok_or_else(|| UntracedBufferSnafu { op, name: graph.name(op) }.build())?;
        // Several copies may share one barrier: the wait follows the earliest of them.
        if let Some(&wait) = alloc_to_wait.get(&barrier_alloc) {
            schedule.insert_minimum(wait, stage, cluster);
        }
    }
    Ok(())
}

/// Expansion options for a rewritten loop.
pub fn mma_pipelining_options(graph: &mut Graph, for_op: OpId, num_stages: u32) -> Result<PipeliningOptions> {
    let schedule = mma_schedule(graph, for_op, num_stages)?;
    Ok(PipeliningOptions::builder()
        .num_stages(num_stages)
        .schedule(schedule)
        .predicate(predicate_op)
        .build())
}
