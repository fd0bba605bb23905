//! Entry point: rewrite every eligible MMA, clean up, schedule and expand.

use mmapipe_ir::{Attribute, Graph, OpId, OpKind};
use smallvec::SmallVec;
use snafu::ensure;

use crate::config::PipelineConfig;
use crate::error::{Result, RingDeeperThanScheduleSnafu, SkipReason};
use crate::expander::PipelineExpander;
use crate::mma::{PIPELINE_ATTR, mmas_with_multi_buffered_operands, plan_mma_rewrite, rewrite_mma};
use crate::stage::mma_pipelining_options;

/// A candidate MMA left untouched, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMma {
    pub for_op: OpId,
    pub mma: OpId,
    pub reason: SkipReason,
}

/// Schedule handed to the expander for one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSchedule {
    pub for_op: OpId,
    pub schedule: Vec<(OpId, u32)>,
}

/// Outcome of [`pipeline_mma_loops`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    /// Loops carrying the pipeline attribute after clean-up.
    pub tagged_loops: Vec<OpId>,
    pub skipped: Vec<SkippedMma>,
    pub schedules: Vec<LoopSchedule>,
    /// Clean-up failed; rewrites stand, nothing was scheduled.
    pub cleanup_error: Option<mmapipe_ir::Error>,
}

/// MMAs owned by `for_op` itself, not by a loop nested in it.
fn loop_mmas(graph: &Graph, for_op: OpId) -> SmallVec<[OpId; 4]> {
    let mut mmas = SmallVec::new();
    graph.walk_block(graph.for_body(for_op), &mut |op| {
        if graph.kind(op).is_mma() && graph.parent_loop(op) == Some(for_op) {
            mmas.push(op);
        }
    });
    mmas
}

/// Rewrite the eligible MMAs of one loop. Returns the loop that replaces it, if any MMA was rewritten.
#[tracing::instrument(skip_all, fields(for_op = %for_op))]
fn preprocess_loop(
    graph: &mut Graph,
    for_op: OpId,
    num_stages: u32,
    skipped: &mut Vec<SkippedMma>,
) -> Result<Option<OpId>> {
    let mmas = loop_mmas(graph, for_op);
    if mmas.is_empty() {
        return Ok(None);
    }
    let eligible = mmas_with_multi_buffered_operands(graph, for_op, &mmas);
    for &mma in mmas.iter().filter(|mma| !eligible.contains(mma)) {
        let reason = SkipReason::OperandsNotMultiBuffered { mma };
        tracing::debug!(%mma, %reason, "skipping MMA");
        skipped.push(SkippedMma { for_op, mma, reason });
    }

    let mut current = for_op;
    let mut rewritten = 0;
    for mma in eligible {
        match plan_mma_rewrite(graph, current, mma) {
            Ok(mut info) => {
                current = rewrite_mma(graph, current, &mut info, num_stages)?;
                rewritten += 1;
            }
            Err(reason) => {
                tracing::debug!(%mma, %reason, "skipping MMA");
                skipped.push(SkippedMma { for_op: current, mma, reason });
            }
        }
    }
    Ok((rewritten > 0).then_some(current))
}

/// Software-pipeline the asynchronous MMAs of `loops`.
///
/// Each loop with at least one rewritten MMA is tagged with the pipeline
/// attribute. After clean-up, every tagged loop in the unit is scheduled and
/// handed to `expander`, unless the configuration disables expansion. A ring
/// deeper than the schedule is refused before anything is rewritten.
#[tracing::instrument(skip_all, fields(loops = loops.len(), num_stages = config.num_stages))]
pub fn pipeline_mma_loops(
    graph: &mut Graph,
    loops: &[OpId],
    config: &PipelineConfig,
    expander: &mut dyn PipelineExpander,
) -> Result<PipelineReport> {
    let PipelineConfig { num_stages, schedule_stages, disable_expander } = *config;
    ensure!(
        disable_expander || num_stages <= schedule_stages,
        RingDeeperThanScheduleSnafu { num_stages, schedule_stages }
    );
    let mut report = PipelineReport::default();

    for &for_op in loops {
        graph.ensure_loop(for_op)?;
        if let Some(new_for) = preprocess_loop(graph, for_op, num_stages, &mut report.skipped)? {
            graph.set_attr(new_for, PIPELINE_ATTR, Attribute::Unit);
        }
    }

    if let Err(error) = graph.canonicalize() {
        tracing::warn!(%error, "failed to canonicalize after rewriting MMA loops");
        report.cleanup_error = Some(error);
        return Ok(report);
    }

    report.tagged_loops = graph
        .all_ops()
        .into_iter()
        .filter(|&op| matches!(graph.kind(op), OpKind::For) && graph.has_attr(op, PIPELINE_ATTR))
        .collect();
    tracing::debug!(graph = %graph.tree(), tagged = report.tagged_loops.len(), "after MMA loop rewrite");

    if disable_expander {
        return Ok(report);
    }
    for &for_op in &report.tagged_loops {
        let options = mma_pipelining_options(graph, for_op, schedule_stages)?;
        report.schedules.push(LoopSchedule { for_op, schedule: options.schedule.clone() });
        expander.pipeline_for_loop(graph, for_op, &options)?;
    }
    Ok(report)
}
