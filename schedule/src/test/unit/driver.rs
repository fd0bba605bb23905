//! End-to-end behaviour of `pipeline_mma_loops`.

use mmapipe_ir::op::mma;
use mmapipe_ir::{Builder, Graph, OpId, OpKind, ScalarType, Type};
use test_case::test_case;

use crate::config::PipelineConfig;
use crate::driver::{PipelineReport, pipeline_mma_loops};
use crate::error::{Error, Result, SkipReason};
use crate::expander::{PipelineExpander, PipeliningOptions};
use crate::mma::PIPELINE_STAGE_ATTR;
use crate::test::helpers::{MmaLoopSpec, Reset, Scaffold, acc_memdesc, acc_tensor, operand_ring, root_loop};

/// Records every loop it is asked to expand and leaves the graph alone.
#[derive(Default)]
struct RecordingExpander {
    calls: Vec<(OpId, u32)>,
}

impl PipelineExpander for RecordingExpander {
    fn pipeline_for_loop(&mut self, _graph: &mut Graph, for_op: OpId, options: &PipeliningOptions) -> Result<OpId> {
        self.calls.push((for_op, options.num_stages));
        Ok(for_op)
    }
}

struct RejectingExpander;

impl PipelineExpander for RejectingExpander {
    fn pipeline_for_loop(&mut self, _graph: &mut Graph, for_op: OpId, _options: &PipeliningOptions) -> Result<OpId> {
        Err(Error::Expander { for_op, message: "dynamic trip count".into() })
    }
}

fn rewrite_only() -> PipelineConfig {
    PipelineConfig::builder().disable_expander(true).build()
}

fn run(graph: &mut Graph, for_op: OpId, config: &PipelineConfig) -> (PipelineReport, RecordingExpander) {
    let mut expander = RecordingExpander::default();
    let report = pipeline_mma_loops(graph, &[for_op], config, &mut expander).unwrap();
    (report, expander)
}

fn count_named(graph: &Graph, name: &str) -> usize {
    graph.all_ops().into_iter().filter(|&op| graph.name(op) == name).count()
}

// ============================================================================
// Accepted loops
// ============================================================================

#[test]
fn test_single_stage_accumulation_end_to_end() {
    let mut f = MmaLoopSpec::default().build();
    let config = PipelineConfig::builder().num_stages(1).schedule_stages(1).build();
    let (report, expander) = run(&mut f.graph, f.for_op, &config);
    let graph = &f.graph;

    assert!(report.skipped.is_empty());
    assert_eq!(report.cleanup_error, None);
    let for_op = root_loop(graph);
    assert_eq!(report.tagged_loops, vec![for_op]);
    assert_eq!(expander.calls, vec![(for_op, 1)]);

    // Carried accumulator and both accumulator indices fold away; phase and barrier index remain.
    assert_eq!(graph.num_iter_args(for_op), 2);
    assert_eq!(graph.operands(graph.for_yield(for_op).unwrap()).len(), 2);

    let hoisted = graph.defining_op(graph.operand(f.mma, mma::D)).unwrap();
    assert_eq!(graph.parent_block(hoisted), Some(graph.root()));
    assert_eq!(graph.value_type(graph.result(hoisted)), &Type::MemDesc(acc_memdesc()));

    let barrier_ring = graph
        .block_ops(graph.root())
        .iter()
        .copied()
        .find(|&op| {
            matches!(graph.kind(op), OpKind::LocalAlloc)
                && graph.value_type(graph.result(op)).as_memdesc().is_some_and(|d| d.elem == ScalarType::I64)
        })
        .unwrap();
    assert_eq!(graph.value_type(graph.result(barrier_ring)).as_memdesc().unwrap().shape.as_slice(), &[1]);
    assert_eq!(count_named(graph, "init_barrier"), 1);

    let schedule = &report.schedules[0].schedule;
    assert!(schedule.iter().all(|&(_, stage)| stage == 0));
    assert!(schedule.iter().any(|&(op, _)| op == f.mma));
}

#[test]
fn test_two_mmas_in_one_loop_are_both_rewritten() {
    let mut s = Scaffold::new(2);
    let (acc0, acc1) = (s.iter_arg(0), s.iter_arg(1));
    let (_, first, _, v0) = s.accumulate(Some(acc0));
    let (_, second, _, v1) = s.accumulate(Some(acc1));
    s.body().yield_op(&[v0, v1]);
    s.sink_result(0);
    s.sink_result(1);

    let (report, expander) = run(&mut s.graph, s.for_op, &PipelineConfig::default());
    let graph = &s.graph;
    let for_op = root_loop(graph);

    assert!(report.skipped.is_empty());
    assert_eq!(report.tagged_loops, vec![for_op]);
    assert_eq!(expander.calls.len(), 1);
    assert_eq!(graph.num_iter_args(for_op), 4);
    assert_eq!(count_named(graph, "wait_barrier"), 2);
    for mma_op in [first, second] {
        assert_eq!(graph.parent_loop(mma_op), Some(for_op));
        assert!(matches!(graph.kind(mma_op), OpKind::Mma { has_barrier: true, .. }));
    }
}

#[test]
fn test_ineligible_operand_is_skipped_alongside_rewritten_mma() {
    let mut s = Scaffold::new(1);
    let acc = s.iter_arg(0);
    let (_, good, _, loaded) = s.accumulate(Some(acc));
    let (bv, always) = (s.b, s.always);
    let mut b = s.body();
    let local = b.local_alloc(operand_ring(), None);
    let a = b.subview_at(local, 0);
    let fresh = b.tmem_alloc(acc_memdesc(), None);
    let bad = b.mma(a, bv, fresh, always, always);
    let value = b.tmem_load(fresh, acc_tensor());
    b.opaque("test.use", false, &[value], &[]);
    b.yield_op(&[loaded]);
    s.sink_result(0);

    let (report, _) = run(&mut s.graph, s.for_op, &rewrite_only());

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].mma, bad);
    assert_eq!(report.skipped[0].reason, SkipReason::OperandsNotMultiBuffered { mma: bad });
    assert_eq!(report.tagged_loops, vec![root_loop(&s.graph)]);
    assert!(s.graph.has_attr(good, PIPELINE_STAGE_ATTR));
    assert!(!s.graph.has_attr(bad, PIPELINE_STAGE_ATTR));
}

#[test]
fn test_rewrite_only_keeps_annotations_and_skips_expansion() {
    let mut f = MmaLoopSpec::default().build();
    let (report, expander) = run(&mut f.graph, f.for_op, &rewrite_only());

    assert_eq!(report.tagged_loops.len(), 1);
    assert!(report.schedules.is_empty());
    assert!(expander.calls.is_empty());
    assert!(f.graph.has_attr(f.mma, PIPELINE_STAGE_ATTR));
}

#[test]
fn test_clean_up_is_idempotent_after_rewrite() {
    let mut f = MmaLoopSpec { reset: Reset::SelectNext, read_in_loop: true, ..MmaLoopSpec::default() }.build();
    run(&mut f.graph, f.for_op, &rewrite_only());

    let before = f.graph.tree();
    assert!(!f.graph.canonicalize().unwrap());
    assert_eq!(f.graph.tree(), before);

    let for_op = root_loop(&f.graph);
    assert_eq!(f.graph.operands(f.graph.for_yield(for_op).unwrap()).len(), f.graph.num_iter_args(for_op));
}

#[test]
fn test_ring_deeper_than_schedule_is_refused_before_rewrite() {
    let mut f = MmaLoopSpec { reset: Reset::SelectNext, read_in_loop: true, ..MmaLoopSpec::default() }.build();
    let config = PipelineConfig { num_stages: 3, schedule_stages: 2, disable_expander: false };
    let before = f.graph.tree();
    let mut expander = RecordingExpander::default();

    let error = pipeline_mma_loops(&mut f.graph, &[f.for_op], &config, &mut expander).unwrap_err();
    assert_eq!(error, Error::RingDeeperThanSchedule { num_stages: 3, schedule_stages: 2 });
    assert_eq!(f.graph.tree(), before);
    assert!(expander.calls.is_empty());
}

#[test_case(1 ; "single stage")]
#[test_case(3 ; "three stages")]
fn test_multi_buffered_loop_fits_its_schedule(depth: u32) {
    let mut f = MmaLoopSpec { reset: Reset::SelectNext, read_in_loop: true, ..MmaLoopSpec::default() }.build();
    let config = PipelineConfig::builder().num_stages(depth).schedule_stages(depth).build();
    let (report, expander) = run(&mut f.graph, f.for_op, &config);
    let graph = &f.graph;

    assert!(report.skipped.is_empty());
    assert_eq!(expander.calls, vec![(root_loop(graph), depth)]);
    let schedule = &report.schedules[0].schedule;
    assert!(schedule.iter().all(|&(_, stage)| stage < depth));
    let wait = schedule.iter().find(|&&(op, _)| graph.name(op) == "wait_barrier").unwrap();
    assert_eq!(wait.1, depth - 1);
}

#[test]
fn test_expander_failure_is_propagated() {
    let mut f = MmaLoopSpec::default().build();
    let error = pipeline_mma_loops(&mut f.graph, &[f.for_op], &PipelineConfig::default(), &mut RejectingExpander)
        .unwrap_err();
    assert!(matches!(error, Error::Expander { .. }));
}

#[test]
fn test_non_loop_candidate_is_an_ir_error() {
    let mut f = MmaLoopSpec::default().build();
    let mut expander = RecordingExpander::default();
    let error = pipeline_mma_loops(&mut f.graph, &[f.mma], &PipelineConfig::default(), &mut expander).unwrap_err();
    assert!(matches!(error, Error::IrError { .. }));
}

// ============================================================================
// Rejected loops leave the graph untouched
// ============================================================================

fn assert_rejected_untouched(mut graph: Graph, for_op: OpId, expected: SkipReason) {
    let before = graph.tree();
    let (report, expander) = run(&mut graph, for_op, &PipelineConfig::default());

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, expected);
    assert!(report.tagged_loops.is_empty());
    assert!(expander.calls.is_empty());
    assert_eq!(graph.tree(), before);
}

#[test]
fn test_divergent_accumulator_leaves_graph_untouched() {
    let mut s = Scaffold::new(1);
    let acc = s.iter_arg(0);
    let zeros = s.zeros;
    let always = s.always;
    let (_, _, load, loaded) = s.accumulate(Some(acc));
    let if_op = s.body().if_op(always, &[acc_tensor()]);
    let merged = s.graph.result(if_op);
    s.body().yield_op(&[merged]);
    let (then, otherwise) = (s.graph.if_then(if_op), s.graph.if_else(if_op));
    Builder::at_end(&mut s.graph, then).yield_op(&[loaded]);
    Builder::at_end(&mut s.graph, otherwise).yield_op(&[zeros]);

    assert_rejected_untouched(s.graph, s.for_op, SkipReason::DivergentAccumulator { load });
}

#[test]
fn test_reader_without_override_leaves_graph_untouched() {
    let f = MmaLoopSpec { read_in_loop: true, ..MmaLoopSpec::default() }.build();
    assert_rejected_untouched(f.graph, f.for_op, SkipReason::InfeasibleBuffering { load: f.load });
}

#[test]
fn test_distant_override_leaves_graph_untouched() {
    let mut s = Scaffold::new(2);
    let (older, newer) = (s.iter_arg(0), s.iter_arg(1));
    let zeros = s.zeros;
    let (_, _, _, loaded) = s.accumulate(Some(older));
    let iv = s.graph.for_induction_var(s.for_op);
    let mut b = s.body();
    let flag = b.opaque("test.flag", false, &[iv], &[Type::I1]);
    let flag = b.graph().result(flag);
    let reset = b.select(flag, zeros, loaded);
    b.yield_op(&[newer, reset]);

    assert_rejected_untouched(s.graph, s.for_op, SkipReason::OverrideTooFar { distance: 2 });
}
