//! Shared-memory operand tracing.

use mmapipe_ir::{Builder, Graph, Type};

use crate::mma::{find_shmem_alloc, mmas_with_multi_buffered_operands};
use crate::test::helpers::{Scaffold, acc_memdesc, acc_tensor, operand_ring, opaque_value, root_builder};

#[test]
fn test_alloc_found_through_subview_and_transpose() {
    let mut graph = Graph::new();
    let mut b = root_builder(&mut graph);
    let ring = b.local_alloc(operand_ring(), None);
    let slot = b.subview_at(ring, 1);
    let transposed = b.memdesc_trans(slot);

    let alloc = graph.defining_op(ring).unwrap();
    assert_eq!(find_shmem_alloc(&graph, ring), Some(alloc));
    assert_eq!(find_shmem_alloc(&graph, slot), Some(alloc));
    assert_eq!(find_shmem_alloc(&graph, transposed), Some(alloc));
}

#[test]
fn test_alloc_found_through_carried_value() {
    let mut graph = Graph::new();
    let mut b = root_builder(&mut graph);
    let ring = b.local_alloc(operand_ring(), None);
    let first = b.subview_at(ring, 0);
    let lb = b.const_i32(0);
    let ub = b.const_i32(4);
    let step = b.const_i32(1);
    let for_op = b.for_loop(lb, ub, step, &[first]);
    let iv = graph.for_induction_var(for_op);
    let carried = graph.for_iter_arg(for_op, 0);
    let body = graph.for_body(for_op);
    let mut b = Builder::at_end(&mut graph, body);
    let next = b.subview(ring, iv);
    b.yield_op(&[next]);

    assert_eq!(find_shmem_alloc(&graph, carried), graph.defining_op(ring));
}

#[test]
fn test_unknown_producer_is_untraced() {
    let mut graph = Graph::new();
    let mut b = root_builder(&mut graph);
    let opaque = opaque_value(&mut b, "test.buffer", &[], Type::MemDesc(operand_ring()));
    let tmem = b.tmem_alloc(acc_memdesc(), None);
    let slot = b.subview_at(opaque, 0);

    assert_eq!(find_shmem_alloc(&graph, opaque), None);
    assert_eq!(find_shmem_alloc(&graph, tmem), None);
    assert_eq!(find_shmem_alloc(&graph, slot), None);
}

#[test]
fn test_operands_allocated_outside_are_eligible() {
    let mut s = Scaffold::new(1);
    let acc_arg = s.iter_arg(0);
    let (_, mma, _, loaded) = s.accumulate(Some(acc_arg));
    s.body().yield_op(&[loaded]);

    assert_eq!(mmas_with_multi_buffered_operands(&s.graph, s.for_op, &[mma]), vec![mma]);
}

#[test]
fn test_operand_allocated_in_loop_is_not_eligible() {
    let mut s = Scaffold::new(0);
    let (bv, always) = (s.b, s.always);
    let mut b = s.body();
    let local = b.local_alloc(operand_ring(), None);
    let a = b.subview_at(local, 0);
    let acc = b.tmem_alloc(acc_memdesc(), None);
    let mma = b.mma(a, bv, acc, always, always);
    b.tmem_load(acc, acc_tensor());
    b.yield_op(&[]);

    assert!(mmas_with_multi_buffered_operands(&s.graph, s.for_op, &[mma]).is_empty());
}
