//! Override-point detection.

use mmapipe_ir::{Builder, Type};

use crate::error::SkipReason;
use crate::mma::{AccOverridePoint, OverrideCondition, acc_override_or_flag_false, acc_override_point_in_loop};
use crate::test::helpers::{MmaLoop, MmaLoopSpec, Reset, Scaffold, acc_memdesc, acc_tensor};

fn override_of(f: &MmaLoop) -> Option<AccOverridePoint> {
    acc_override_or_flag_false(&f.graph, f.for_op, f.mma, f.alloc, f.load).unwrap()
}

#[test]
fn test_plain_accumulation_has_no_override() {
    assert_eq!(override_of(&MmaLoopSpec::default().build()), None);
}

#[test]
fn test_reset_select_before_yield_is_one_iteration_back() {
    let f = MmaLoopSpec::with_reset(Reset::SelectNext).build();
    let point = acc_override_point_in_loop(&f.graph, f.for_op, f.alloc, f.load).unwrap().unwrap();

    let yield_op = f.graph.for_yield(f.for_op).unwrap();
    let select = f.graph.defining_op(f.graph.operand(yield_op, 0)).unwrap();
    assert_eq!(point.op, select);
    assert_eq!(point.distance, 1);
    assert_eq!(point.condition, Some(OverrideCondition { value: f.flag.unwrap(), negated: false }));
    assert_eq!(point.init_value, Some(f.graph.operand(select, 1)));
}

#[test]
fn test_reset_select_before_alloc_is_negated() {
    let f = MmaLoopSpec::with_reset(Reset::SelectSame).build();
    let point = acc_override_point_in_loop(&f.graph, f.for_op, f.alloc, f.load).unwrap().unwrap();

    let select = f.graph.defining_op(f.graph.operand(f.alloc, 0)).unwrap();
    assert_eq!(point.op, select);
    assert_eq!(point.distance, 0);
    assert_eq!(point.condition, Some(OverrideCondition { value: f.flag.unwrap(), negated: true }));
    assert_eq!(point.init_value, Some(f.graph.operand(select, 2)));
}

#[test]
fn test_fresh_value_overrides_unconditionally() {
    let f = MmaLoopSpec::with_reset(Reset::Unconditional).build();
    let point = override_of(&f).unwrap();

    assert_eq!(point.condition, None);
    assert_eq!(point.distance, 0);
    assert_eq!(f.graph.name(point.op), "test.init");
    assert!(point.init_value.is_some());
}

#[test]
fn test_uninitialized_alloc_is_its_own_override() {
    let mut s = Scaffold::new(0);
    let (alloc, mma, load, _) = s.accumulate(None);
    s.body().yield_op(&[]);

    let point = acc_override_or_flag_false(&s.graph, s.for_op, mma, alloc, load).unwrap().unwrap();
    assert_eq!(point, AccOverridePoint { op: alloc, condition: None, init_value: None, distance: 0 });
}

#[test]
fn test_use_flag_in_loop_is_a_negated_override() {
    let f = MmaLoopSpec::with_reset(Reset::UseFlag).build();
    let flag = f.flag.unwrap();
    let point = override_of(&f).unwrap();

    assert_eq!(point.op, f.graph.defining_op(flag).unwrap());
    assert_eq!(point.condition, Some(OverrideCondition { value: flag, negated: true }));
    assert_eq!(point.init_value, None);
    assert_eq!(point.distance, 0);
}

#[test]
fn test_blend_select_is_not_an_override() {
    let mut s = Scaffold::new(1);
    let acc_arg = s.iter_arg(0);
    let always = s.always;
    let (alloc, _, load, loaded) = s.accumulate(Some(acc_arg));
    let mut b = s.body();
    let other = b.opaque("test.other", false, &[], &[acc_tensor()]);
    let other = b.graph().result(other);
    let blended = b.select(always, loaded, other);
    b.yield_op(&[blended]);

    assert_eq!(acc_override_point_in_loop(&s.graph, s.for_op, alloc, load).unwrap(), None);
}

#[test]
fn test_override_through_if_is_rejected() {
    let mut s = Scaffold::new(1);
    let acc_arg = s.iter_arg(0);
    let (a, bv, always, zeros) = (s.a, s.b, s.always, s.zeros);
    let mut b = s.body();
    let if_op = b.if_op(always, &[acc_tensor()]);
    let fresh = b.graph().result(if_op);
    let acc = b.tmem_alloc(acc_memdesc(), Some(fresh));
    b.mma(a, bv, acc, always, always);
    let loaded = b.tmem_load(acc, acc_tensor());
    b.yield_op(&[loaded]);
    let (then, otherwise) = (s.graph.if_then(if_op), s.graph.if_else(if_op));
    Builder::at_end(&mut s.graph, then).yield_op(&[acc_arg]);
    Builder::at_end(&mut s.graph, otherwise).yield_op(&[zeros]);

    let alloc = s.graph.defining_op(acc).unwrap();
    let load = s.graph.defining_op(loaded).unwrap();
    let result = acc_override_point_in_loop(&s.graph, s.for_op, alloc, load);
    assert_eq!(result, Err(SkipReason::OverrideThroughIf { alloc, if_op }));
}

#[test]
fn test_two_iterations_back() {
    let mut s = Scaffold::new(2);
    let (older, newer) = (s.iter_arg(0), s.iter_arg(1));
    let zeros = s.zeros;
    let (alloc, _, load, loaded) = s.accumulate(Some(older));
    let iv = s.graph.for_induction_var(s.for_op);
    let mut b = s.body();
    let flag = b.opaque("test.flag", false, &[iv], &[Type::I1]);
    let flag = b.graph().result(flag);
    let reset = b.select(flag, zeros, loaded);
    b.yield_op(&[newer, reset]);

    let point = acc_override_point_in_loop(&s.graph, s.for_op, alloc, load).unwrap().unwrap();
    assert_eq!(point.distance, 2);
}

#[test]
fn test_cyclic_carried_values_have_no_override() {
    let mut s = Scaffold::new(2);
    let (x, y) = (s.iter_arg(0), s.iter_arg(1));
    let (alloc, _, load, _) = s.accumulate(Some(x));
    s.body().yield_op(&[y, x]);

    assert_eq!(acc_override_point_in_loop(&s.graph, s.for_op, alloc, load).unwrap(), None);
}
