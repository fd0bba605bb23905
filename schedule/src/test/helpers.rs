//! Loop fixtures for the pipelining tests.
//!
//! [`MmaLoopSpec`] builds the canonical shape the pass looks for:
//!
//! ```text
//! %a_buf, %b_buf = local_alloc [3 x 128 x 128]           (outside the loop)
//! scf.for %i iter_args(%acc = zeros) {
//!   %a, %b = subview(%a_buf, %i), subview(%b_buf, %i)
//!   %flag  = test.flag(%i)                               (resetting variants)
//!   %t     = tmem_alloc(<initial value>)
//!   tc_gen5_mma(%a, %b, %t, <use_d>, true)
//!   %v     = tmem_load(%t)
//!   test.use(%v)                                         (read_in_loop)
//!   scf.yield <%v or the reset select>
//! }
//! test.sink(%result)                                     (read_after_loop)
//! ```

use mmapipe_ir::{Builder, ConstValue, Graph, MemDescType, MemorySpace, OpId, ScalarType, Type, ValueId};

use crate::coarse_schedule::CoarseSchedule;

pub const TILE: i64 = 128;

pub fn acc_memdesc() -> MemDescType {
    MemDescType::new(vec![TILE, TILE], ScalarType::F32, MemorySpace::Tensor)
}

pub fn acc_tensor() -> Type {
    Type::tensor(vec![TILE, TILE], ScalarType::F32)
}

pub fn operand_ring() -> MemDescType {
    MemDescType::new(vec![3, TILE, TILE], ScalarType::F16, MemorySpace::Shared)
}

pub fn root_builder(graph: &mut Graph) -> Builder<'_> {
    let root = graph.root();
    Builder::at_end(graph, root)
}

pub fn body_builder(graph: &mut Graph, for_op: OpId) -> Builder<'_> {
    let body = graph.for_body(for_op);
    Builder::at_end(graph, body)
}

/// Side-effecting opaque op with one result.
pub fn opaque_value(b: &mut Builder<'_>, name: &'static str, operands: &[ValueId], ty: Type) -> ValueId {
    let op = b.opaque(name, false, operands, &[ty]);
    b.graph().result(op)
}

/// The single `scf.for` at the root, whatever it was rebuilt into.
pub fn root_loop(graph: &Graph) -> OpId {
    graph
        .block_ops(graph.root())
        .iter()
        .copied()
        .find(|&op| matches!(graph.kind(op), mmapipe_ir::OpKind::For))
        .expect("fixture has a root loop")
}

/// Mnemonics of `ops`, in order.
pub fn op_names(graph: &Graph, ops: &[OpId]) -> Vec<String> {
    ops.iter().map(|&op| graph.name(op)).collect()
}

/// How the accumulator is reset inside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reset {
    /// Accumulates across all iterations; `use_d` is a constant from outside the loop.
    Never,
    /// `use_d = test.flag(%i)`: a false flag restarts the accumulation.
    UseFlag,
    /// `scf.yield select(%flag, zeros, %v)`: reset one iteration later.
    SelectNext,
    /// `tmem_alloc(select(%flag, %acc, zeros))`: reset in the same iteration when the flag is false.
    SelectSame,
    /// `tmem_alloc(test.init())` every iteration; nothing is carried.
    Unconditional,
}

#[derive(Debug, Clone, Copy)]
pub struct MmaLoopSpec {
    pub reset: Reset,
    pub read_in_loop: bool,
    pub read_after_loop: bool,
    pub scaled: bool,
    pub trip_count: i64,
}

impl Default for MmaLoopSpec {
    fn default() -> Self {
        Self { reset: Reset::Never, read_in_loop: false, read_after_loop: true, scaled: false, trip_count: 8 }
    }
}

/// Handles into a fixture built by [`MmaLoopSpec::build`].
pub struct MmaLoop {
    pub graph: Graph,
    pub for_op: OpId,
    pub mma: OpId,
    pub alloc: OpId,
    pub load: OpId,
    pub flag: Option<ValueId>,
    pub reader: Option<OpId>,
    pub sink: Option<OpId>,
}

impl MmaLoopSpec {
    pub fn with_reset(reset: Reset) -> Self {
        Self { reset, ..Self::default() }
    }

    pub fn build(self) -> MmaLoop {
        let mut graph = Graph::new();
        let mut b = root_builder(&mut graph);
        let a_buf = b.local_alloc(operand_ring(), None);
        let b_buf = b.local_alloc(operand_ring(), None);
        let zeros = b.constant(ConstValue::Float(0.0), acc_tensor());
        let always = b.const_bool(true);
        let scales = self.scaled.then(|| {
            let scale_ty = Type::tensor(vec![TILE], ScalarType::I32);
            (opaque_value(&mut b, "test.scale", &[], scale_ty.clone()), opaque_value(&mut b, "test.scale", &[], scale_ty))
        });

        let carried = self.reset != Reset::Unconditional;
        let inits = if carried { vec![zeros] } else { vec![] };
        let lb = b.const_i32(0);
        let ub = b.const_i32(self.trip_count);
        let step = b.const_i32(1);
        let for_op = b.for_loop(lb, ub, step, &inits);
        let iv = graph.for_induction_var(for_op);
        let acc_arg = carried.then(|| graph.for_iter_arg(for_op, 0));

        let mut b = body_builder(&mut graph, for_op);
        let a = b.subview(a_buf, iv);
        let bv = b.subview(b_buf, iv);
        let flag = matches!(self.reset, Reset::UseFlag | Reset::SelectNext | Reset::SelectSame)
            .then(|| opaque_value(&mut b, "test.flag", &[iv], Type::I1));
        let alloc_init = match self.reset {
            Reset::Never | Reset::UseFlag | Reset::SelectNext => acc_arg,
            Reset::SelectSame => Some(b.select(flag.unwrap(), acc_arg.unwrap(), zeros)),
            Reset::Unconditional => Some(opaque_value(&mut b, "test.init", &[], acc_tensor())),
        };
        let acc = b.tmem_alloc(acc_memdesc(), alloc_init);
        let use_d = if self.reset == Reset::UseFlag { flag.unwrap() } else { always };
        let mma = match scales {
            Some((a_scale, b_scale)) => b.mma_scaled(a, bv, acc, use_d, always, a_scale, b_scale),
            None => b.mma(a, bv, acc, use_d, always),
        };
        let value = b.tmem_load(acc, acc_tensor());
        let reader = self.read_in_loop.then(|| b.opaque("test.use", false, &[value], &[]));
        match self.reset {
            Reset::Unconditional => b.yield_op(&[]),
            Reset::SelectNext => {
                let next = b.select(flag.unwrap(), zeros, value);
                b.yield_op(&[next])
            }
            _ => b.yield_op(&[value]),
        };

        let alloc = graph.defining_op(acc).unwrap();
        let load = graph.defining_op(value).unwrap();
        let sink = (carried && self.read_after_loop).then(|| {
            let result = graph.for_result(for_op, 0);
            root_builder(&mut graph).opaque("test.sink", false, &[result], &[])
        });

        MmaLoop { graph, for_op, mma, alloc, load, flag, reader, sink }
    }
}

/// Stage of `op` in a final schedule.
pub fn stage_in(schedule: &[(OpId, u32)], op: OpId) -> Option<u32> {
    schedule.iter().find(|(o, _)| *o == op).map(|&(_, stage)| stage)
}

/// Coarse schedule with one front cluster.
pub fn single_cluster_schedule(num_stages: u32) -> (CoarseSchedule, crate::coarse_schedule::Cluster) {
    let mut schedule = CoarseSchedule::new(num_stages);
    let cluster = schedule.clusters.new_at_front();
    (schedule, cluster)
}

/// Loop over `carried` zero-initialized accumulators with operand views already in the body.
///
/// The body is left without a terminator.
pub struct Scaffold {
    pub graph: Graph,
    pub for_op: OpId,
    pub a: ValueId,
    pub b: ValueId,
    pub zeros: ValueId,
    pub always: ValueId,
}

impl Scaffold {
    pub fn new(carried: usize) -> Self {
        let mut graph = Graph::new();
        let mut b = root_builder(&mut graph);
        let a_buf = b.local_alloc(operand_ring(), None);
        let b_buf = b.local_alloc(operand_ring(), None);
        let zeros = b.constant(ConstValue::Float(0.0), acc_tensor());
        let always = b.const_bool(true);
        let lb = b.const_i32(0);
        let ub = b.const_i32(8);
        let step = b.const_i32(1);
        let for_op = b.for_loop(lb, ub, step, &vec![zeros; carried]);
        let iv = graph.for_induction_var(for_op);
        let mut b = body_builder(&mut graph, for_op);
        let a = b.subview(a_buf, iv);
        let bv = b.subview(b_buf, iv);
        Self { graph, for_op, a, b: bv, zeros, always }
    }

    pub fn iter_arg(&self, index: usize) -> ValueId {
        self.graph.for_iter_arg(self.for_op, index)
    }

    pub fn body(&mut self) -> Builder<'_> {
        body_builder(&mut self.graph, self.for_op)
    }

    /// `tmem_alloc(init)`, MMA into it and a load after it. Returns `(alloc, mma, load, loaded)`.
    pub fn accumulate(&mut self, init: Option<ValueId>) -> (OpId, OpId, OpId, ValueId) {
        let (a, bv, always) = (self.a, self.b, self.always);
        let mut b = self.body();
        let acc = b.tmem_alloc(acc_memdesc(), init);
        let mma = b.mma(a, bv, acc, always, always);
        let loaded = b.tmem_load(acc, acc_tensor());
        let alloc = b.graph().defining_op(acc).unwrap();
        let load = b.graph().defining_op(loaded).unwrap();
        (alloc, mma, load, loaded)
    }

    /// `test.sink` of loop result `index` after the loop.
    pub fn sink_result(&mut self, index: usize) -> OpId {
        let result = self.graph.for_result(self.for_op, index);
        root_builder(&mut self.graph).opaque("test.sink", false, &[result], &[])
    }
}
