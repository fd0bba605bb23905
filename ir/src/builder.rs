//! Insertion-point builder with one constructor per operation kind.
//!
//! The builder keeps inserting at the same logical position, so a sequence of
//! `create` calls emits operations in program order:
//!
//! ```ignore
//! let mut b = Builder::after(&mut graph, mma);
//! let wait = b.wait_barrier(slot, phase);      // right after the MMA
//! let next = b.addi(index, one);               // right after the wait
//! ```

use crate::graph::{BlockId, Graph, InsertPoint, OpId, ValueId};
use crate::op::OpKind;
use crate::types::{CmpPredicate, ConstValue, MemDescType, Type};

pub struct Builder<'g> {
    graph: &'g mut Graph,
    ip: InsertPoint,
}

impl<'g> Builder<'g> {
    pub fn new(graph: &'g mut Graph, ip: InsertPoint) -> Self {
        let ip = normalize(graph, ip);
        Self { graph, ip }
    }

    pub fn before(graph: &'g mut Graph, op: OpId) -> Self {
        Self::new(graph, InsertPoint::Before(op))
    }

    pub fn after(graph: &'g mut Graph, op: OpId) -> Self {
        Self::new(graph, InsertPoint::After(op))
    }

    pub fn at_end(graph: &'g mut Graph, block: BlockId) -> Self {
        Self::new(graph, InsertPoint::End(block))
    }

    pub fn set_insertion_point(&mut self, ip: InsertPoint) {
        self.ip = normalize(self.graph, ip);
    }

    pub fn insertion_point(&self) -> InsertPoint {
        self.ip
    }

    /// Block the builder currently inserts into.
    pub fn insertion_block(&self) -> BlockId {
        self.graph.resolve(self.ip).0
    }

    pub fn graph(&mut self) -> &mut Graph {
        self.graph
    }

    pub fn create(&mut self, kind: OpKind, operands: &[ValueId], result_types: &[Type]) -> OpId {
        self.graph.create_op(self.ip, kind, operands, result_types, 0)
    }

    fn create_value(&mut self, kind: OpKind, operands: &[ValueId], ty: Type) -> ValueId {
        let op = self.create(kind, operands, &[ty]);
        self.graph.result(op)
    }

    // ── Arithmetic ──────────────────────────────────────────────────────

    pub fn constant(&mut self, value: ConstValue, ty: Type) -> ValueId {
        self.create_value(OpKind::Constant(value), &[], ty)
    }

    pub fn const_i32(&mut self, value: i64) -> ValueId {
        self.constant(ConstValue::Int(value), Type::I32)
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.constant(ConstValue::Bool(value), Type::I1)
    }

    pub fn addi(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.graph.value_type(lhs).clone();
        self.create_value(OpKind::AddI, &[lhs, rhs], ty)
    }

    pub fn andi(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.graph.value_type(lhs).clone();
        self.create_value(OpKind::AndI, &[lhs, rhs], ty)
    }

    pub fn xori(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.graph.value_type(lhs).clone();
        self.create_value(OpKind::XOrI, &[lhs, rhs], ty)
    }

    pub fn cmpi(&mut self, pred: CmpPredicate, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.create_value(OpKind::CmpI(pred), &[lhs, rhs], Type::I1)
    }

    pub fn select(&mut self, cond: ValueId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.graph.value_type(on_true).clone();
        self.create_value(OpKind::Select, &[cond, on_true, on_false], ty)
    }

    // ── Structured control flow ─────────────────────────────────────────

    /// Create an `scf.for` with an empty body; the caller appends the yield.
    pub fn for_loop(&mut self, lb: ValueId, ub: ValueId, step: ValueId, inits: &[ValueId]) -> OpId {
        let mut operands = vec![lb, ub, step];
        operands.extend_from_slice(inits);
        let types: Vec<Type> = inits.iter().map(|&v| self.graph.value_type(v).clone()).collect();
        let op = self.graph.create_op(self.ip, OpKind::For, &operands, &types, 1);
        let body = self.graph.regions(op)[0];
        let iv_ty = self.graph.value_type(lb).clone();
        self.graph.add_block_arg(body, iv_ty);
        for ty in types {
            self.graph.add_block_arg(body, ty);
        }
        op
    }

    /// Create an `scf.if` with empty then/else blocks.
    pub fn if_op(&mut self, cond: ValueId, result_types: &[Type]) -> OpId {
        self.graph.create_op(self.ip, OpKind::If, &[cond], result_types, 2)
    }

    pub fn yield_op(&mut self, values: &[ValueId]) -> OpId {
        self.create(OpKind::Yield, values, &[])
    }

    // ── Tensor memory ───────────────────────────────────────────────────

    pub fn tmem_alloc(&mut self, ty: MemDescType, init: Option<ValueId>) -> ValueId {
        let operands: Vec<ValueId> = init.into_iter().collect();
        self.create_value(OpKind::TmemAlloc, &operands, Type::MemDesc(ty))
    }

    pub fn tmem_load(&mut self, src: ValueId, ty: Type) -> ValueId {
        self.create_value(OpKind::TmemLoad, &[src], ty)
    }

    pub fn tmem_store(&mut self, dst: ValueId, value: ValueId, pred: ValueId) -> OpId {
        self.create(OpKind::TmemStore, &[dst, value, pred], &[])
    }

    // ── Shared memory and barriers ──────────────────────────────────────

    pub fn local_alloc(&mut self, ty: MemDescType, init: Option<ValueId>) -> ValueId {
        let operands: Vec<ValueId> = init.into_iter().collect();
        self.create_value(OpKind::LocalAlloc, &operands, Type::MemDesc(ty))
    }

    pub fn local_dealloc(&mut self, alloc: ValueId) -> OpId {
        self.create(OpKind::LocalDealloc, &[alloc], &[])
    }

    /// View of slot `index` along the leading dimension of `alloc`.
    ///
    /// Trailing dimensions are addressed at offset zero.
    pub fn subview(&mut self, alloc: ValueId, index: ValueId) -> ValueId {
        let desc = match self.graph.value_type(alloc) {
            Type::MemDesc(desc) => desc.clone(),
            other => panic!("subview of non-memdesc value of type {other}"),
        };
        let mut indices = vec![alloc, index];
        if desc.shape.len() > 1 {
            let zero = self.const_i32(0);
            indices.extend(std::iter::repeat_n(zero, desc.shape.len() - 1));
        }
        self.create_value(OpKind::MemDescSubview, &indices, Type::MemDesc(desc.single_slot()))
    }

    pub fn subview_at(&mut self, alloc: ValueId, index: i64) -> ValueId {
        let index = self.const_i32(index);
        self.subview(alloc, index)
    }

    pub fn memdesc_trans(&mut self, src: ValueId) -> ValueId {
        let ty = match self.graph.value_type(src) {
            Type::MemDesc(desc) => {
                let mut desc = desc.clone();
                desc.shape.reverse();
                Type::MemDesc(desc)
            }
            other => other.clone(),
        };
        self.create_value(OpKind::MemDescTrans, &[src], ty)
    }

    pub fn init_barrier(&mut self, barrier: ValueId, count: u32) -> OpId {
        self.create(OpKind::InitBarrier { count }, &[barrier], &[])
    }

    pub fn inval_barrier(&mut self, barrier: ValueId) -> OpId {
        self.create(OpKind::InvalBarrier, &[barrier], &[])
    }

    pub fn wait_barrier(&mut self, barrier: ValueId, phase: ValueId) -> OpId {
        self.create(OpKind::WaitBarrier, &[barrier, phase], &[])
    }

    // ── Asynchronous copies ─────────────────────────────────────────────

    pub fn async_copy(&mut self, src: ValueId, dst: ValueId) -> OpId {
        self.create(OpKind::AsyncCopyGlobalToLocal, &[src, dst], &[Type::Token])
    }

    pub fn async_tma_copy(&mut self, desc: ValueId, barrier: ValueId, dst: ValueId, pred: ValueId) -> OpId {
        self.create(OpKind::AsyncTmaCopyGlobalToLocal, &[desc, barrier, dst, pred], &[])
    }

    pub fn async_tma_gather(&mut self, desc: ValueId, barrier: ValueId, dst: ValueId, pred: ValueId) -> OpId {
        self.create(OpKind::AsyncTmaGather, &[desc, barrier, dst, pred], &[])
    }

    pub fn async_tma_store(&mut self, desc: ValueId, src: ValueId) -> OpId {
        self.create(OpKind::AsyncTmaCopyLocalToGlobal, &[desc, src], &[])
    }

    pub fn async_tma_scatter(&mut self, desc: ValueId, src: ValueId) -> OpId {
        self.create(OpKind::AsyncTmaScatter, &[desc, src], &[])
    }

    // ── Tensor core ─────────────────────────────────────────────────────

    pub fn mma(&mut self, a: ValueId, b: ValueId, d: ValueId, use_d: ValueId, pred: ValueId) -> OpId {
        self.create(OpKind::Mma { scaled: false, has_barrier: false }, &[a, b, d, use_d, pred], &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mma_scaled(
        &mut self,
        a: ValueId,
        b: ValueId,
        d: ValueId,
        use_d: ValueId,
        pred: ValueId,
        a_scale: ValueId,
        b_scale: ValueId,
    ) -> OpId {
        self.create(OpKind::Mma { scaled: true, has_barrier: false }, &[a, b, d, use_d, pred, a_scale, b_scale], &[])
    }

    // ── Anything else ───────────────────────────────────────────────────

    pub fn opaque(&mut self, name: &'static str, pure: bool, operands: &[ValueId], result_types: &[Type]) -> OpId {
        self.create(OpKind::opaque(name, pure), operands, result_types)
    }
}

/// Turn `After(op)` into a stable position so consecutive inserts keep program order.
fn normalize(graph: &Graph, ip: InsertPoint) -> InsertPoint {
    match ip {
        InsertPoint::After(op) => match graph.next_op(op) {
            Some(next) => InsertPoint::Before(next),
            None => InsertPoint::End(graph.parent_block(op).expect("insertion anchor must be attached")),
        },
        InsertPoint::Start(block) => match graph.block_ops(block).first() {
            Some(&first) => InsertPoint::Before(first),
            None => InsertPoint::End(block),
        },
        other => other,
    }
}
