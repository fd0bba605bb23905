//! Operation kinds and their operand layouts.
//!
//! Operands live in a flat list on each operation (see [`crate::graph::OpData`]);
//! the [`OpKind`] variant documents which slot means what. Fixed slot indices for
//! the multi-operand kinds are exposed as constants in the submodules below.

use std::borrow::Cow;

use crate::types::{CmpPredicate, ConstValue};

/// Operation type.
///
/// Each variant lists its signature as `Operands: [...] Results: [...]`.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    // ── Arithmetic (pure) ───────────────────────────────────────────
    /// Operands: []. Results: [value]. Tensor-typed constants are splats.
    Constant(ConstValue),
    /// Operands: [lhs, rhs]. Results: [sum].
    AddI,
    /// Operands: [lhs, rhs]. Results: [lhs & rhs].
    AndI,
    /// Operands: [lhs, rhs]. Results: [lhs ^ rhs].
    XOrI,
    /// Operands: [lhs, rhs]. Results: [i1].
    CmpI(CmpPredicate),
    /// Operands: [condition, true_value, false_value]. Results: [value].
    Select,

    // ── Structured control flow ─────────────────────────────────────
    /// Operands: [lb, ub, step, init...]. Results: one per init.
    /// One body block with args `[iv, iter_arg...]`, terminated by `Yield`.
    For,
    /// Operands: [condition]. Two blocks (then, else), each terminated by `Yield`.
    If,
    /// Terminator of `For`/`If` bodies. Operands: yielded values.
    Yield,

    // ── Tensor memory ───────────────────────────────────────────────
    /// Operands: [initial value]? Results: [memdesc].
    TmemAlloc,
    /// Operands: [memdesc]. Results: [tensor].
    TmemLoad,
    /// Operands: [memdesc, value, predicate].
    TmemStore,

    // ── Shared memory and barriers ──────────────────────────────────
    /// Operands: [initial value]? Results: [memdesc].
    LocalAlloc,
    /// Operands: [memdesc].
    LocalDealloc,
    /// Operands: [memdesc, index...]. Results: [memdesc view of one slot].
    MemDescSubview,
    /// Operands: [memdesc]. Results: [transposed view].
    MemDescTrans,
    /// Operands: [barrier memdesc].
    InitBarrier { count: u32 },
    /// Operands: [barrier memdesc].
    InvalBarrier,
    /// Operands: [barrier memdesc, phase, predicate?].
    WaitBarrier,

    // ── Asynchronous copies ─────────────────────────────────────────
    /// Operands: [src, dst memdesc, mask?]. Results: [token].
    AsyncCopyGlobalToLocal,
    /// Operands: [descriptor, barrier memdesc, dst memdesc, predicate].
    AsyncTmaCopyGlobalToLocal,
    /// Operands: [descriptor, barrier memdesc, dst memdesc, predicate].
    AsyncTmaGather,
    /// Operands: [descriptor, src memdesc].
    AsyncTmaCopyLocalToGlobal,
    /// Operands: [descriptor, src memdesc].
    AsyncTmaScatter,

    // ── Tensor core ─────────────────────────────────────────────────
    /// Asynchronous matrix multiply-accumulate into tensor memory.
    ///
    /// Operands: [a, b, d, use_d, pred, (a_scale, b_scale if scaled), (barrier if has_barrier)].
    /// The accumulator `d` is written in place; completion is signalled on the barrier.
    Mma { scaled: bool, has_barrier: bool },

    /// Any operation the transforms do not interpret.
    Opaque { name: Cow<'static, str>, pure: bool },
}

/// Operand slots of `For`.
pub mod for_op {
    pub const LOWER_BOUND: usize = 0;
    pub const UPPER_BOUND: usize = 1;
    pub const STEP: usize = 2;
    /// Index of the first loop-carried initial value.
    pub const FIRST_INIT: usize = 3;
}

/// Operand slots of `Mma`.
pub mod mma {
    pub const A: usize = 0;
    pub const B: usize = 1;
    pub const D: usize = 2;
    pub const USE_D: usize = 3;
    pub const PRED: usize = 4;
    pub const A_SCALE: usize = 5;
    pub const B_SCALE: usize = 6;

    /// Slot of the completion barrier, present once the MMA has one.
    pub const fn barrier(scaled: bool) -> usize {
        if scaled { 7 } else { 5 }
    }
}

/// Operand slots of `TmemStore`.
pub mod tmem_store {
    pub const DST: usize = 0;
    pub const SRC: usize = 1;
    pub const PRED: usize = 2;
}

impl OpKind {
    pub fn opaque(name: impl Into<Cow<'static, str>>, pure: bool) -> Self {
        OpKind::Opaque { name: name.into(), pure }
    }

    /// Printable mnemonic.
    pub fn name(&self) -> Cow<'_, str> {
        let name = match self {
            OpKind::Constant(_) => "arith.constant",
            OpKind::AddI => "arith.addi",
            OpKind::AndI => "arith.andi",
            OpKind::XOrI => "arith.xori",
            OpKind::CmpI(_) => "arith.cmpi",
            OpKind::Select => "arith.select",
            OpKind::For => "scf.for",
            OpKind::If => "scf.if",
            OpKind::Yield => "scf.yield",
            OpKind::TmemAlloc => "tmem_alloc",
            OpKind::TmemLoad => "tmem_load",
            OpKind::TmemStore => "tmem_store",
            OpKind::LocalAlloc => "local_alloc",
            OpKind::LocalDealloc => "local_dealloc",
            OpKind::MemDescSubview => "memdesc_subview",
            OpKind::MemDescTrans => "memdesc_trans",
            OpKind::InitBarrier { .. } => "init_barrier",
            OpKind::InvalBarrier => "inval_barrier",
            OpKind::WaitBarrier => "wait_barrier",
            OpKind::AsyncCopyGlobalToLocal => "async_copy_global_to_local",
            OpKind::AsyncTmaCopyGlobalToLocal => "async_tma_copy_global_to_local",
            OpKind::AsyncTmaGather => "async_tma_gather",
            OpKind::AsyncTmaCopyLocalToGlobal => "async_tma_copy_local_to_global",
            OpKind::AsyncTmaScatter => "async_tma_scatter",
            OpKind::Mma { scaled: false, .. } => "tc_gen5_mma",
            OpKind::Mma { scaled: true, .. } => "tc_gen5_mma_scaled",
            OpKind::Opaque { name, .. } => return Cow::Borrowed(name.as_ref()),
        };
        Cow::Borrowed(name)
    }

    /// Operations without side effects; dead ones may be removed.
    pub fn is_pure(&self) -> bool {
        match self {
            OpKind::Constant(_)
            | OpKind::AddI
            | OpKind::AndI
            | OpKind::XOrI
            | OpKind::CmpI(_)
            | OpKind::Select
            | OpKind::MemDescSubview
            | OpKind::MemDescTrans
            | OpKind::TmemLoad => true,
            OpKind::Opaque { pure, .. } => *pure,
            _ => false,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, OpKind::Yield)
    }

    pub fn is_mma(&self) -> bool {
        matches!(self, OpKind::Mma { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, OpKind::Constant(_))
    }

    /// Operations that only reinterpret a memory descriptor (operand 0) without copying.
    pub fn is_memdesc_view(&self) -> bool {
        matches!(self, OpKind::MemDescSubview | OpKind::MemDescTrans)
    }

    /// Asynchronous copy kinds: operand slot of the shared buffer they touch,
    /// and slot of the completion barrier, if any.
    pub fn async_copy_slots(&self) -> Option<(usize, Option<usize>)> {
        match self {
            OpKind::AsyncCopyGlobalToLocal => Some((1, None)),
            OpKind::AsyncTmaCopyGlobalToLocal | OpKind::AsyncTmaGather => Some((2, Some(1))),
            OpKind::AsyncTmaCopyLocalToGlobal | OpKind::AsyncTmaScatter => Some((1, None)),
            _ => None,
        }
    }

    /// Operand slot of the predicate for kinds that carry one.
    pub fn predicate_slot(&self) -> Option<usize> {
        match self {
            OpKind::Mma { .. } => Some(mma::PRED),
            OpKind::TmemStore => Some(tmem_store::PRED),
            OpKind::AsyncTmaCopyGlobalToLocal | OpKind::AsyncTmaGather => Some(3),
            _ => None,
        }
    }
}
