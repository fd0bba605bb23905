//! Arena-backed operation graph.
//!
//! Operations, values and blocks are stored in flat vectors and addressed by
//! copyable handles ([`OpId`], [`ValueId`], [`BlockId`]). Handles stay valid for
//! the lifetime of the graph: erasing an operation tombstones it instead of
//! shifting the arena, so analyses can hold handles across rewrites.
//!
//! Every value keeps its use list up to date. All operand mutation goes through
//! [`Graph::set_operand`] and friends so that `uses(v)` is always exact.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{ErasedOpSnafu, OpHasUsesSnafu, OperandOutOfRangeSnafu, Result};
use crate::op::OpKind;
use crate::types::{Attribute, Type};

macro_rules! handle {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Raw arena index.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

handle!(OpId, "op");
handle!(ValueId, "%");
handle!(BlockId, "^bb");

/// One operand slot of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub owner: OpId,
    pub index: usize,
}

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    Result { op: OpId, index: usize },
    BlockArg { block: BlockId, index: usize },
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
    uses: Vec<Use>,
}

#[derive(Debug, Clone)]
pub struct OpData {
    pub kind: OpKind,
    operands: SmallVec<[ValueId; 4]>,
    results: SmallVec<[ValueId; 2]>,
    regions: SmallVec<[BlockId; 2]>,
    parent: Option<BlockId>,
    attrs: BTreeMap<String, Attribute>,
    erased: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BlockData {
    args: SmallVec<[ValueId; 4]>,
    ops: Vec<OpId>,
    parent: Option<OpId>,
}

/// Position at which new operations are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// Immediately before the given operation.
    Before(OpId),
    /// Immediately after the given operation.
    After(OpId),
    /// At the start of a block.
    Start(BlockId),
    /// At the end of a block (after its terminator, if any).
    End(BlockId),
}

/// The operation graph of one translation unit.
///
/// The root block holds top-level operations (typically loops and the code
/// around them); it has no parent operation.
#[derive(Debug, Clone)]
pub struct Graph {
    ops: Vec<OpData>,
    values: Vec<ValueData>,
    blocks: Vec<BlockData>,
    root: BlockId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Self { ops: Vec::new(), values: Vec::new(), blocks: Vec::new(), root: BlockId::new(0) };
        graph.root = graph.new_block(None);
        graph
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Allocate an empty block owned by `parent`.
    pub fn new_block(&mut self, parent: Option<OpId>) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BlockData { parent, ..Default::default() });
        id
    }

    pub fn add_block_arg(&mut self, block: BlockId, ty: Type) -> ValueId {
        let index = self.blocks[block.index()].args.len();
        let value = self.new_value(ty, ValueDef::BlockArg { block, index });
        self.blocks[block.index()].args.push(value);
        value
    }

    /// Remove block arguments at `indices`. Their uses must already be gone.
    pub(crate) fn remove_block_args(&mut self, block: BlockId, indices: &[usize]) {
        let args = std::mem::take(&mut self.blocks[block.index()].args);
        let kept: SmallVec<[ValueId; 4]> =
            args.into_iter().enumerate().filter(|(i, _)| !indices.contains(i)).map(|(_, v)| v).collect();
        for (index, &value) in kept.iter().enumerate() {
            self.values[value.index()].def = ValueDef::BlockArg { block, index };
        }
        self.blocks[block.index()].args = kept;
    }

    pub fn block_args(&self, block: BlockId) -> &[ValueId] {
        &self.blocks[block.index()].args
    }

    pub fn block_ops(&self, block: BlockId) -> &[OpId] {
        &self.blocks[block.index()].ops
    }

    /// The operation owning this block, `None` for the root block.
    pub fn block_parent_op(&self, block: BlockId) -> Option<OpId> {
        self.blocks[block.index()].parent
    }

    /// Terminator of a block, if its last operation is one.
    pub fn terminator(&self, block: BlockId) -> Option<OpId> {
        self.block_ops(block).last().copied().filter(|&op| self.kind(op).is_terminator())
    }

    /// Operations of a block excluding its terminator.
    pub fn block_ops_without_terminator(&self, block: BlockId) -> &[OpId] {
        let ops = self.block_ops(block);
        match self.terminator(block) {
            Some(_) => &ops[..ops.len() - 1],
            None => ops,
        }
    }

    /// Re-parent a block under `op` (appended to its region list).
    pub fn move_block(&mut self, block: BlockId, op: OpId) {
        if let Some(old) = self.blocks[block.index()].parent {
            self.ops[old.index()].regions.retain(|b| *b != block);
        }
        self.blocks[block.index()].parent = Some(op);
        self.ops[op.index()].regions.push(block);
    }

    // ── Values ──────────────────────────────────────────────────────────

    fn new_value(&mut self, ty: Type, def: ValueDef) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ValueData { ty, def, uses: Vec::new() });
        id
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.values[value.index()].ty
    }

    pub fn value_def(&self, value: ValueId) -> ValueDef {
        self.values[value.index()].def
    }

    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.value_def(value) {
            ValueDef::Result { op, .. } => Some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Block argument position, if the value is a block argument.
    pub fn block_arg_position(&self, value: ValueId) -> Option<(BlockId, usize)> {
        match self.value_def(value) {
            ValueDef::BlockArg { block, index } => Some((block, index)),
            ValueDef::Result { .. } => None,
        }
    }

    /// Block in which the value becomes available.
    pub fn value_block(&self, value: ValueId) -> Option<BlockId> {
        match self.value_def(value) {
            ValueDef::Result { op, .. } => self.parent_block(op),
            ValueDef::BlockArg { block, .. } => Some(block),
        }
    }

    pub fn uses(&self, value: ValueId) -> &[Use] {
        &self.values[value.index()].uses
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        !self.values[value.index()].uses.is_empty()
    }

    /// Operations using `value`, one entry per use.
    pub fn users(&self, value: ValueId) -> impl Iterator<Item = OpId> + '_ {
        self.uses(value).iter().map(|u| u.owner)
    }

    /// Whether the value is defined by a `Constant`.
    pub fn is_constant(&self, value: ValueId) -> bool {
        self.defining_op(value).is_some_and(|op| self.kind(op).is_constant())
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Create an operation with fresh (empty) region blocks and insert it.
    pub fn create_op(
        &mut self,
        ip: InsertPoint,
        kind: OpKind,
        operands: &[ValueId],
        result_types: &[Type],
        num_regions: usize,
    ) -> OpId {
        let op = self.create_detached(kind, operands, result_types);
        for _ in 0..num_regions {
            let block = self.new_block(Some(op));
            self.ops[op.index()].regions.push(block);
        }
        self.insert_op(ip, op);
        op
    }

    fn create_detached(&mut self, kind: OpKind, operands: &[ValueId], result_types: &[Type]) -> OpId {
        let op = OpId::new(self.ops.len());
        self.ops.push(OpData {
            kind,
            operands: SmallVec::new(),
            results: SmallVec::new(),
            regions: SmallVec::new(),
            parent: None,
            attrs: BTreeMap::new(),
            erased: false,
        });
        for &value in operands {
            self.push_operand(op, value);
        }
        for (index, ty) in result_types.iter().enumerate() {
            let value = self.new_value(ty.clone(), ValueDef::Result { op, index });
            self.ops[op.index()].results.push(value);
        }
        op
    }

    /// Resolve an insertion point to `(block, position)`.
    pub fn resolve(&self, ip: InsertPoint) -> (BlockId, usize) {
        match ip {
            InsertPoint::Before(op) | InsertPoint::After(op) => {
                let block = self.ops[op.index()].parent.expect("insertion point must be attached to a block");
                let pos = self.position_in_block(op).expect("attached op is listed in its block");
                (block, if matches!(ip, InsertPoint::After(_)) { pos + 1 } else { pos })
            }
            InsertPoint::Start(block) => (block, 0),
            InsertPoint::End(block) => (block, self.block_ops(block).len()),
        }
    }

    fn insert_op(&mut self, ip: InsertPoint, op: OpId) {
        let (block, pos) = self.resolve(ip);
        self.blocks[block.index()].ops.insert(pos, op);
        self.ops[op.index()].parent = Some(block);
    }

    /// Detach `op` from its block and reinsert it at `ip`.
    pub fn move_op(&mut self, op: OpId, ip: InsertPoint) {
        self.detach(op);
        self.insert_op(ip, op);
    }

    fn detach(&mut self, op: OpId) {
        if let Some(block) = self.ops[op.index()].parent.take() {
            self.blocks[block.index()].ops.retain(|o| *o != op);
        }
    }

    pub fn op(&self, op: OpId) -> &OpData {
        &self.ops[op.index()]
    }

    pub fn kind(&self, op: OpId) -> &OpKind {
        &self.ops[op.index()].kind
    }

    pub fn kind_mut(&mut self, op: OpId) -> &mut OpKind {
        &mut self.ops[op.index()].kind
    }

    pub fn name(&self, op: OpId) -> String {
        self.kind(op).name().into_owned()
    }

    pub fn operands(&self, op: OpId) -> &[ValueId] {
        &self.ops[op.index()].operands
    }

    pub fn operand(&self, op: OpId, index: usize) -> ValueId {
        self.ops[op.index()].operands[index]
    }

    pub fn results(&self, op: OpId) -> &[ValueId] {
        &self.ops[op.index()].results
    }

    /// First result. Panics for operations without results.
    pub fn result(&self, op: OpId) -> ValueId {
        self.ops[op.index()].results[0]
    }

    pub fn regions(&self, op: OpId) -> &[BlockId] {
        &self.ops[op.index()].regions
    }

    pub fn parent_block(&self, op: OpId) -> Option<BlockId> {
        self.ops[op.index()].parent
    }

    /// Operation owning the block that contains `op`.
    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        self.parent_block(op).and_then(|b| self.block_parent_op(b))
    }

    /// Closest enclosing operation satisfying `pred`.
    pub fn parent_matching(&self, op: OpId, pred: impl Fn(&OpKind) -> bool) -> Option<OpId> {
        let mut current = self.parent_op(op);
        while let Some(parent) = current {
            if pred(self.kind(parent)) {
                return Some(parent);
            }
            current = self.parent_op(parent);
        }
        None
    }

    /// Closest enclosing `scf.for`.
    pub fn parent_loop(&self, op: OpId) -> Option<OpId> {
        self.parent_matching(op, |k| matches!(k, OpKind::For))
    }

    pub fn is_erased(&self, op: OpId) -> bool {
        self.ops[op.index()].erased
    }

    pub fn position_in_block(&self, op: OpId) -> Option<usize> {
        let block = self.parent_block(op)?;
        self.block_ops(block).iter().position(|o| *o == op)
    }

    /// Next operation in the same block.
    pub fn next_op(&self, op: OpId) -> Option<OpId> {
        let block = self.parent_block(op)?;
        let pos = self.position_in_block(op)?;
        self.block_ops(block).get(pos + 1).copied()
    }

    /// Whether `ancestor` is `op` or (transitively) encloses it.
    pub fn is_ancestor(&self, ancestor: OpId, op: OpId) -> bool {
        let mut current = Some(op);
        while let Some(o) = current {
            if o == ancestor {
                return true;
            }
            current = self.parent_op(o);
        }
        false
    }

    /// The operation in `block` that is `op` or encloses it.
    pub fn find_ancestor_op_in_block(&self, block: BlockId, op: OpId) -> Option<OpId> {
        let mut current = op;
        loop {
            let parent = self.parent_block(current)?;
            if parent == block {
                return Some(current);
            }
            current = self.block_parent_op(parent)?;
        }
    }

    /// Both operations must be in the same block.
    pub fn is_before_in_block(&self, a: OpId, b: OpId) -> bool {
        debug_assert_eq!(self.parent_block(a), self.parent_block(b));
        self.position_in_block(a) < self.position_in_block(b)
    }

    /// Whether `value` is available outside (before) `op`, i.e. not defined inside it.
    pub fn is_defined_outside(&self, value: ValueId, op: OpId) -> bool {
        match self.value_def(value) {
            ValueDef::Result { op: def, .. } => !self.is_ancestor(op, def),
            ValueDef::BlockArg { block, .. } => self.block_parent_op(block).is_none_or(|owner| !self.is_ancestor(op, owner)),
        }
    }

    // ── Operands and uses ───────────────────────────────────────────────

    pub fn push_operand(&mut self, op: OpId, value: ValueId) {
        let index = self.ops[op.index()].operands.len();
        self.ops[op.index()].operands.push(value);
        self.values[value.index()].uses.push(Use { owner: op, index });
    }

    pub fn set_operand(&mut self, op: OpId, index: usize, value: ValueId) -> Result<()> {
        let count = self.operands(op).len();
        ensure!(index < count, OperandOutOfRangeSnafu { op, index, count });
        let old = self.ops[op.index()].operands[index];
        if old == value {
            return Ok(());
        }
        self.values[old.index()].uses.retain(|u| !(u.owner == op && u.index == index));
        self.ops[op.index()].operands[index] = value;
        self.values[value.index()].uses.push(Use { owner: op, index });
        Ok(())
    }

    /// Replace the whole operand list.
    pub fn set_operands(&mut self, op: OpId, operands: &[ValueId]) {
        self.drop_operand_uses(op);
        self.ops[op.index()].operands.clear();
        for &value in operands {
            self.push_operand(op, value);
        }
    }

    fn drop_operand_uses(&mut self, op: OpId) {
        for &value in &self.ops[op.index()].operands {
            self.values[value.index()].uses.retain(|u| u.owner != op);
        }
    }

    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        self.replace_uses_with_if(old, new, |_, _| true);
    }

    /// Redirect the uses of `old` accepted by `pred` to `new`.
    pub fn replace_uses_with_if(&mut self, old: ValueId, new: ValueId, mut pred: impl FnMut(&Graph, Use) -> bool) {
        if old == new {
            return;
        }
        let selected: Vec<Use> = self.uses(old).iter().copied().filter(|&u| pred(self, u)).collect();
        for u in selected {
            self.ops[u.owner.index()].operands[u.index] = new;
            self.values[new.index()].uses.push(u);
        }
        let operands_now = &self.ops;
        self.values[old.index()].uses.retain(|u| operands_now[u.owner.index()].operands[u.index] == old);
    }

    /// Within `op` only, replace operand `old` by `new`.
    pub fn replace_uses_of_with(&mut self, op: OpId, old: ValueId, new: ValueId) {
        self.replace_uses_with_if(old, new, |_, u| u.owner == op);
    }

    // ── Erasure ─────────────────────────────────────────────────────────

    /// Erase an operation and everything nested in it.
    ///
    /// Fails if any result is still used.
    pub fn erase_op(&mut self, op: OpId) -> Result<()> {
        ensure!(!self.is_erased(op), ErasedOpSnafu { op });
        for &value in self.results(op) {
            let uses = self.uses(value).len();
            ensure!(uses == 0, OpHasUsesSnafu { op, name: self.name(op), value, uses });
        }
        self.detach(op);
        self.tombstone(op);
        Ok(())
    }

    fn tombstone(&mut self, op: OpId) {
        let regions = self.ops[op.index()].regions.clone();
        for block in regions {
            let nested = self.blocks[block.index()].ops.clone();
            for child in nested.into_iter().rev() {
                self.tombstone(child);
            }
        }
        self.drop_operand_uses(op);
        self.ops[op.index()].erased = true;
    }

    // ── Attributes ──────────────────────────────────────────────────────

    pub fn set_attr(&mut self, op: OpId, name: impl Into<String>, attr: Attribute) {
        self.ops[op.index()].attrs.insert(name.into(), attr);
    }

    pub fn attr(&self, op: OpId, name: &str) -> Option<Attribute> {
        self.ops[op.index()].attrs.get(name).copied()
    }

    pub fn has_attr(&self, op: OpId, name: &str) -> bool {
        self.ops[op.index()].attrs.contains_key(name)
    }

    pub fn remove_attr(&mut self, op: OpId, name: &str) -> Option<Attribute> {
        self.ops[op.index()].attrs.remove(name)
    }

    pub fn attrs(&self, op: OpId) -> &BTreeMap<String, Attribute> {
        &self.ops[op.index()].attrs
    }

    pub(crate) fn copy_attrs(&mut self, from: OpId, to: OpId) {
        let attrs = self.ops[from.index()].attrs.clone();
        self.ops[to.index()].attrs.extend(attrs);
    }

    // ── Traversal ───────────────────────────────────────────────────────

    /// Pre-order walk over `op` and every operation nested in it.
    pub fn walk(&self, op: OpId, f: &mut impl FnMut(OpId)) {
        f(op);
        for &block in self.regions(op) {
            self.walk_block(block, f);
        }
    }

    /// Pre-order walk over every operation nested in `block`.
    pub fn walk_block(&self, block: BlockId, f: &mut impl FnMut(OpId)) {
        for &op in self.block_ops(block) {
            self.walk(op, f);
        }
    }

    /// Every live operation of the unit, in pre-order.
    pub fn all_ops(&self) -> Vec<OpId> {
        let mut ops = Vec::new();
        self.walk_block(self.root, &mut |op| ops.push(op));
        ops
    }

    /// Operands of `op` and of every operation nested in it that are defined outside `op`.
    pub fn nested_operands(&self, op: OpId) -> Vec<ValueId> {
        let mut operands = Vec::new();
        self.walk(op, &mut |nested| {
            for &value in self.operands(nested) {
                if self.is_defined_outside(value, op) {
                    operands.push(value);
                }
            }
        });
        operands
    }
}
