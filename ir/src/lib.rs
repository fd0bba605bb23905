//! Operation graph for the mmapipe transforms.
//!
//! The IR is a small SSA graph with structured control flow: `scf.for` loops
//! carrying values through block arguments, `scf.if` with two regions, and the
//! tensor-memory, shared-memory, barrier and MMA operations the pipeliner
//! rewrites.
//!
//! # Module Organization
//!
//! - [`types`] - Value types, constants and attributes
//! - [`op`] - Operation kinds and operand slot layouts
//! - [`graph`] - Arena graph with use lists, erasure and traversal
//! - [`builder`] - Insertion-point builder
//! - [`region`] - Loop helpers, including signature rebuilding
//! - [`dominance`] - Dominance for nested regions
//! - [`slice`] - Backward slices
//! - [`canonicalize`] - Dead-code and loop-carried value clean-up
//! - [`tree`] - Tree rendering
//! - [`error`] - Error types and result handling

pub mod builder;
pub mod canonicalize;
pub mod dominance;
pub mod error;
pub mod graph;
pub mod op;
pub mod region;
pub mod slice;
pub mod tree;
pub mod types;

#[cfg(test)]
pub mod test;

pub use builder::Builder;
pub use error::{Error, Result};
pub use graph::{BlockId, Graph, InsertPoint, OpId, Use, ValueDef, ValueId};
pub use op::OpKind;
pub use slice::SliceOptions;
pub use types::{Attribute, CmpPredicate, ConstValue, MemDescType, MemorySpace, ScalarType, Shape, Type};
