use snafu::Snafu;

use crate::graph::{OpId, ValueId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Erasing an operation whose results are still referenced.
    #[snafu(display("cannot erase {op:?} ({name}): result {value:?} still has {uses} use(s)"))]
    OpHasUses { op: OpId, name: String, value: ValueId, uses: usize },

    /// Operation is not an `scf.for`.
    #[snafu(display("{op:?} is a {name}, expected scf.for"))]
    NotALoop { op: OpId, name: String },

    /// Operand slot does not exist.
    #[snafu(display("operand index {index} out of range for {op:?} with {count} operand(s)"))]
    OperandOutOfRange { op: OpId, index: usize, count: usize },

    /// Operation was already erased.
    #[snafu(display("{op:?} was erased"))]
    ErasedOp { op: OpId },

    /// Block has no terminator where one is required.
    #[snafu(display("block of {op:?} has no terminator"))]
    MissingTerminator { op: OpId },

    /// Clean-up did not reach a fixed point.
    #[snafu(display("canonicalization did not converge after {iterations} iterations"))]
    CanonicalizationDidNotConverge { iterations: usize },
}
