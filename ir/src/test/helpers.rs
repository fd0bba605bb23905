//! Graph construction shortcuts shared by the unit tests.

use crate::builder::Builder;
use crate::graph::{Graph, OpId, ValueId};

/// Builder appending to the root block.
pub fn root_builder(graph: &mut Graph) -> Builder<'_> {
    let root = graph.root();
    Builder::at_end(graph, root)
}

/// `scf.for %i = 0 to 8 step 1` carrying `inits`, appended to the root block.
///
/// The body is left without a terminator.
pub fn counted_loop(graph: &mut Graph, inits: &[ValueId]) -> OpId {
    let mut b = root_builder(graph);
    let lb = b.const_i32(0);
    let ub = b.const_i32(8);
    let step = b.const_i32(1);
    b.for_loop(lb, ub, step, inits)
}

/// Builder appending to the body of `for_op`.
pub fn body_builder(graph: &mut Graph, for_op: OpId) -> Builder<'_> {
    let body = graph.for_body(for_op);
    Builder::at_end(graph, body)
}
