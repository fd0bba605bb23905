//! Tree rendering of the graph.
//!
//! Operations with regions become tree nodes whose children are their blocks;
//! blocks list their operations in order. The output is stable for a given
//! graph, which makes it usable for "nothing changed" comparisons.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::io;

use ptree::{Style, TreeItem};

use crate::graph::{BlockId, Graph, OpId};
use crate::op::OpKind;

#[derive(Clone, Copy)]
enum Node {
    Root,
    Op(OpId),
    Block(BlockId),
}

#[derive(Clone)]
pub struct GraphTree<'g> {
    graph: &'g Graph,
    node: Node,
}

impl<'g> GraphTree<'g> {
    fn child(&self, node: Node) -> Self {
        Self { graph: self.graph, node }
    }
}

impl TreeItem for GraphTree<'_> {
    type Child = Self;

    fn write_self<W: io::Write>(&self, f: &mut W, _style: &Style) -> io::Result<()> {
        match self.node {
            Node::Root => write!(f, "graph"),
            Node::Op(op) => write!(f, "{}", format_op(self.graph, op)),
            Node::Block(block) => write!(f, "{}", format_block(self.graph, block)),
        }
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        let children: Vec<Self> = match self.node {
            Node::Root => self.graph.block_ops(self.graph.root()).iter().map(|&op| self.child(Node::Op(op))).collect(),
            Node::Op(op) => self.graph.regions(op).iter().map(|&b| self.child(Node::Block(b))).collect(),
            Node::Block(block) => self.graph.block_ops(block).iter().map(|&op| self.child(Node::Op(op))).collect(),
        };
        Cow::Owned(children)
    }
}

/// One-line rendering of an operation.
pub fn format_op(graph: &Graph, op: OpId) -> String {
    let mut line = String::new();
    let results = graph.results(op);
    if !results.is_empty() {
        let names: Vec<String> = results.iter().map(|v| v.to_string()).collect();
        let _ = write!(line, "{} = ", names.join(", "));
    }
    let _ = write!(line, "{}", graph.kind(op).name());
    match graph.kind(op) {
        OpKind::Constant(value) => {
            let _ = write!(line, " {value}");
        }
        OpKind::CmpI(pred) => {
            let _ = write!(line, " {}", pred.name());
        }
        OpKind::InitBarrier { count } => {
            let _ = write!(line, " count={count}");
        }
        _ => {}
    }
    let operands: Vec<String> = graph.operands(op).iter().map(|v| v.to_string()).collect();
    if !operands.is_empty() {
        let _ = write!(line, "({})", operands.join(", "));
    }
    if !results.is_empty() {
        let types: Vec<String> = results.iter().map(|&v| graph.value_type(v).to_string()).collect();
        let _ = write!(line, " : {}", types.join(", "));
    }
    let attrs = graph.attrs(op);
    if !attrs.is_empty() {
        let rendered: Vec<String> = attrs.iter().map(|(k, v)| format!("{k} = {v}")).collect();
        let _ = write!(line, " {{{}}}", rendered.join(", "));
    }
    line
}

fn format_block(graph: &Graph, block: BlockId) -> String {
    let args: Vec<String> =
        graph.block_args(block).iter().map(|&v| format!("{v}: {}", graph.value_type(v))).collect();
    format!("{block}({})", args.join(", "))
}

impl Graph {
    pub fn tree_item(&self) -> GraphTree<'_> {
        GraphTree { graph: self, node: Node::Root }
    }

    /// Render the whole unit as an indented tree.
    pub fn tree(&self) -> String {
        render(&self.tree_item())
    }

    /// Render one operation and everything nested in it.
    pub fn op_tree(&self, op: OpId) -> String {
        render(&GraphTree { graph: self, node: Node::Op(op) })
    }
}

fn render(item: &GraphTree<'_>) -> String {
    let mut buf = Vec::new();
    ptree::write_tree(item, &mut buf).expect("tree rendering failed");
    String::from_utf8_lossy(&buf).into_owned()
}
