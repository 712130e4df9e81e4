//! Graph frontend implementation for TGF graphs.
//!
//! This adaptor lets the tcuc compiler lower a parsed [`Graph`], so tests and
//! the command-line driver exercise the same traversal and rewrite code as any
//! other frontend.

use super::Graph;
use crate::core::frontend::{Frontend, NodeOp};

/// Index of a node in its [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Adaptor that implements Frontend for a TGF graph.
pub struct GraphFrontend<'g> {
    graph: &'g Graph,
}

impl<'g> GraphFrontend<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }
}

impl Frontend for GraphFrontend<'_> {
    type NodeRef = NodeId;

    fn node_for_output(&self, name: &str) -> Option<NodeId> {
        self.graph.lookup(name)
    }

    fn node_name(&self, node: NodeId) -> &str {
        &self.graph.node(node).name
    }

    fn node_op(&self, node: NodeId) -> &NodeOp {
        &self.graph.node(node).op
    }

    fn node_inputs(&self, node: NodeId) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.graph.node(node).inputs.iter().copied())
    }
}
