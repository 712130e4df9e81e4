//! Test graph format (TGF) and its data structures.
//!
//! This module provides a tiny textual graph format for writing compiler
//! tests and feeding the `tcuc` driver without depending on a real
//! network-exchange format. The format is designed to be:
//! - Human-readable and writable
//! - Easy to parse, one node per line
//! - Sufficient to exercise every lowering path
//!
//! # TGF Format
//!
//! ```text
//! ; Comments start with semicolon
//! %x = input [4, 16]
//! %w = const [16, 8]
//! %b = const [8]
//! %h = matmul %x, %w, %b
//! %y = relu %h
//! %z = add %y, %y
//! ```
//!
//! Operands may refer to nodes defined further down the file. Value names are
//! ASCII letters, digits and underscores and do not start with a digit.

use crate::core::error::GraphError;
use crate::core::frontend::NodeOp;
use std::collections::HashMap;
use std::fmt;

pub mod adaptor;
pub mod parser;

pub use adaptor::{GraphFrontend, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub op: NodeOp,
    pub inputs: Vec<NodeId>,
}

/// A parsed computation graph. Nodes keep their definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: Vec<Node>,
    by_name: HashMap<String, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, GraphError> {
        parser::parse_graph(text)
    }

    /// Append a node; operands must already exist.
    pub fn add_node(&mut self, name: &str, op: NodeOp, inputs: &[&str]) -> Result<NodeId, GraphError> {
        if !is_value_name(name) {
            return Err(GraphError::Malformed {
                node: name.to_string(),
                reason: "invalid name".to_string(),
            });
        }
        if self.by_name.contains_key(name) {
            return Err(GraphError::Malformed {
                node: name.to_string(),
                reason: "defined twice".to_string(),
            });
        }
        let inputs = inputs
            .iter()
            .map(|&input| {
                self.lookup(input).ok_or_else(|| GraphError::Malformed {
                    node: name.to_string(),
                    reason: format!("unknown operand %{input}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.push(Node { name: name.to_string(), op, inputs }))
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.by_name.insert(node.name.clone(), id);
        self.nodes.push(node);
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx as u32), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Whether `name` can name a value in TGF.
pub fn is_value_name(name: &str) -> bool {
    name.starts_with(|ch: char| ch.is_ascii_alphabetic() || ch == '_')
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn write_shape(f: &mut fmt::Formatter<'_>, shape: &[usize]) -> fmt::Result {
    write!(f, "[")?;
    for (idx, dim) in shape.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{dim}")?;
    }
    write!(f, "]")
}

/// Prints the graph back in TGF.
impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "%{} = {}", node.name, node.op.name())?;
            match &node.op {
                NodeOp::Input { shape } | NodeOp::Constant { shape } => {
                    write!(f, " ")?;
                    write_shape(f, shape)?;
                }
                _ => {
                    for (idx, input) in node.inputs.iter().enumerate() {
                        let sep = if idx == 0 { " " } else { ", " };
                        write!(f, "{sep}%{}", self.node(*input).name)?;
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_display() {
        let mut graph = Graph::new();
        graph.add_node("x", NodeOp::Input { shape: vec![4, 16] }, &[]).unwrap();
        graph.add_node("w", NodeOp::Constant { shape: vec![16, 8] }, &[]).unwrap();
        graph.add_node("h", NodeOp::MatMul, &["x", "w"]).unwrap();
        graph.add_node("y", NodeOp::Relu, &["h"]).unwrap();

        let text = graph.to_string();
        assert_eq!(
            text,
            "%x = input [4, 16]\n%w = const [16, 8]\n%h = matmul %x, %w\n%y = relu %h\n"
        );
        assert_eq!(Graph::parse(&text).unwrap(), graph);
    }

    #[test]
    fn test_builder_rejects_bad_nodes() {
        let mut graph = Graph::new();
        graph.add_node("x", NodeOp::Input { shape: vec![4] }, &[]).unwrap();
        assert!(graph.add_node("x", NodeOp::Relu, &[]).is_err());
        assert!(matches!(
            graph.add_node("y", NodeOp::Relu, &["z"]),
            Err(GraphError::Malformed { ref node, .. }) if node == "y"
        ));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_builder_rejects_invalid_names() {
        let mut graph = Graph::new();
        for name in ["", "a.b", "h.acc", "1x", "x-y", "é"] {
            assert!(matches!(
                graph.add_node(name, NodeOp::Input { shape: vec![4] }, &[]),
                Err(GraphError::Malformed { ref reason, .. }) if reason == "invalid name"
            ));
        }
        assert!(graph.add_node("_x1", NodeOp::Input { shape: vec![4] }, &[]).is_ok());
        assert_eq!(graph.len(), 1);
    }
}
