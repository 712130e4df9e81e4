//! TGF parser implementation.
//!
//! Parsing is line based. Every non-empty line defines one node; operands are
//! resolved once the whole file has been read so they may point forward.

use super::{Graph, Node, NodeId};
use crate::core::error::GraphError;
use crate::core::frontend::NodeOp;
use std::collections::HashMap;

pub fn parse_graph(text: &str) -> Result<Graph, GraphError> {
    Parser::new(text).parse()
}

struct Parser<'a> {
    text: &'a str,
    graph: Graph,
    defined_at: HashMap<&'a str, usize>,
    resolves: Vec<Resolve<'a>>,
}

/// An operand reference waiting for its definition.
#[derive(Debug)]
struct Resolve<'a> {
    node: NodeId,
    name: &'a str,
    line: usize,
}

/// Cursor over one line.
struct Line<'a> {
    text: &'a str,
    pos: usize,
    number: usize,
}

impl<'a> Line<'a> {
    fn error(&self, message: impl Into<String>) -> GraphError {
        GraphError::Parse { line: self.number, message: message.into() }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn is_eol(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.text.len()
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), GraphError> {
        if !self.try_read(ch) {
            let found = self.rest().chars().next();
            return Err(match found {
                Some(found) => self.error(format!("expected '{ch}' but found '{found}'")),
                None => self.error(format!("expected '{ch}' at end of line")),
            });
        }
        Ok(())
    }

    fn read_identifier(&mut self) -> Result<&'a str, GraphError> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
            .unwrap_or(rest.len());
        if len == 0 || !rest.starts_with(|ch: char| ch.is_ascii_alphabetic() || ch == '_') {
            return Err(self.error("expected identifier"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn read_value_name(&mut self) -> Result<&'a str, GraphError> {
        self.expect('%')?;
        self.read_identifier()
    }

    fn read_number(&mut self) -> Result<usize, GraphError> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected number"));
        }
        let value = rest[..len]
            .parse()
            .map_err(|_| self.error(format!("number {} is too large", &rest[..len])))?;
        self.pos += len;
        Ok(value)
    }

    fn read_shape(&mut self) -> Result<Vec<usize>, GraphError> {
        self.expect('[')?;
        let mut shape = Vec::new();
        if self.try_read(']') {
            return Err(self.error("empty shape"));
        }
        loop {
            let dim = self.read_number()?;
            if dim == 0 {
                return Err(self.error("shape dimensions must be positive"));
            }
            shape.push(dim);
            if self.try_read(']') {
                return Ok(shape);
            }
            self.expect(',')?;
        }
    }
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            graph: Graph::new(),
            defined_at: HashMap::new(),
            resolves: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Graph, GraphError> {
        for (idx, raw) in self.text.lines().enumerate() {
            let text = match raw.find(';') {
                Some(comment) => &raw[..comment],
                None => raw,
            };
            let mut line = Line { text, pos: 0, number: idx + 1 };
            if line.is_eol() {
                continue;
            }
            self.parse_node(&mut line)?;
        }

        self.resolve_all_references()?;
        Ok(self.graph)
    }

    fn parse_node(&mut self, line: &mut Line<'a>) -> Result<(), GraphError> {
        let name = line.read_value_name()?;
        if let Some(first) = self.defined_at.get(name) {
            return Err(line.error(format!("%{name} is already defined on line {first}")));
        }
        line.expect('=')?;
        let op_name = line.read_identifier()?;

        let (op, operands) = match op_name {
            "input" => (NodeOp::Input { shape: line.read_shape()? }, Vec::new()),
            "const" => (NodeOp::Constant { shape: line.read_shape()? }, Vec::new()),
            "matmul" | "add" | "relu" => {
                let op = match op_name {
                    "matmul" => NodeOp::MatMul,
                    "add" => NodeOp::Add,
                    _ => NodeOp::Relu,
                };
                let mut operands = vec![line.read_value_name()?];
                while line.try_read(',') {
                    operands.push(line.read_value_name()?);
                }
                (op, operands)
            }
            other => return Err(line.error(format!("unknown operation '{other}'"))),
        };
        if !line.is_eol() {
            return Err(line.error(format!("unexpected trailing input '{}'", line.rest().trim())));
        }

        let node = self.graph.push(Node { name: name.to_string(), op, inputs: Vec::new() });
        self.defined_at.insert(name, line.number);
        for operand in operands {
            self.resolves.push(Resolve { node, name: operand, line: line.number });
        }
        Ok(())
    }

    fn resolve_all_references(&mut self) -> Result<(), GraphError> {
        for resolve in &self.resolves {
            let target = self.graph.lookup(resolve.name).ok_or_else(|| GraphError::Parse {
                line: resolve.line,
                message: format!("unknown value %{}", resolve.name),
            })?;
            self.graph.node_mut(resolve.node).inputs.push(target);
        }
        Ok(())
    }
}
