// This module defines the Frontend trait, the bridge between tcuc and any computation graph
// representation. A frontend only has to answer a handful of structural queries: which node
// produces a named output, a node's name, its operation and its operands. Everything else is
// provided on top of those queries. traverse() walks backward from the requested outputs and
// returns every reachable node exactly once in dependency order, rejecting unknown output
// names and cycles. rewrite() lowers that node list into the Emitter program the scheduler
// consumes: graph inputs and constants become tensors with a DRAM home and are loaded right
// before their first consumer, matrix multiplies and additions go through accumulator memory,
// a Relu whose producer has no other use is fused into the producer's activation, and every
// requested output is stored to its own DRAM region right after it has been produced.
// mk_consts_dimensions() applies the layout rules for constants on the target.

//! Graph frontends and lowering to emitters.

use super::architecture::Architecture;
use super::context::EmitContext;
use super::dimensions::MemoryDimensions;
use super::error::{CompileError, CompileResult, GraphError};
use super::tensor::TensorId;
use crate::tcu::emitter::{Activation, Emitter};
use hashbrown::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// Operations a frontend can express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOp {
    /// Graph input, provided in DRAM0 at run time.
    Input { shape: Vec<usize> },
    /// Constant data such as weights and biases, provided in DRAM1.
    Constant { shape: Vec<usize> },
    /// `x * w` or `x * w + b`; `w` and `b` must be constants.
    MatMul,
    Add,
    Relu,
}

impl NodeOp {
    pub fn name(&self) -> &'static str {
        match self {
            NodeOp::Input { .. } => "input",
            NodeOp::Constant { .. } => "const",
            NodeOp::MatMul => "matmul",
            NodeOp::Add => "add",
            NodeOp::Relu => "relu",
        }
    }
}

/// Bridge between a graph representation and tcuc.
///
/// Implementors provide the structural queries; traversal and lowering are
/// provided methods, so every graph format lowers the same way.
pub trait Frontend {
    type NodeRef: Copy + Eq + Hash + Debug;

    /// Node producing the tensor called `name`.
    fn node_for_output(&self, name: &str) -> Option<Self::NodeRef>;

    fn node_name(&self, node: Self::NodeRef) -> &str;

    fn node_op(&self, node: Self::NodeRef) -> &NodeOp;

    /// Operands of a node, in declaration order.
    fn node_inputs(&self, node: Self::NodeRef) -> Box<dyn Iterator<Item = Self::NodeRef> + '_>;

    /// Every node needed for `outputs`, producers before consumers.
    ///
    /// The walk is a depth-first post-order starting from each output in the
    /// given order, visiting operands in declaration order. Nodes that no
    /// output depends on are never visited.
    fn traverse(&self, outputs: &[&str]) -> Result<Vec<Self::NodeRef>, GraphError> {
        let roots = outputs
            .iter()
            .map(|&name| {
                self.node_for_output(name)
                    .ok_or_else(|| GraphError::UnknownOutput { name: name.to_string() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut state: HashMap<Self::NodeRef, Visit> = HashMap::new();
        let mut order = Vec::new();
        for root in roots {
            if state.contains_key(&root) {
                continue;
            }
            state.insert(root, Visit::Active);
            let mut stack = vec![(root, self.node_inputs(root).collect::<Vec<_>>(), 0usize)];

            while let Some((node, inputs, next)) = stack.last_mut() {
                if let Some(&child) = inputs.get(*next) {
                    *next += 1;
                    match state.get(&child) {
                        Some(Visit::Done) => {}
                        Some(Visit::Active) => {
                            return Err(GraphError::Cycle { node: self.node_name(child).to_string() });
                        }
                        None => {
                            state.insert(child, Visit::Active);
                            let inputs = self.node_inputs(child).collect();
                            stack.push((child, inputs, 0));
                        }
                    }
                } else {
                    let node = *node;
                    stack.pop();
                    state.insert(node, Visit::Done);
                    order.push(node);
                }
            }
        }
        log::debug!("traversal reached {} nodes from {} outputs", order.len(), outputs.len());
        Ok(order)
    }

    /// Lower traversed nodes into the operation program.
    fn rewrite(&self, ctx: &mut EmitContext<'_>, nodes: &[Self::NodeRef]) -> CompileResult<Vec<Emitter>> {
        Lowering::new(self, ctx, nodes)?.run(nodes)
    }

    /// On-chip layout of a constant of the given shape, or `None` when it
    /// does not fit the address space.
    fn mk_consts_dimensions(&self, arch: &Architecture, shape: &[usize]) -> Option<MemoryDimensions> {
        MemoryDimensions::consts(shape, arch.array_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done,
}

struct Lowered {
    tensor: TensorId,
    shape: Vec<usize>,
    /// Lives in DRAM until a `Load` brings it on chip.
    needs_load: bool,
}

struct Lowering<'f, 'c, 'arena, F: Frontend + ?Sized> {
    frontend: &'f F,
    ctx: &'c mut EmitContext<'arena>,
    values: HashMap<F::NodeRef, Lowered>,
    /// Constants used as matmul weights.
    weights: HashSet<F::NodeRef>,
    /// Producer to the Relu fused into its activation.
    fused: HashMap<F::NodeRef, F::NodeRef>,
    outputs: HashSet<F::NodeRef>,
    program: Vec<Emitter>,
}

impl<'f, 'c, 'arena, F: Frontend + ?Sized> Lowering<'f, 'c, 'arena, F> {
    fn new(frontend: &'f F, ctx: &'c mut EmitContext<'arena>, nodes: &[F::NodeRef]) -> CompileResult<Self> {
        let mut outputs = HashSet::new();
        for &name in ctx.outputs() {
            let node = frontend
                .node_for_output(name)
                .ok_or_else(|| GraphError::UnknownOutput { name: name.to_string() })?;
            outputs.insert(node);
        }

        let mut consumers: HashMap<F::NodeRef, usize> = HashMap::new();
        let mut weights = HashSet::new();
        for &node in nodes {
            for (idx, input) in frontend.node_inputs(node).enumerate() {
                *consumers.entry(input).or_default() += 1;
                if idx == 1 && *frontend.node_op(node) == NodeOp::MatMul {
                    weights.insert(input);
                }
            }
        }

        let mut fused = HashMap::new();
        for &node in nodes {
            if *frontend.node_op(node) != NodeOp::Relu {
                continue;
            }
            let inputs: Vec<_> = frontend.node_inputs(node).collect();
            let [producer] = inputs[..] else {
                continue;
            };
            let fusible = matches!(frontend.node_op(producer), NodeOp::MatMul | NodeOp::Add)
                && consumers.get(&producer) == Some(&1)
                && !outputs.contains(&producer);
            if fusible {
                fused.insert(producer, node);
            }
        }

        Ok(Self {
            frontend,
            ctx,
            values: HashMap::new(),
            weights,
            fused,
            outputs,
            program: Vec::new(),
        })
    }

    fn run(mut self, nodes: &[F::NodeRef]) -> CompileResult<Vec<Emitter>> {
        for &node in nodes {
            self.lower(node)?;
        }
        log::debug!(
            "lowered {} nodes into {} operations ({} fused activations)",
            nodes.len(),
            self.program.len(),
            self.fused.len()
        );
        Ok(self.program)
    }

    fn malformed(&self, node: F::NodeRef, reason: String) -> CompileError {
        GraphError::Malformed {
            node: self.frontend.node_name(node).to_string(),
            reason,
        }
        .into()
    }

    fn shape_of(&self, node: F::NodeRef) -> CompileResult<Vec<usize>> {
        self.values
            .get(&node)
            .map(|v| v.shape.clone())
            .ok_or_else(|| self.malformed(node, "used before it is defined".to_string()))
    }

    /// Tensor of an operand, loading it first if it still lives in DRAM.
    fn operand(&mut self, node: F::NodeRef) -> CompileResult<TensorId> {
        let Some(value) = self.values.get_mut(&node) else {
            return Err(self.malformed(node, "used before it is defined".to_string()));
        };
        if value.needs_load {
            value.needs_load = false;
            self.program.push(Emitter::Load { tensor: value.tensor });
        }
        Ok(value.tensor)
    }

    /// Operand of an elementwise operation; weight-padded constants do not qualify.
    fn elementwise(&mut self, node: F::NodeRef) -> CompileResult<TensorId> {
        let tensor = self.operand(node)?;
        let dims = &self.ctx.tensors().get(tensor).dims;
        if MemoryDimensions::vars(dims.shape(), dims.vector_size()).as_ref() != Some(dims) {
            return Err(self.malformed(node, "weight constants cannot be used elementwise".to_string()));
        }
        Ok(tensor)
    }

    fn define(&mut self, node: F::NodeRef, tensor: TensorId, shape: Vec<usize>, needs_load: bool) {
        self.values.insert(node, Lowered { tensor, shape, needs_load });
    }

    /// Store a requested output right after it has been produced.
    fn finish(&mut self, node: F::NodeRef) -> CompileResult<()> {
        if !self.outputs.contains(&node) {
            return Ok(());
        }
        let tensor = self.operand(node)?;
        self.ctx.mark_output(tensor)?;
        self.program.push(Emitter::Store { tensor });
        Ok(())
    }

    fn expect_arity(&self, node: F::NodeRef, inputs: &[F::NodeRef], arity: usize) -> CompileResult<()> {
        if inputs.len() != arity {
            return Err(self.malformed(
                node,
                format!(
                    "{} expects {arity} operands, got {}",
                    self.frontend.node_op(node).name(),
                    inputs.len()
                ),
            ));
        }
        Ok(())
    }

    fn check_shape(&self, node: F::NodeRef, shape: &[usize]) -> CompileResult<()> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(self.malformed(node, format!("invalid shape {shape:?}")));
        }
        Ok(())
    }

    /// Activation layout of a node's value.
    fn vars(&self, node: F::NodeRef, shape: &[usize]) -> CompileResult<MemoryDimensions> {
        MemoryDimensions::vars(shape, self.ctx.vector_size()).ok_or_else(|| self.too_large(node, shape))
    }

    fn too_large(&self, node: F::NodeRef, shape: &[usize]) -> CompileError {
        self.malformed(node, format!("shape {shape:?} is too large to lay out in memory"))
    }

    /// Result tensor of a computed node, named after the fused Relu if any.
    fn result(
        &mut self,
        node: F::NodeRef,
        shape: &[usize],
    ) -> CompileResult<(TensorId, Activation, Option<F::NodeRef>)> {
        let frontend = self.frontend;
        let dims = self.vars(node, shape)?;
        Ok(match self.fused.get(&node).copied() {
            Some(relu) => {
                let tensor = self.ctx.add_intermediate(frontend.node_name(relu), dims);
                (tensor, Activation::Relu, Some(relu))
            }
            None => {
                let tensor = self.ctx.add_intermediate(frontend.node_name(node), dims);
                (tensor, Activation::Identity, None)
            }
        })
    }

    fn accumulator(&mut self, node: F::NodeRef, shape: &[usize]) -> CompileResult<TensorId> {
        let name = format!("{}.acc", self.frontend.node_name(node));
        let dims = self.vars(node, shape)?;
        Ok(self.ctx.add_accumulator(&name, dims))
    }

    fn lower(&mut self, node: F::NodeRef) -> CompileResult<()> {
        let frontend = self.frontend;
        let inputs: Vec<F::NodeRef> = frontend.node_inputs(node).collect();
        match frontend.node_op(node) {
            NodeOp::Input { shape } => {
                self.expect_arity(node, &inputs, 0)?;
                self.check_shape(node, shape)?;
                let dims = self.vars(node, shape)?;
                let tensor = self.ctx.add_input(frontend.node_name(node), dims)?;
                self.define(node, tensor, shape.clone(), true);
            }
            NodeOp::Constant { shape } => {
                self.expect_arity(node, &inputs, 0)?;
                self.check_shape(node, shape)?;
                let dims = if self.weights.contains(&node) {
                    frontend
                        .mk_consts_dimensions(self.ctx.arch(), shape)
                        .ok_or_else(|| self.too_large(node, shape))?
                } else {
                    self.vars(node, shape)?
                };
                let tensor = self.ctx.add_constant(frontend.node_name(node), dims)?;
                self.define(node, tensor, shape.clone(), true);
            }
            NodeOp::MatMul => self.lower_matmul(node, &inputs)?,
            NodeOp::Add => self.lower_add(node, &inputs)?,
            NodeOp::Relu => {
                if self.values.contains_key(&node) {
                    // Fused into its producer.
                    return self.finish(node);
                }
                self.expect_arity(node, &inputs, 1)?;
                let shape = self.shape_of(inputs[0])?;
                let input = self.elementwise(inputs[0])?;
                let acc = self.accumulator(node, &shape)?;
                let dims = self.vars(node, &shape)?;
                let output = self.ctx.add_intermediate(frontend.node_name(node), dims);
                self.program.push(Emitter::Accumulate { input, output: acc, accumulate: false });
                self.program.push(Emitter::Activate { input: acc, output, activation: Activation::Relu });
                self.define(node, output, shape, false);
            }
        }
        self.finish(node)
    }

    fn lower_matmul(&mut self, node: F::NodeRef, inputs: &[F::NodeRef]) -> CompileResult<()> {
        let frontend = self.frontend;
        if !(2..=3).contains(&inputs.len()) {
            return Err(self.malformed(node, format!("matmul expects 2 or 3 operands, got {}", inputs.len())));
        }
        for &constant in &inputs[1..] {
            if !matches!(frontend.node_op(constant), NodeOp::Constant { .. }) {
                return Err(self.malformed(
                    node,
                    format!("{} must be a constant", frontend.node_name(constant)),
                ));
            }
        }

        let x_shape = self.shape_of(inputs[0])?;
        let w_shape = self.shape_of(inputs[1])?;
        let [k, m] = w_shape[..] else {
            return Err(self.malformed(node, format!("weights must be two dimensional, got {w_shape:?}")));
        };
        let Some((&inner, outer)) = x_shape.split_last() else {
            return Err(self.malformed(node, "input has no dimensions".to_string()));
        };
        if inner != k {
            return Err(self.malformed(
                node,
                format!("inner dimensions differ: input {x_shape:?}, weights {w_shape:?}"),
            ));
        }
        if let Some(&b) = inputs.get(2) {
            let b_shape = self.shape_of(b)?;
            if b_shape != [m] {
                return Err(self.malformed(node, format!("bias shape {b_shape:?} does not match [{m}]")));
            }
        }
        let mut out_shape = outer.to_vec();
        out_shape.push(m);

        let input = self.elementwise(inputs[0])?;
        let weights = self.operand(inputs[1])?;
        let bias = inputs.get(2).map(|&b| self.operand(b)).transpose()?;
        let acc = self.accumulator(node, &out_shape)?;
        let (output, activation, fused) = self.result(node, &out_shape)?;

        self.program.push(Emitter::MatMul { input, weights, bias, output: acc });
        self.program.push(Emitter::Activate { input: acc, output, activation });
        if let Some(relu) = fused {
            self.define(relu, output, out_shape.clone(), false);
        }
        self.define(node, output, out_shape, false);
        Ok(())
    }

    fn lower_add(&mut self, node: F::NodeRef, inputs: &[F::NodeRef]) -> CompileResult<()> {
        self.expect_arity(node, inputs, 2)?;
        let a_shape = self.shape_of(inputs[0])?;
        let b_shape = self.shape_of(inputs[1])?;
        if a_shape != b_shape {
            return Err(self.malformed(node, format!("operand shapes differ: {a_shape:?} vs {b_shape:?}")));
        }

        let acc = self.accumulator(node, &a_shape)?;
        let a = self.elementwise(inputs[0])?;
        self.program.push(Emitter::Accumulate { input: a, output: acc, accumulate: false });
        let b = self.elementwise(inputs[1])?;
        self.program.push(Emitter::Accumulate { input: b, output: acc, accumulate: true });

        let (output, activation, fused) = self.result(node, &a_shape)?;
        self.program.push(Emitter::Activate { input: acc, output, activation });
        if let Some(relu) = fused {
            self.define(relu, output, a_shape.clone(), false);
        }
        self.define(node, output, a_shape, false);
        Ok(())
    }
}
