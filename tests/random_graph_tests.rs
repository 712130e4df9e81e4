//! Properties of compiled programs over randomly generated graphs.
//!
//! Graphs are drawn from a seeded `StdRng`, so failures reproduce. Roomy
//! machines must always compile; tight machines may run out of memory, but any
//! program they do produce must satisfy the same properties.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt::Write;
use tcuc::core::{Architecture, CompileError, CompiledProgram, Frontend, MemoryKind};
use tcuc::tcu::Emitter;
use tcuc::test_graph::{Graph, GraphFrontend};

struct RandomGraph {
    text: String,
    outputs: Vec<String>,
}

/// A graph of `input`, `matmul`, `add` and `relu` nodes over 2-D activations.
fn random_graph(rng: &mut StdRng, vector: usize) -> RandomGraph {
    let mut text = String::new();
    // Activations by name and shape; constants never enter this pool.
    let mut pool: Vec<(String, [usize; 2])> = Vec::new();
    let mut computed: Vec<String> = Vec::new();
    let mut next = 0;
    let mut fresh = |prefix: &str| {
        next += 1;
        format!("{prefix}{next}")
    };

    for _ in 0..rng.gen_range(1..=2) {
        let name = fresh("in");
        let shape = [rng.gen_range(1..=6), vector * rng.gen_range(1..=2)];
        let _ = writeln!(text, "%{name} = input [{}, {}]", shape[0], shape[1]);
        pool.push((name, shape));
    }

    for _ in 0..rng.gen_range(3..=8) {
        let (src, shape) = pool.choose(rng).cloned().unwrap();
        let name = fresh("v");
        let out_shape = match rng.gen_range(0..3) {
            0 => {
                let _ = writeln!(text, "%{name} = relu %{src}");
                shape
            }
            1 => {
                let partner = pool
                    .iter()
                    .filter(|(_, s)| *s == shape)
                    .map(|(n, _)| n.clone())
                    .collect::<Vec<_>>()
                    .choose(rng)
                    .cloned()
                    .unwrap();
                let _ = writeln!(text, "%{name} = add %{src}, %{partner}");
                shape
            }
            _ => {
                let cols = vector * rng.gen_range(1..=2);
                let w = fresh("w");
                let _ = writeln!(text, "%{w} = const [{}, {cols}]", shape[1]);
                if rng.gen_bool(0.5) {
                    let b = fresh("b");
                    let _ = writeln!(text, "%{b} = const [{cols}]");
                    let _ = writeln!(text, "%{name} = matmul %{src}, %{w}, %{b}");
                } else {
                    let _ = writeln!(text, "%{name} = matmul %{src}, %{w}");
                }
                [shape[0], cols]
            }
        };
        pool.push((name.clone(), out_shape));
        computed.push(name);
    }

    let mut outputs = vec![computed[computed.len() - 1].clone()];
    if rng.gen_bool(0.5) {
        let extra = computed.choose(rng).cloned().unwrap();
        if !outputs.contains(&extra) {
            outputs.push(extra);
        }
    }
    RandomGraph { text, outputs }
}

fn compile(graph: &RandomGraph, arch: &Architecture) -> Result<CompiledProgram, CompileError> {
    let parsed = Graph::parse(&graph.text)?;
    let outputs: Vec<&str> = graph.outputs.iter().map(String::as_str).collect();
    tcuc::compile(&GraphFrontend::new(&parsed), &outputs, arch)
}

fn check_properties(program: &CompiledProgram, context: &str) {
    let bindings = program.bindings();

    for (i, a) in bindings.iter().enumerate() {
        for b in &bindings[i + 1..] {
            if a.kind != b.kind || !a.region().overlaps(&b.region()) {
                continue;
            }
            let disjoint = a.released_at.is_some_and(|end| end <= b.allocated_at)
                || b.released_at.is_some_and(|end| end <= a.allocated_at);
            assert!(disjoint, "overlapping bindings {a:?} and {b:?}\n{context}");
        }
    }

    let capacity = |kind: MemoryKind| match kind {
        MemoryKind::Local => program.arch().local_depth,
        MemoryKind::Accumulator => program.arch().accumulator_depth,
    };
    for binding in bindings {
        assert!(binding.address + binding.size <= capacity(binding.kind), "{binding:?}\n{context}");
        assert!(binding.released_at.is_some(), "{binding:?} is never released\n{context}");
    }

    for (pos, op) in program.ops().iter().enumerate() {
        for tensor in op.emitter.reads() {
            let live = bindings.iter().any(|b| {
                b.tensor == tensor && b.allocated_at < pos && b.released_at.is_some_and(|end| pos <= end)
            });
            assert!(live, "{} reads {} while it is not resident\n{context}", program.op_label(pos), program.tensor_name(tensor));
        }
        if let Some(tensor) = op.emitter.writes() {
            assert!(
                bindings.iter().any(|b| b.tensor == tensor && b.allocated_at == pos),
                "{} writes {} without an allocation\n{context}",
                program.op_label(pos),
                program.tensor_name(tensor)
            );
        }
    }

    let ops = program.ops();
    for (pos, op) in ops.iter().enumerate() {
        if op.origin.is_none() {
            continue;
        }
        for tensor in op.emitter.reads() {
            let last_spill = ops[..pos].iter().rposition(|o| o.emitter == Emitter::Spill { tensor });
            if let Some(spill) = last_spill {
                assert!(
                    ops[spill + 1..pos].iter().any(|o| o.emitter == Emitter::Reload { tensor }),
                    "{} follows a spill without a reload\n{context}",
                    program.op_label(pos)
                );
            }
        }
    }

    let decoded = program.layout().decode_stream(program.bytes()).unwrap();
    assert_eq!(decoded, program.instructions(), "{context}");
}

#[test]
fn test_random_graphs_on_roomy_machines() {
    let mut rng = StdRng::seed_from_u64(0x7c0c);
    for arch in [
        Architecture::default(),
        Architecture { array_size: 4, local_depth: 256, accumulator_depth: 128, ..Architecture::default() },
    ] {
        for round in 0..40 {
            let graph = random_graph(&mut rng, arch.array_size);
            let context = format!("round {round} outputs {:?}\n{}", graph.outputs, graph.text);

            let program = compile(&graph, &arch).unwrap_or_else(|e| panic!("{e}\n{context}"));
            assert_eq!(program.summary().spills, 0, "{context}");
            check_properties(&program, &context);

            let again = compile(&graph, &arch).unwrap();
            assert_eq!(program.bytes(), again.bytes(), "{context}");
        }
    }
}

#[test]
fn test_random_graphs_on_tight_machines() {
    let mut rng = StdRng::seed_from_u64(0x5b111);
    let mut compiled = 0;
    for round in 0..120 {
        let arch = Architecture {
            array_size: 4,
            local_depth: *[24, 32, 40, 64].choose(&mut rng).unwrap(),
            accumulator_depth: 64,
            ..Architecture::default()
        };
        let graph = random_graph(&mut rng, arch.array_size);
        let context = format!("round {round} local {} outputs {:?}\n{}", arch.local_depth, graph.outputs, graph.text);

        match compile(&graph, &arch) {
            Ok(program) => {
                compiled += 1;
                assert!(program.summary().peak_local <= arch.local_depth, "{context}");
                check_properties(&program, &context);
                assert_eq!(program.bytes(), compile(&graph, &arch).unwrap().bytes(), "{context}");
            }
            Err(CompileError::OutOfMemory { .. }) => {}
            Err(e) => panic!("{e}\n{context}"),
        }
    }
    assert!(compiled > 0);
}

#[test]
fn test_traversal_covers_outputs_once() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let graph = random_graph(&mut rng, 8);
        let parsed = Graph::parse(&graph.text).unwrap();
        let frontend = GraphFrontend::new(&parsed);
        let outputs: Vec<&str> = graph.outputs.iter().map(String::as_str).collect();
        let order = frontend.traverse(&outputs).unwrap();

        let mut seen = std::collections::HashSet::new();
        for (pos, &node) in order.iter().enumerate() {
            assert!(seen.insert(node), "{node:?} visited twice");
            for input in frontend.node_inputs(node) {
                let def = order.iter().position(|&n| n == input).unwrap();
                assert!(def < pos);
            }
        }
        for name in &outputs {
            assert!(order.contains(&parsed.lookup(name).unwrap()));
        }
    }
}
