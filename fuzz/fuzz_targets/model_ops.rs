//! Arbitrary operation sequences against the model and a real mesh.

#![no_main]

use arbitrary::Arbitrary;
use cloak_harness::{Mesh, ModelWorld, Operation};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    seed: u64,
    nodes: u8,
    ops: Vec<Operation>,
}

fuzz_target!(|input: Input| {
    let nodes = input.nodes % 4 + 2;
    let mut model = ModelWorld::new(nodes);
    let mut real = Mesh::new(nodes, input.seed);

    for op in input.ops {
        let op = op.clamped(nodes);
        assert_eq!(model.apply(&op), real.apply(&op), "divergence on {op:?}");
    }

    for node in 0..nodes {
        assert_eq!(model.log(node), real.log(node).as_slice());
    }
});
