use proptest::prelude::*;

use stageline::graph::EdgeKind;
use stageline::{Guard, PipelineDefinition, StageDefinition, Step, compile};

/// Top-level stages `S0..Sn`; a stage is either plain or a parallel stage
/// with up to three branches, and may guard on an earlier top-level stage.
fn arb_definition() -> impl Strategy<Value = PipelineDefinition> {
    prop::collection::vec(
        (0usize..4, any::<bool>(), prop::option::of(0usize..16)),
        1..10,
    )
    .prop_map(|specs| {
        let stages = specs
            .into_iter()
            .enumerate()
            .map(|(i, (branches, fail_safe, guard))| {
                let name = format!("S{i}");
                let mut stage = if branches == 0 {
                    StageDefinition::new(name, vec![Step::shell("true")])
                } else {
                    StageDefinition::parallel(
                        name,
                        (0..branches)
                            .map(|b| StageDefinition::new(format!("S{i}B{b}"), vec![Step::shell("true")]))
                            .collect(),
                    )
                };
                if fail_safe {
                    stage = stage.fail_safe();
                }
                if let Some(target) = guard
                    && i > 0
                {
                    stage = stage.with_when(Guard::succeeded(format!("S{}", target % i)));
                }
                stage
            })
            .collect();

        PipelineDefinition::builder().stages(stages).build_unchecked()
    })
}

proptest! {
    #[test]
    fn compile_is_deterministic(definition in arb_definition()) {
        let first = compile(&definition).unwrap();
        let second = compile(&definition).unwrap();

        prop_assert_eq!(first.nodes(), second.nodes());
        prop_assert_eq!(first.edges(), second.edges());
        prop_assert_eq!(first.topological_order(), second.topological_order());
    }

    #[test]
    fn topological_order_respects_every_edge(definition in arb_definition()) {
        let graph = compile(&definition).unwrap();
        let mut position = vec![usize::MAX; graph.nodes().len()];
        for (index, id) in graph.topological_order().iter().enumerate() {
            position[id.index()] = index;
        }

        prop_assert_eq!(graph.topological_order().len(), graph.nodes().len());
        for edge in graph.edges() {
            prop_assert!(position[edge.from.index()] < position[edge.to.index()]);
        }
    }

    #[test]
    fn every_declared_stage_has_a_node(definition in arb_definition()) {
        let graph = compile(&definition).unwrap();

        for stage in definition.all_stages() {
            let node = graph.find(&stage.name);
            prop_assert!(node.is_some());
            let node = node.unwrap();
            prop_assert_eq!(node.is_join(), stage.is_parallel());
        }
    }

    #[test]
    fn guards_become_condition_edges(definition in arb_definition()) {
        let graph = compile(&definition).unwrap();

        for stage in definition.all_stages() {
            let Some(ref guard) = stage.when else { continue };
            let node = graph.find(&stage.name).unwrap();
            // Guards on parallel stages move to their branches.
            let holders: Vec<_> = if stage.is_parallel() {
                stage.parallel.iter().map(|b| graph.find(&b.name).unwrap().id).collect()
            } else {
                vec![node.id]
            };
            for reference in guard.references() {
                let from = graph.find(reference).unwrap().id;
                for &holder in &holders {
                    prop_assert!(graph.incoming(holder).any(|e| e.from == from && e.kind == EdgeKind::Condition));
                }
            }
        }
    }
}
