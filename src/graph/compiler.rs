//! Stage graph compiler
//!
//! Lowers a [`PipelineDefinition`] into a [`StageGraph`]:
//!
//! - top-level stages are chained with `Sequence` edges from the entry node
//! - a parallel stage becomes a join node; each branch is forked from the
//!   stage's predecessor and fans back into the join
//! - guard references add `Condition` edges, which order evaluation only
//!
//! Branches inherit the agent, guard, fail-safe flag and retry count of the
//! enclosing parallel stage unless they declare their own.

use super::model::{CompiledPost, Edge, EdgeKind, Node, NodeId, NodeKind, ResolvedStep, StageGraph};
use crate::executor::StepRegistry;
use crate::pipeline::steps::{DEPLOY_ACTION, NOTIFY_ACTION, SHELL_ACTION};
use crate::pipeline::{
    AgentRequirement, CompileError, Guard, PipelineDefinition, Script, StageDefinition, Step,
    Validate,
};
use ahash::{AHashMap, AHashSet};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Name given to the synthetic entry node
pub const ENTRY_NAME: &str = "start";

/// Compiles a definition with the built-in step types
///
/// # Errors
///
/// Returns [`CompileError`] if the definition is invalid, empty, declares a
/// stage twice, references a stage that is not declared before the guard, or
/// its guard references form a cycle.
pub fn compile(definition: &PipelineDefinition) -> Result<StageGraph, CompileError> {
    Compiler::new().compile(definition)
}

/// Lowers and compiles a scripted pipeline with the built-in step types
///
/// # Errors
///
/// Same as [`compile`], plus [`CompileError::Validation`] when a statement
/// cannot be lowered.
pub fn compile_script(script: &Script) -> Result<StageGraph, CompileError> {
    Compiler::new().compile_script(script)
}

/// Turns definitions into stage graphs
#[derive(Debug, Clone)]
pub struct Compiler {
    supported: BTreeSet<String>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            supported: [SHELL_ACTION, NOTIFY_ACTION, DEPLOY_ACTION]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Compiler {
    /// Compiler that knows the built-in step types
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiler that resolves action types against `registry`
    #[must_use]
    pub fn with_registry(registry: &StepRegistry) -> Self {
        Self {
            supported: registry.action_types().map(String::from).collect(),
        }
    }

    /// Compiles a definition
    ///
    /// # Errors
    ///
    /// See [`compile`].
    pub fn compile(&self, definition: &PipelineDefinition) -> Result<StageGraph, CompileError> {
        if definition.stages.is_empty() {
            return Err(CompileError::EmptyPipeline);
        }
        definition.validate()?;

        let declared = check_names(definition)?;
        check_references(definition, &declared)?;

        let mut builder = GraphBuilder::new(self, definition);
        let inherited = Inherited {
            agent: &definition.agent,
            guard: None,
            fail_safe: false,
            retry: None,
        };

        let mut previous = NodeId::ENTRY;
        for stage in &definition.stages {
            previous = builder.lower(stage, &[(previous, EdgeKind::Sequence)], &inherited);
        }
        builder.add_condition_edges();

        let graph = builder.finish()?;
        debug!(
            pipeline = %graph.name,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Compiled stage graph"
        );
        Ok(graph)
    }

    /// Lowers and compiles a scripted pipeline
    ///
    /// # Errors
    ///
    /// See [`compile_script`].
    pub fn compile_script(&self, script: &Script) -> Result<StageGraph, CompileError> {
        let definition = script.lower()?;
        self.compile(&definition)
    }

    fn resolve(&self, steps: &[Step]) -> Vec<ResolvedStep> {
        steps
            .iter()
            .map(|step| ResolvedStep {
                step: step.clone(),
                supported: self.supported.contains(step.action_type()),
            })
            .collect()
    }
}

/// Maps every declared name to its pre-order position.
fn check_names(definition: &PipelineDefinition) -> Result<AHashMap<&str, usize>, CompileError> {
    let mut declared = AHashMap::new();
    for (position, stage) in definition.all_stages().into_iter().enumerate() {
        if declared.insert(stage.name.as_str(), position).is_some() {
            return Err(CompileError::DuplicateStage {
                name: stage.name.clone(),
            });
        }
    }
    Ok(declared)
}

// References to the stage itself or to an enclosing stage pass here and are
// reported as cycles once the graph is built.
fn check_references(
    definition: &PipelineDefinition,
    declared: &AHashMap<&str, usize>,
) -> Result<(), CompileError> {
    for (position, stage) in definition.all_stages().into_iter().enumerate() {
        let Some(ref guard) = stage.when else {
            continue;
        };
        for reference in guard.references() {
            match declared.get(reference) {
                Some(&target) if target <= position => {}
                _ => {
                    return Err(CompileError::UnresolvedReference {
                        stage: stage.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

struct Inherited<'a> {
    agent: &'a AgentRequirement,
    guard: Option<&'a Guard>,
    fail_safe: bool,
    retry: Option<u32>,
}

fn combine(outer: Option<&Guard>, inner: Option<&Guard>) -> Option<Guard> {
    match (outer, inner) {
        (Some(outer), Some(inner)) => Some(Guard::all_of(vec![outer.clone(), inner.clone()])),
        (Some(guard), None) | (None, Some(guard)) => Some(guard.clone()),
        (None, None) => None,
    }
}

struct GraphBuilder<'a> {
    compiler: &'a Compiler,
    definition: &'a PipelineDefinition,
    nodes: Vec<Node>,
    edges: BTreeSet<Edge>,
    index: AHashMap<String, NodeId>,
}

impl<'a> GraphBuilder<'a> {
    fn new(compiler: &'a Compiler, definition: &'a PipelineDefinition) -> Self {
        let entry = Node {
            id: NodeId::ENTRY,
            kind: NodeKind::Entry,
            name: ENTRY_NAME.to_string(),
            steps: Vec::new(),
            agent: AgentRequirement::any(),
            guard: None,
            fail_safe: false,
            retry: 0,
        };
        Self {
            compiler,
            definition,
            nodes: vec![entry],
            edges: BTreeSet::new(),
            index: AHashMap::new(),
        }
    }

    fn push(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        self.index.insert(node.name.clone(), id);
        self.nodes.push(node);
        id
    }

    fn connect(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.edges.insert(Edge { from, to, kind });
    }

    /// Lowers one stage and returns the node downstream stages attach to.
    fn lower(
        &mut self,
        stage: &StageDefinition,
        preds: &[(NodeId, EdgeKind)],
        inherited: &Inherited<'_>,
    ) -> NodeId {
        let definition = self.definition;
        let options = &definition.options;
        let agent = stage.agent.as_ref().unwrap_or(inherited.agent);
        let fail_safe = inherited.fail_safe || stage.fail_safe || options.is_fail_safe(&stage.name);
        let retry = stage.retry.or(inherited.retry);
        let guard = combine(inherited.guard, stage.when.as_ref());

        let steps = self.compiler.resolve(&stage.steps);

        if !stage.is_parallel() {
            let id = self.push(Node {
                id: NodeId::ENTRY,
                kind: NodeKind::Stage,
                name: stage.name.clone(),
                steps,
                agent: agent.clone(),
                guard,
                fail_safe,
                retry: retry.unwrap_or(options.retry),
            });
            for &(from, kind) in preds {
                self.connect(from, id, kind);
            }
            return id;
        }

        let join = self.push(Node {
            id: NodeId::ENTRY,
            kind: NodeKind::Join,
            name: stage.name.clone(),
            steps,
            agent: agent.clone(),
            guard: None,
            fail_safe,
            retry: retry.unwrap_or(options.retry),
        });

        let forks: Vec<(NodeId, EdgeKind)> =
            preds.iter().map(|&(from, _)| (from, EdgeKind::Fork)).collect();
        let child = Inherited {
            agent,
            guard: guard.as_ref(),
            fail_safe,
            retry,
        };
        for branch in &stage.parallel {
            let leaf = self.lower(branch, &forks, &child);
            self.connect(leaf, join, EdgeKind::FanIn);
        }

        join
    }

    fn add_condition_edges(&mut self) {
        let mut conditions = Vec::new();
        for node in &self.nodes {
            let Some(ref guard) = node.guard else {
                continue;
            };
            for reference in guard.references() {
                if let Some(&from) = self.index.get(reference) {
                    conditions.push((from, node.id));
                }
            }
        }
        for (from, to) in conditions {
            self.connect(from, to, EdgeKind::Condition);
        }
    }

    fn finish(self) -> Result<StageGraph, CompileError> {
        let order = topological_order(&self.nodes, &self.edges)?;
        let definition = self.definition;

        let post = definition
            .post
            .iter()
            .map(|action| CompiledPost {
                condition: action.condition,
                steps: self.compiler.resolve(&action.steps),
            })
            .collect();

        Ok(StageGraph {
            name: definition.display_name().to_string(),
            nodes: self.nodes,
            edges: self.edges,
            order,
            index: self.index,
            environment: definition.environment.clone(),
            agent: definition.agent.clone(),
            agent_timeout: definition.options.agent_timeout(),
            post,
        })
    }
}

/// Kahn's algorithm, smallest ready id first.
fn topological_order(nodes: &[Node], edges: &BTreeSet<Edge>) -> Result<Vec<NodeId>, CompileError> {
    let mut in_degree: BTreeMap<NodeId, usize> = nodes.iter().map(|n| (n.id, 0)).collect();
    for edge in edges {
        *in_degree.entry(edge.to).or_default() += 1;
    }

    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for edge in edges.iter().filter(|e| e.from == id) {
            if let Some(degree) = in_degree.get_mut(&edge.to) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(edge.to);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let remaining: AHashSet<NodeId> = in_degree
        .into_iter()
        .filter(|&(_, degree)| degree > 0)
        .map(|(id, _)| id)
        .collect();
    Err(CompileError::CyclicGraph {
        stages: find_cycle(nodes, edges, &remaining),
    })
}

/// Walks predecessors inside the unsorted remainder until a node repeats.
///
/// Every remaining node still has an incoming edge from another remaining
/// node, so the walk always closes a cycle.
fn find_cycle(nodes: &[Node], edges: &BTreeSet<Edge>, remaining: &AHashSet<NodeId>) -> Vec<String> {
    let Some(&start) = remaining.iter().min() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut seen: AHashMap<NodeId, usize> = AHashMap::new();
    seen.insert(start, 0);
    let mut current = start;

    loop {
        let Some(pred) = edges
            .iter()
            .filter(|e| e.to == current && remaining.contains(&e.from))
            .map(|e| e.from)
            .min()
        else {
            break;
        };

        if let Some(&position) = seen.get(&pred) {
            let mut cycle: Vec<String> = path[position..]
                .iter()
                .rev()
                .map(|id| nodes[id.index()].name.clone())
                .collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }

        seen.insert(pred, path.len());
        path.push(pred);
        current = pred;
    }

    path.iter().map(|id| nodes[id.index()].name.clone()).collect()
}
