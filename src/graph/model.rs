//! Compiled stage graph
//!
//! A [`StageGraph`] is the executable, read-only form of a pipeline. Node ids
//! follow declaration order and edges are kept in an ordered set, so two
//! compilations of the same definition compare equal node by node and edge by
//! edge.

#![allow(clippy::must_use_candidate)]

use crate::pipeline::{AgentRequirement, Environment, Guard, PostCondition, Step};
use ahash::AHashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Index of a node inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The single entry node of every graph
    pub const ENTRY: NodeId = NodeId(0);

    /// Position in [`StageGraph::nodes`]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Synthetic start of the run
    Entry,
    /// A stage with its own steps
    Stage,
    /// Synthetic fan-in for a parallel stage
    Join,
}

/// Why one node waits for another
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Next stage in declaration order
    Sequence,
    /// Start of a parallel branch
    Fork,
    /// Branch leaf into its join
    FanIn,
    /// Guard reference; orders evaluation only
    Condition,
}

impl EdgeKind {
    /// Returns true if a failed or skipped source skips the target
    pub fn is_blocking(self) -> bool {
        !matches!(self, Self::Condition)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence => write!(f, "sequence"),
            Self::Fork => write!(f, "fork"),
            Self::FanIn => write!(f, "fan-in"),
            Self::Condition => write!(f, "condition"),
        }
    }
}

/// Directed edge between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Edge {
    /// Source node
    pub from: NodeId,
    /// Target node
    pub to: NodeId,
    /// Edge kind
    pub kind: EdgeKind,
}

/// A step whose action type was checked against the step registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStep {
    /// The step as declared
    pub step: Step,
    /// False when no backend is registered for the action type
    pub supported: bool,
}

/// One node of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Node id
    pub id: NodeId,
    /// Node kind
    pub kind: NodeKind,
    /// Stage name (the parallel stage's name for joins)
    pub name: String,
    /// Steps to run once an agent is held
    pub steps: Vec<ResolvedStep>,
    /// Effective agent requirement
    pub agent: AgentRequirement,
    /// Guard evaluated before dispatch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
    /// Runs regardless of upstream outcome
    pub fail_safe: bool,
    /// How many times a failing step is retried
    pub retry: u32,
}

impl Node {
    /// Returns true if this is the synthetic entry node
    pub fn is_entry(&self) -> bool {
        self.kind == NodeKind::Entry
    }

    /// Returns true if this is a join node
    pub fn is_join(&self) -> bool {
        self.kind == NodeKind::Join
    }

    /// Returns true if some step has no registered backend
    pub fn has_unsupported_steps(&self) -> bool {
        self.steps.iter().any(|s| !s.supported)
    }
}

/// Post-action with resolved steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledPost {
    /// When it runs
    pub condition: PostCondition,
    /// Steps to run
    pub steps: Vec<ResolvedStep>,
}

/// Directed acyclic graph of stages compiled from a definition
#[derive(Debug, Clone)]
pub struct StageGraph {
    pub(crate) name: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: BTreeSet<Edge>,
    pub(crate) order: Vec<NodeId>,
    pub(crate) index: AHashMap<String, NodeId>,
    pub(crate) environment: Environment,
    pub(crate) agent: AgentRequirement,
    pub(crate) agent_timeout: Option<Duration>,
    pub(crate) post: Vec<CompiledPost>,
}

impl StageGraph {
    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All nodes in declaration order, entry first
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges, ordered
    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    /// Looks up a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Looks up a node by stage name
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.index.get(name).and_then(|id| self.node(*id))
    }

    /// Stage and join nodes, i.e. everything that appears in a run record
    pub fn stages(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_entry())
    }

    /// Incoming edges of `id`
    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Outgoing edges of `id`
    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Nodes `id` waits for
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut preds: Vec<NodeId> = self.incoming(id).map(|e| e.from).collect();
        preds.dedup();
        preds
    }

    /// Nodes waiting for `id`
    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut succs: Vec<NodeId> = self.outgoing(id).map(|e| e.to).collect();
        succs.sort();
        succs.dedup();
        succs
    }

    /// Nodes in a topological order, entry first
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Pipeline environment
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Pipeline-wide agent requirement, used for post-actions
    pub fn agent(&self) -> &AgentRequirement {
        &self.agent
    }

    /// How long a stage may wait for an agent
    pub fn agent_timeout(&self) -> Option<Duration> {
        self.agent_timeout
    }

    /// Post-actions in declaration order
    pub fn post(&self) -> &[CompiledPost] {
        &self.post
    }
}

impl fmt::Display for StageGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Graph({}): {} nodes, {} edges",
            self.name,
            self.nodes.len(),
            self.edges.len()
        )?;

        for id in &self.order {
            let node = &self.nodes[id.index()];
            let kind = match node.kind {
                NodeKind::Entry => "entry",
                NodeKind::Stage => "stage",
                NodeKind::Join => "join",
            };
            write!(f, "  {id} {kind} {}", node.name)?;
            if !node.is_entry() {
                write!(f, " [{}]", node.agent)?;
            }
            if let Some(ref guard) = node.guard {
                write!(f, " when {guard}")?;
            }
            if node.fail_safe {
                write!(f, " fail-safe")?;
            }
            if node.has_unsupported_steps() {
                write!(f, " (unsupported steps)")?;
            }
            writeln!(f)?;

            for edge in self.outgoing(*id) {
                let target = &self.nodes[edge.to.index()];
                writeln!(f, "    -{}-> {}", edge.kind, target.name)?;
            }
        }

        Ok(())
    }
}
