//! Stage graph compilation
//!
//! [`compile`] turns a validated [`PipelineDefinition`](crate::pipeline::PipelineDefinition)
//! into an immutable [`StageGraph`] the scheduler walks.

pub mod compiler;
pub mod model;

pub use compiler::{Compiler, compile, compile_script};
pub use model::{CompiledPost, Edge, EdgeKind, Node, NodeId, NodeKind, ResolvedStep, StageGraph};
