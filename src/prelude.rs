//! Prelude module for common imports

// Re-export macros
pub use crate::{
    agent_any, agent_label, deploy, notify, parallel, pipeline, post, sh, stage, steps, when,
};

pub use crate::agent::{Agent, AgentPool};
pub use crate::executor::{FnBackend, StepBackend, StepContext, StepExecutor, StepRegistry};
pub use crate::graph::{Compiler, StageGraph, compile};
pub use crate::pipeline::{
    AgentRequirement, CompileError, Environment, Guard, PipelineDefinition, PipelineOptions,
    PostAction, PostCondition, RunStatus, Script, StageDefinition, StageStatus, Statement, Step,
    StepType, Validate, ValidationError,
};
pub use crate::run::{RunController, RunHandle, RunRecord};
