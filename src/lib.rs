//! # Stageline - a pipeline orchestration engine
//!
//! Stageline takes a declarative pipeline (stages, steps, parallel branches,
//! guard conditions and post-actions), compiles it into a graph of stages and
//! runs that graph on a pool of labelled agents.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stageline::prelude::*;
//!
//! # async fn demo() -> Result<(), CompileError> {
//! let definition = PipelineDefinition::builder()
//!     .name("web")
//!     .stage(stage!("Build", steps!(sh!("make"))))
//!     .stage(stage!("Test", steps!(sh!("make test"))))
//!     .build_unchecked();
//!
//! let controller = RunController::new(
//!     AgentPool::with_agents([Agent::new("local")]),
//!     StepExecutor::default(),
//! );
//! let handle = controller.start(&definition)?;
//! let status = controller.await_result(handle).await;
//! assert!(status.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! - [`pipeline`]: definition model, YAML/JSON loading and the scripted front-end
//! - [`graph`]: compilation into a [`StageGraph`]
//! - [`agent`]: agents and the leasing pool
//! - [`executor`]: step backends and the step registry
//! - [`scheduler`]: concurrent execution of a compiled graph
//! - [`run`]: run records, post-actions and cancellation
//! - [`infrastructure`]: configuration, logging and metrics

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod macros;

pub mod agent;
pub mod executor;
pub mod graph;
pub mod infrastructure;
pub mod pipeline;
pub mod run;
pub mod scheduler;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use agent::{Agent, AgentError, AgentLease, AgentPool};
pub use executor::{
    StepBackend, StepContext, StepError, StepExecutor, StepFailure, StepRegistry, StepResult,
};
pub use graph::{Compiler, StageGraph, compile, compile_script};
pub use infrastructure::{Config, ConfigError, MetricsCollector, RunMetrics, init_logging};
pub use pipeline::{
    AgentRequirement, CompileError, Environment, Guard, LoadError, PipelineBuilder,
    PipelineDefinition, PipelineOptions, PostAction, PostCondition, RunStatus, Script,
    StageBuilder, StageDefinition, StageStatus, Statement, Step, StepType, Trigger, Validate,
    ValidationError,
};
pub use run::{RunController, RunHandle, RunRecord};
pub use scheduler::Scheduler;

/// Version of the stageline crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
