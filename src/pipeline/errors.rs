//! Error types for pipeline definitions and compilation

use thiserror::Error;

/// Errors raised while turning a definition into a stage graph.
///
/// All of these are fatal and surface before any agent is acquired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Definition failed structural validation
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No stages declared
    #[error("Pipeline must declare at least one stage")]
    EmptyPipeline,

    /// Two stages share a name
    #[error("Duplicate stage name: '{name}'")]
    DuplicateStage {
        /// The repeated name.
        name: String,
    },

    /// A guard refers to a stage that is not declared before it
    #[error("Stage '{stage}' references '{reference}' which is not declared before it")]
    UnresolvedReference {
        /// Stage holding the guard.
        stage: String,
        /// Name that could not be resolved.
        reference: String,
    },

    /// Guard references form a cycle
    #[error("Cyclic stage graph through: {}", stages.join(" -> "))]
    CyclicGraph {
        /// Stages that take part in the cycle.
        stages: Vec<String>,
    },
}

/// Validation errors for pipeline components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Invalid characters in name
    #[error("Invalid characters in name: '{name}'")]
    InvalidNameChars {
        /// The invalid name.
        name: String,
    },

    /// Stage must have at least one step
    #[error("Stage '{stage}' must have at least one step or parallel branch")]
    EmptyStage {
        /// Name of the empty stage.
        stage: String,
    },

    /// A step is missing a required field
    #[error("Invalid step in stage '{stage}': {reason}")]
    InvalidStep {
        /// Stage holding the step.
        stage: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Invalid timeout value
    #[error("Invalid timeout: must be positive, got {value}")]
    InvalidTimeout {
        /// The invalid timeout value.
        value: u64,
    },

    /// Invalid agent label
    #[error("Invalid agent label: {0}")]
    InvalidAgentLabel(String),

    /// Invalid guard condition
    #[error("Invalid guard condition: {0}")]
    InvalidGuard(String),

    /// Timer schedule is not a 5 or 6 field cron expression
    #[error("Invalid timer schedule: '{0}'")]
    InvalidSchedule(String),

    /// Invalid trigger
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Scripted statement that cannot be lowered to stages
    #[error("Invalid script: {0}")]
    InvalidScript(String),
}

/// Errors raised while reading a definition document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// File could not be read
    #[error("Cannot read '{path}': {message}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// YAML document is malformed
    #[error("Invalid YAML definition: {0}")]
    Yaml(String),

    /// JSON document is malformed
    #[error("Invalid JSON definition: {0}")]
    Json(String),
}
