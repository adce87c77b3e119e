//! Stage definitions
//!
//! This module defines stage types and their builder pattern.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::agent::AgentRequirement;
use super::errors::ValidationError;
use super::guard::Guard;
use super::steps::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a stage name
pub const MAX_STAGE_NAME_LEN: usize = 100;

/// A stage in a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name, unique within the pipeline
    pub name: String,

    /// Optional agent override for this stage
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent: Option<AgentRequirement>,

    /// Steps in this stage
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub steps: Vec<Step>,

    /// Branches executed concurrently before this stage's own steps
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parallel: Vec<StageDefinition>,

    /// Optional guard condition
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub when: Option<Guard>,

    /// Runs even when upstream stages failed or were skipped
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub fail_safe: bool,

    /// Retry count for failing steps, overriding the pipeline default
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry: Option<u32>,
}

impl Validate for StageDefinition {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.name.len() > MAX_STAGE_NAME_LEN {
            return Err(ValidationError::NameTooLong {
                max: MAX_STAGE_NAME_LEN,
                len: self.name.len(),
            });
        }

        // Stage must have either steps or parallel branches
        if self.steps.is_empty() && self.parallel.is_empty() {
            return Err(ValidationError::EmptyStage {
                stage: self.name.clone(),
            });
        }

        for step in &self.steps {
            step.check().map_err(|reason| ValidationError::InvalidStep {
                stage: self.name.clone(),
                reason,
            })?;
        }

        if let Some(ref agent) = self.agent {
            agent.validate()?;
        }

        if let Some(ref when) = self.when {
            when.validate()?;
        }

        for branch in &self.parallel {
            branch.validate()?;
        }

        Ok(())
    }
}

impl StageDefinition {
    /// Creates a new stage
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            agent: None,
            steps,
            parallel: Vec::new(),
            when: None,
            fail_safe: false,
            retry: None,
        }
    }

    /// Creates a stage that only fans out to parallel branches
    pub fn parallel(name: impl Into<String>, branches: Vec<StageDefinition>) -> Self {
        Self::new(name, Vec::new()).with_parallel(branches)
    }

    /// Sets agent requirement for this stage
    pub fn with_agent(mut self, agent: AgentRequirement) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Sets parallel branches for this stage
    pub fn with_parallel(mut self, parallel: Vec<StageDefinition>) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets guard condition for this stage
    pub fn with_when(mut self, when: Guard) -> Self {
        self.when = Some(when);
        self
    }

    /// Marks this stage as running regardless of upstream outcome
    pub fn fail_safe(mut self) -> Self {
        self.fail_safe = true;
        self
    }

    /// Sets the retry count for failing steps
    pub fn with_retry(mut self, count: u32) -> Self {
        self.retry = Some(count);
        self
    }

    /// Returns true if this stage fans out to branches
    pub fn is_parallel(&self) -> bool {
        !self.parallel.is_empty()
    }
}

impl fmt::Display for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_parallel() {
            write!(
                f,
                "Stage({}): {} branches, {} steps",
                self.name,
                self.parallel.len(),
                self.steps.len()
            )
        } else {
            write!(f, "Stage({}): {} steps", self.name, self.steps.len())
        }
    }
}

/// Builder for creating stages
pub struct StageBuilder {
    stage: StageDefinition,
}

impl StageBuilder {
    /// Creates a new stage builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            stage: StageDefinition::new(name, Vec::new()),
        }
    }

    /// Sets agent for the stage
    pub fn agent(mut self, agent: AgentRequirement) -> Self {
        self.stage.agent = Some(agent);
        self
    }

    /// Sets guard condition for the stage
    pub fn when(mut self, when: Guard) -> Self {
        self.stage.when = Some(when);
        self
    }

    /// Adds a step to the stage
    pub fn step(mut self, step: Step) -> Self {
        self.stage.steps.push(step);
        self
    }

    /// Adds multiple steps to the stage
    pub fn steps(mut self, mut steps: Vec<Step>) -> Self {
        self.stage.steps.append(&mut steps);
        self
    }

    /// Adds a parallel branch
    pub fn branch(mut self, branch: StageDefinition) -> Self {
        self.stage.parallel.push(branch);
        self
    }

    /// Marks the stage fail-safe
    pub fn fail_safe(mut self) -> Self {
        self.stage.fail_safe = true;
        self
    }

    /// Sets the retry count
    pub fn retry(mut self, count: u32) -> Self {
        self.stage.retry = Some(count);
        self
    }

    /// Builds the stage
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<StageDefinition, ValidationError> {
        self.stage.validate()?;
        Ok(self.stage)
    }

    /// Builds the stage without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> StageDefinition {
        self.stage
    }
}
