//! Guard conditions gating stage execution
//!
//! Guards are a restricted predicate language over the results of earlier
//! stages and the pipeline environment. They replace free-form scripted
//! branching: every stage a guard looks at is known at compile time.

#![allow(clippy::must_use_candidate)]

use super::Environment;
use super::Validate;
use super::errors::ValidationError;
use super::types::StageStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Predicate deciding whether a stage runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// An earlier stage ended with the given status
    Stage {
        /// Referenced stage name
        stage: String,
        /// Expected terminal status
        status: StageStatus,
    },

    /// Environment variable equals a value
    Env {
        /// Variable name
        name: String,
        /// Expected value
        value: String,
    },

    /// `BRANCH_NAME` matches a glob pattern
    Branch {
        /// Glob pattern (`*` and `?` wildcards)
        pattern: String,
    },

    /// `TAG_NAME` matches a glob pattern
    Tag {
        /// Glob pattern (`*` and `?` wildcards)
        pattern: String,
    },

    /// All nested guards must hold
    AllOf(Vec<Guard>),

    /// At least one nested guard must hold
    AnyOf(Vec<Guard>),

    /// Nested guard must not hold
    Not(Box<Guard>),
}

/// Read-only view a guard is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    /// Terminal statuses of stages resolved so far
    pub stages: &'a BTreeMap<String, StageStatus>,
    /// Pipeline environment
    pub env: &'a Environment,
}

impl Guard {
    /// Creates a stage-status guard
    pub fn stage(stage: impl Into<String>, status: StageStatus) -> Self {
        Self::Stage {
            stage: stage.into(),
            status,
        }
    }

    /// Creates a guard that holds when `stage` succeeded
    pub fn succeeded(stage: impl Into<String>) -> Self {
        Self::stage(stage, StageStatus::Success)
    }

    /// Creates a guard that holds when `stage` failed
    pub fn failed(stage: impl Into<String>) -> Self {
        Self::stage(stage, StageStatus::Failure)
    }

    /// Creates an environment guard
    pub fn env(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Env {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates a branch guard
    pub fn branch(pattern: impl Into<String>) -> Self {
        Self::Branch {
            pattern: pattern.into(),
        }
    }

    /// Creates a tag guard
    pub fn tag(pattern: impl Into<String>) -> Self {
        Self::Tag {
            pattern: pattern.into(),
        }
    }

    /// Creates an all-of guard
    pub fn all_of(guards: Vec<Guard>) -> Self {
        Self::AllOf(guards)
    }

    /// Creates an any-of guard
    pub fn any_of(guards: Vec<Guard>) -> Self {
        Self::AnyOf(guards)
    }

    /// Negates a guard
    #[allow(clippy::should_implement_trait)]
    pub fn not(guard: Guard) -> Self {
        Self::Not(Box::new(guard))
    }

    /// Stage names this guard reads, in first-seen order
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Stage { stage, .. } => {
                if !out.contains(&stage.as_str()) {
                    out.push(stage);
                }
            }
            Self::AllOf(guards) | Self::AnyOf(guards) => {
                for guard in guards {
                    guard.collect_references(out);
                }
            }
            Self::Not(guard) => guard.collect_references(out),
            Self::Env { .. } | Self::Branch { .. } | Self::Tag { .. } => {}
        }
    }

    /// Evaluates the guard.
    ///
    /// A referenced stage that has not resolved compares unequal.
    pub fn evaluate(&self, ctx: &GuardContext<'_>) -> bool {
        match self {
            Self::Stage { stage, status } => ctx.stages.get(stage) == Some(status),
            Self::Env { name, value } => ctx.env.get(name) == Some(value),
            Self::Branch { pattern } => glob_matches(pattern, ctx.env.get("BRANCH_NAME")),
            Self::Tag { pattern } => glob_matches(pattern, ctx.env.get("TAG_NAME")),
            Self::AllOf(guards) => guards.iter().all(|g| g.evaluate(ctx)),
            Self::AnyOf(guards) => guards.iter().any(|g| g.evaluate(ctx)),
            Self::Not(guard) => !guard.evaluate(ctx),
        }
    }
}

fn glob_matches(pattern: &str, value: Option<&String>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).is_ok_and(|re| re.is_match(value))
}

impl Validate for Guard {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        match self {
            Self::Stage { stage, status } => {
                if stage.is_empty() {
                    return Err(ValidationError::InvalidGuard(
                        "stage reference cannot be empty".to_string(),
                    ));
                }
                if !status.is_terminal() {
                    return Err(ValidationError::InvalidGuard(format!(
                        "stage guard on '{stage}' must compare against a terminal status, got {status}"
                    )));
                }
            }
            Self::Env { name, .. } => {
                if name.is_empty() {
                    return Err(ValidationError::InvalidGuard(
                        "environment variable name cannot be empty".to_string(),
                    ));
                }
            }
            Self::Branch { pattern } | Self::Tag { pattern } => {
                if pattern.is_empty() {
                    return Err(ValidationError::InvalidGuard(
                        "pattern cannot be empty".to_string(),
                    ));
                }
            }
            Self::AllOf(guards) | Self::AnyOf(guards) => {
                if guards.is_empty() {
                    return Err(ValidationError::InvalidGuard(
                        "guard list cannot be empty".to_string(),
                    ));
                }
                for guard in guards {
                    guard.validate()?;
                }
            }
            Self::Not(guard) => guard.validate()?,
        }
        Ok(())
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage { stage, status } => write!(f, "{stage} == {status}"),
            Self::Env { name, value } => write!(f, "env.{name} == '{value}'"),
            Self::Branch { pattern } => write!(f, "branch '{pattern}'"),
            Self::Tag { pattern } => write!(f, "tag '{pattern}'"),
            Self::AllOf(guards) => write_joined(f, guards, " && "),
            Self::AnyOf(guards) => write_joined(f, guards, " || "),
            Self::Not(guard) => write!(f, "!({guard})"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, guards: &[Guard], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, guard) in guards.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{guard}")?;
    }
    write!(f, ")")
}
