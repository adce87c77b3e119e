//! Execution agents and the pool that lends them to stages.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

pub mod pool;

pub use pool::{AgentLease, AgentPool, AgentState, PoolSnapshot};

use crate::pipeline::Environment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// An execution resource stages run on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent name
    pub id: String,

    /// Capability labels
    #[serde(default)]
    pub labels: BTreeSet<String>,

    /// Directory steps run in
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    /// Variables exported to every step on this agent
    #[serde(default)]
    pub env: Environment,
}

fn default_workspace() -> PathBuf {
    std::env::temp_dir()
}

impl Agent {
    /// Creates an agent without labels working in the temp directory
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: BTreeSet::new(),
            workspace: default_workspace(),
            env: Environment::new(),
        }
    }

    /// Adds a label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    /// Adds several labels
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    /// Sets the workspace directory
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Adds an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env = self.env.set(key, value);
        self
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            write!(f, "{}", self.id)
        } else {
            let labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
            write!(f, "{} ({})", self.id, labels.join(", "))
        }
    }
}

/// Agent allocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// No agent could be handed out
    #[error("No agent available for {requirement}: {reason}")]
    Unavailable {
        /// Requested labels
        requirement: String,
        /// Why the request failed
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_builder() {
        let agent = Agent::new("linux-1")
            .with_label("linux")
            .with_labels(["docker", "x86"])
            .with_workspace("/work")
            .with_env("JAVA_HOME", "/opt/jdk");

        assert_eq!(agent.labels.len(), 3);
        assert_eq!(agent.workspace, PathBuf::from("/work"));
        assert_eq!(agent.env.get("JAVA_HOME"), Some(&"/opt/jdk".to_string()));
        assert_eq!(agent.to_string(), "linux-1 (docker, linux, x86)");
    }

    #[test]
    fn test_agent_deserialize_defaults() {
        let agent: Agent = serde_yaml::from_str("id: local\nlabels: [linux]\n").unwrap();
        assert_eq!(agent.id, "local");
        assert!(agent.labels.contains("linux"));
        assert!(agent.env.vars.is_empty());
    }

    #[test]
    fn test_unavailable_message() {
        let err = AgentError::Unavailable {
            requirement: "label:gpu".to_string(),
            reason: "no registered agent carries these labels".to_string(),
        };
        assert!(err.to_string().contains("label:gpu"));
    }
}
