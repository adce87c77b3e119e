//! Step types for pipeline execution
//!
//! This module defines step types that represent atomic units of work.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Registry key of the built-in shell action.
pub const SHELL_ACTION: &str = "sh";
/// Registry key of the built-in notification action.
pub const NOTIFY_ACTION: &str = "notify";
/// Registry key of the built-in deployment action.
pub const DEPLOY_ACTION: &str = "deploy";

/// Types of steps available in pipelines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepType {
    /// Shell command execution
    #[serde(rename = "sh")]
    Shell {
        /// Command to execute
        command: String,
    },

    /// Notification sent to a channel
    Notify {
        /// Channel name (`log`, `webhook`, or a registered channel)
        channel: String,
        /// Message to send
        message: String,
    },

    /// Deployment to a named target
    Deploy {
        /// Deployment target (environment, cluster, host)
        target: String,
    },

    /// Action provided by a registered backend
    Custom {
        /// Registry key of the backend
        action: String,
    },
}

impl StepType {
    /// Creates a shell command step type
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell {
            command: command.into(),
        }
    }

    /// Creates a notify step type
    pub fn notify(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Notify {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Creates a deploy step type
    pub fn deploy(target: impl Into<String>) -> Self {
        Self::Deploy {
            target: target.into(),
        }
    }

    /// Creates a custom step type
    pub fn custom(action: impl Into<String>) -> Self {
        Self::Custom {
            action: action.into(),
        }
    }

    /// Key used to look up the executing backend
    pub fn action_type(&self) -> &str {
        match self {
            Self::Shell { .. } => SHELL_ACTION,
            Self::Notify { .. } => NOTIFY_ACTION,
            Self::Deploy { .. } => DEPLOY_ACTION,
            Self::Custom { action } => action,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell { command } => write!(f, "sh({command})"),
            Self::Notify { channel, message } => write!(f, "notify({channel}, {message})"),
            Self::Deploy { target } => write!(f, "deploy({target})"),
            Self::Custom { action } => write!(f, "{action}()"),
        }
    }
}

/// A single step in a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    /// Type of step
    #[serde(flatten)]
    pub step_type: StepType,

    /// Optional name for the step
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,

    /// Optional timeout for this step, in seconds
    #[serde(
        rename = "timeout",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub timeout_secs: Option<u64>,

    /// Action-specific parameters
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub params: BTreeMap<String, String>,
}

impl Step {
    /// Creates a new step
    pub fn new(step_type: StepType) -> Self {
        Self {
            step_type,
            name: None,
            timeout_secs: None,
            params: BTreeMap::new(),
        }
    }

    /// Sets the name of the step
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the timeout for the step
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout_secs = Some(duration.as_secs().max(1));
        self
    }

    /// Adds an action parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Creates a shell command step
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new(StepType::shell(command))
    }

    /// Creates a notify step
    pub fn notify(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StepType::notify(channel, message))
    }

    /// Creates a deploy step
    pub fn deploy(target: impl Into<String>) -> Self {
        Self::new(StepType::deploy(target))
    }

    /// Creates a custom step
    pub fn custom(action: impl Into<String>) -> Self {
        Self::new(StepType::custom(action))
    }

    /// Key used to look up the executing backend
    pub fn action_type(&self) -> &str {
        self.step_type.action_type()
    }

    /// Timeout as a duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Looks up a parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Display label used in logs and records
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.step_type.to_string())
    }

    /// Checks that required fields are present
    pub(crate) fn check(&self) -> Result<(), String> {
        match &self.step_type {
            StepType::Shell { command } if command.trim().is_empty() => {
                Err("shell command cannot be empty".to_string())
            }
            StepType::Notify { channel, .. } if channel.is_empty() => {
                Err("notify channel cannot be empty".to_string())
            }
            StepType::Deploy { target } if target.is_empty() => {
                Err("deploy target cannot be empty".to_string())
            }
            StepType::Custom { action } if action.is_empty() => {
                Err("custom action cannot be empty".to_string())
            }
            _ if self.timeout_secs == Some(0) => Err("timeout must be positive".to_string()),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Step({}): {}", name, self.step_type),
            None => write!(f, "Step: {}", self.step_type),
        }
    }
}
