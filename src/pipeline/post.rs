//! Post-actions run once a pipeline reaches a terminal state
//!
//! This module defines the conditions under which post steps run and the
//! action type pairing a condition with its steps.

#![allow(clippy::must_use_candidate)]

use super::steps::Step;
use super::types::RunStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conditions that select post-actions from the overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostCondition {
    /// Always execute regardless of result
    Always,
    /// Execute only on success
    Success,
    /// Execute only on failure
    Failure,
    /// Execute only when the run was cancelled
    Aborted,
}

impl PostCondition {
    /// Returns true if this condition should execute given the overall status
    pub fn should_execute(&self, status: RunStatus) -> bool {
        match self {
            Self::Always => true,
            Self::Success => status.is_success(),
            Self::Failure => status.is_failure(),
            Self::Aborted => status.is_aborted(),
        }
    }
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Steps bound to a post condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostAction {
    /// When these steps run
    pub condition: PostCondition,
    /// Steps to execute
    pub steps: Vec<Step>,
}

impl PostAction {
    /// Creates a post-action
    pub fn new(condition: PostCondition, steps: Vec<Step>) -> Self {
        Self { condition, steps }
    }

    /// Creates an "always" post-action
    pub fn always(steps: Vec<Step>) -> Self {
        Self::new(PostCondition::Always, steps)
    }

    /// Creates a "success" post-action
    pub fn success(steps: Vec<Step>) -> Self {
        Self::new(PostCondition::Success, steps)
    }

    /// Creates a "failure" post-action
    pub fn failure(steps: Vec<Step>) -> Self {
        Self::new(PostCondition::Failure, steps)
    }

    /// Creates an "aborted" post-action
    pub fn aborted(steps: Vec<Step>) -> Self {
        Self::new(PostCondition::Aborted, steps)
    }

    /// Returns the steps for this action
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns true if this action should execute given the overall status
    pub fn should_execute(&self, status: RunStatus) -> bool {
        self.condition.should_execute(status)
    }
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} steps)", self.condition, self.steps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_always_executes_on_every_outcome() {
        let action = PostAction::always(vec![Step::notify("log", "cleanup")]);
        assert!(action.should_execute(RunStatus::Success));
        assert!(action.should_execute(RunStatus::Failure));
        assert!(action.should_execute(RunStatus::Aborted));
    }

    #[test]
    fn test_post_success_only_on_success() {
        let action = PostAction::success(vec![Step::notify("log", "ok")]);
        assert!(action.should_execute(RunStatus::Success));
        assert!(!action.should_execute(RunStatus::Failure));
        assert!(!action.should_execute(RunStatus::Aborted));
    }

    #[test]
    fn test_post_failure_only_on_failure() {
        let action = PostAction::failure(vec![Step::notify("log", "alert")]);
        assert!(!action.should_execute(RunStatus::Success));
        assert!(action.should_execute(RunStatus::Failure));
        assert!(!action.should_execute(RunStatus::Aborted));
    }

    #[test]
    fn test_post_aborted_only_on_cancel() {
        let action = PostAction::aborted(vec![Step::notify("log", "stopped")]);
        assert!(action.should_execute(RunStatus::Aborted));
        assert!(!action.should_execute(RunStatus::Failure));
    }

    #[test]
    fn test_post_action_display() {
        let action = PostAction::always(vec![Step::shell("rm -rf out")]);
        assert_eq!(action.to_string(), "always(1 steps)");
    }

    #[test]
    fn test_post_action_deserialize_yaml() {
        let yaml = "condition: failure\nsteps:\n  - type: notify\n    channel: log\n    message: broken\n";
        let action: PostAction = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(action.condition, PostCondition::Failure);
        assert_eq!(action.steps.len(), 1);
    }
}
