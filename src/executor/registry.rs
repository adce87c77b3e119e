//! Step registry
//!
//! Maps action types to backends. Plugin-style steps register here under
//! their action name; anything unregistered fails as unsupported.

use super::deploy::DeployBackend;
use super::notify::NotifyBackend;
use super::shell::ShellBackend;
use super::traits::{StepBackend, StepContext, StepFailure};
use crate::agent::Agent;
use crate::pipeline::Step;
use crate::pipeline::steps::{DEPLOY_ACTION, NOTIFY_ACTION, SHELL_ACTION};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Backends keyed by action type
#[derive(Clone, Default)]
pub struct StepRegistry {
    backends: BTreeMap<String, Arc<dyn StepBackend>>,
}

impl StepRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `sh`, `notify` and `deploy` backends
    #[must_use]
    pub fn builtin(shell: &str) -> Self {
        let shell = ShellBackend::new(shell);
        Self::new()
            .with(SHELL_ACTION, shell.clone())
            .with(NOTIFY_ACTION, NotifyBackend::new())
            .with(DEPLOY_ACTION, DeployBackend::new(shell))
    }

    /// Registers `backend` for `action`, replacing any previous one
    pub fn register(&mut self, action: impl Into<String>, backend: impl StepBackend + 'static) {
        self.backends.insert(action.into(), Arc::new(backend));
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, action: impl Into<String>, backend: impl StepBackend + 'static) -> Self {
        self.register(action, backend);
        self
    }

    /// Backend for `action`
    #[must_use]
    pub fn get(&self, action: &str) -> Option<Arc<dyn StepBackend>> {
        self.backends.get(action).cloned()
    }

    /// Returns true if `action` has a backend
    #[must_use]
    pub fn supports(&self, action: &str) -> bool {
        self.backends.contains_key(action)
    }

    /// Registered action types, sorted
    pub fn action_types(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("actions", &self.action_types().collect::<Vec<_>>())
            .finish()
    }
}

/// Backend defined by a closure
///
/// Useful for embedding hosts that provide plugin steps in-process.
pub struct FnBackend<F> {
    f: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&Step, &Agent, &StepContext) -> Result<String, StepFailure> + Send + Sync,
{
    /// Wraps `f`
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> StepBackend for FnBackend<F>
where
    F: Fn(&Step, &Agent, &StepContext) -> Result<String, StepFailure> + Send + Sync,
{
    async fn execute(
        &self,
        step: &Step,
        agent: &Agent,
        ctx: &StepContext,
    ) -> Result<String, StepFailure> {
        (self.f)(step, agent, ctx)
    }
}
