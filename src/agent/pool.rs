//! Agent pool
//!
//! Agents are matched by label superset. Requests that cannot be served right
//! away queue up; a released agent goes to the oldest waiter it satisfies.
//! The free/busy table lives behind one mutex that is never held across an
//! await point.

use super::{Agent, AgentError};
use crate::pipeline::AgentRequirement;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

struct Slot {
    agent: Arc<Agent>,
    busy: bool,
}

struct Waiter {
    id: u64,
    requirement: AgentRequirement,
    tx: oneshot::Sender<usize>,
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    waiters: VecDeque<Waiter>,
    next_waiter: u64,
}

#[derive(Default)]
struct PoolInner {
    state: Mutex<PoolState>,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Shared table of agents; cloning shares the same pool
#[derive(Clone, Default)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

/// Free/busy view of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentState {
    /// Agent name
    pub id: String,
    /// Agent labels
    pub labels: BTreeSet<String>,
    /// Whether a stage holds it
    pub busy: bool,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// Agents in registration order
    pub agents: Vec<AgentState>,
    /// Requests currently queued
    pub waiting: usize,
    /// Leases handed out so far
    pub acquired: u64,
    /// Leases returned so far
    pub released: u64,
}

impl PoolSnapshot {
    /// Number of idle agents
    #[must_use]
    pub fn free(&self) -> usize {
        self.agents.iter().filter(|a| !a.busy).count()
    }
}

impl AgentPool {
    /// Creates an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool holding `agents`
    #[must_use]
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let pool = Self::new();
        for agent in agents {
            pool.register(agent);
        }
        pool
    }

    /// Adds an agent; it may immediately serve a queued request
    pub fn register(&self, agent: Agent) {
        debug!(agent = %agent.id, "Registering agent");
        let mut state = self.inner.state.lock();
        state.slots.push(Slot {
            agent: Arc::new(agent),
            busy: true,
        });
        let index = state.slots.len() - 1;
        hand_over(&mut state, index);
    }

    /// Number of registered agents
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    /// Returns true if no agent is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Leases handed out so far
    #[must_use]
    pub fn acquired(&self) -> u64 {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    /// Leases returned so far
    #[must_use]
    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Current free/busy table
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.inner.state.lock();
        PoolSnapshot {
            agents: state
                .slots
                .iter()
                .map(|slot| AgentState {
                    id: slot.agent.id.clone(),
                    labels: slot.agent.labels.clone(),
                    busy: slot.busy,
                })
                .collect(),
            waiting: state.waiters.len(),
            acquired: self.acquired(),
            released: self.released(),
        }
    }

    /// Waits until an agent matching `requirement` is free and leases it.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unavailable`] right away if no registered agent
    /// carries the requested labels.
    pub async fn acquire(&self, requirement: &AgentRequirement) -> Result<AgentLease, AgentError> {
        let pending = {
            let mut state = self.inner.state.lock();

            if !state
                .slots
                .iter()
                .any(|slot| requirement.is_satisfied_by(&slot.agent.labels))
            {
                return Err(unavailable(
                    requirement,
                    "no registered agent carries these labels",
                ));
            }

            let free = state
                .slots
                .iter()
                .position(|slot| !slot.busy && requirement.is_satisfied_by(&slot.agent.labels));
            if let Some(index) = free {
                state.slots[index].busy = true;
                drop(state);
                return Ok(self.lease(index));
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter;
            state.next_waiter += 1;
            state.waiters.push_back(Waiter {
                id,
                requirement: requirement.clone(),
                tx,
            });
            trace!(waiter = id, %requirement, "Queued for agent");
            PendingWait {
                pool: self.clone(),
                id,
                rx: Some(rx),
            }
        };

        pending.wait(requirement).await
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Unavailable`] if nothing matches or the timeout
    /// expires first.
    pub async fn acquire_timeout(
        &self,
        requirement: &AgentRequirement,
        timeout: Duration,
    ) -> Result<AgentLease, AgentError> {
        match tokio::time::timeout(timeout, self.acquire(requirement)).await {
            Ok(result) => result,
            Err(_) => Err(unavailable(
                requirement,
                &format!("timed out after {}s", timeout.as_secs_f64()),
            )),
        }
    }

    /// Returns a lease to the pool
    pub fn release(&self, lease: AgentLease) {
        drop(lease);
    }

    fn lease(&self, index: usize) -> AgentLease {
        let agent = Arc::clone(&self.inner.state.lock().slots[index].agent);
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(agent = %agent.id, "Agent acquired");
        AgentLease {
            pool: self.clone(),
            index,
            agent,
        }
    }

    fn free_slot(&self, index: usize) {
        let mut state = self.inner.state.lock();
        hand_over(&mut state, index);
    }
}

impl fmt::Debug for AgentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("AgentPool")
            .field("agents", &snapshot.agents.len())
            .field("free", &snapshot.free())
            .field("waiting", &snapshot.waiting)
            .finish()
    }
}

fn unavailable(requirement: &AgentRequirement, reason: &str) -> AgentError {
    AgentError::Unavailable {
        requirement: requirement.to_string(),
        reason: reason.to_string(),
    }
}

/// Gives the agent at `index` to the oldest waiter it satisfies, or frees it.
fn hand_over(state: &mut PoolState, index: usize) {
    let mut position = 0;
    while position < state.waiters.len() {
        if !state.waiters[position]
            .requirement
            .is_satisfied_by(&state.slots[index].agent.labels)
        {
            position += 1;
            continue;
        }

        let Some(waiter) = state.waiters.remove(position) else {
            break;
        };
        // A waiter whose receiver is gone gave up; try the next one.
        if waiter.tx.send(index).is_ok() {
            trace!(waiter = waiter.id, "Agent handed to waiter");
            state.slots[index].busy = true;
            return;
        }
    }
    state.slots[index].busy = false;
}

/// A queued request; cleans up after itself if abandoned.
struct PendingWait {
    pool: AgentPool,
    id: u64,
    rx: Option<oneshot::Receiver<usize>>,
}

impl PendingWait {
    async fn wait(mut self, requirement: &AgentRequirement) -> Result<AgentLease, AgentError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(unavailable(requirement, "request already completed"));
        };
        let result = rx.await;
        self.rx = None;
        match result {
            Ok(index) => Ok(self.pool.lease(index)),
            Err(_) => Err(unavailable(requirement, "pool dropped the request")),
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        let mut state = self.pool.inner.state.lock();
        if let Some(position) = state.waiters.iter().position(|w| w.id == self.id) {
            state.waiters.remove(position);
            return;
        }
        // Served between the timeout firing and this drop: pass the agent on.
        if let Ok(index) = rx.try_recv() {
            hand_over(&mut state, index);
        }
    }
}

/// Scoped borrow of an agent; dropping it returns the agent to the pool
pub struct AgentLease {
    pool: AgentPool,
    index: usize,
    agent: Arc<Agent>,
}

impl AgentLease {
    /// The leased agent
    #[must_use]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Name of the leased agent
    #[must_use]
    pub fn id(&self) -> &str {
        &self.agent.id
    }
}

impl std::ops::Deref for AgentLease {
    type Target = Agent;

    fn deref(&self) -> &Agent {
        &self.agent
    }
}

impl fmt::Debug for AgentLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentLease")
            .field("agent", &self.agent.id)
            .finish()
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        self.pool.inner.released.fetch_add(1, Ordering::SeqCst);
        debug!(agent = %self.agent.id, "Agent released");
        self.pool.free_slot(self.index);
    }
}
