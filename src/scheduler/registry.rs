//! Agent registration records.
//!
//! Each registered agent lives behind its own mutex, so two invocations of
//! the same agent can never overlap, while different agents run freely side
//! by side. Bookkeeping (running flag, counters) sits behind a second,
//! short-lived lock that control operations can take while a run is in
//! progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentId, StopToken};
use crate::error::SchedulerError;

use super::SchedulerResult;

/// Thread-safe allocator of monotonically increasing agent ids.
#[derive(Debug)]
pub(crate) struct AgentIdAllocator {
    next: AtomicU64,
}

impl AgentIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SchedulerResult<AgentId> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        if raw == u64::MAX {
            return Err(SchedulerError::IdsExhausted);
        }
        AgentId::new(raw).ok_or(SchedulerError::IdsExhausted)
    }
}

/// Mutable bookkeeping of one agent.
#[derive(Debug, Clone, Default)]
pub(crate) struct AgentState {
    pub running: bool,
    pub last_run: Option<u64>,
    pub consecutive_failures: u32,
    pub runs: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub assertions: u64,
}

/// One registered agent.
pub(crate) struct AgentEntry {
    pub id: AgentId,
    pub name: String,
    pub period: u64,
    pub priority: u8,
    pub agent: Mutex<Box<dyn Agent>>,
    pub stop: StopToken,
    state: Mutex<AgentState>,
}

impl AgentEntry {
    pub fn new(id: AgentId, agent: Box<dyn Agent>, period: u64, priority: u8) -> Self {
        Self {
            id,
            name: agent.name().to_string(),
            period,
            priority,
            agent: Mutex::new(agent),
            stop: StopToken::new(),
            state: Mutex::new(AgentState {
                running: true,
                ..AgentState::default()
            }),
        }
    }

    pub fn state(&self) -> SchedulerResult<MutexGuard<'_, AgentState>> {
        self.state.lock().map_err(|_| SchedulerError::Fatal {
            message: format!("bookkeeping of agent \"{}\" poisoned", self.name),
        })
    }

    /// Whether the agent should run at `tick`.
    pub fn is_due(&self, tick: u64) -> SchedulerResult<bool> {
        let state = self.state()?;
        Ok(state.running
            && state
                .last_run
                .is_none_or(|last| tick.saturating_sub(last) >= self.period))
    }

    pub fn status(&self) -> SchedulerResult<AgentStatus> {
        let state = self.state()?;
        Ok(AgentStatus {
            id: self.id,
            name: self.name.clone(),
            period: self.period,
            priority: self.priority,
            running: state.running,
            last_run: state.last_run,
            consecutive_failures: state.consecutive_failures,
            runs: state.runs,
            failures: state.failures,
            cancellations: state.cancellations,
            assertions: state.assertions,
        })
    }
}

/// Public snapshot of an agent's registration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub name: String,
    pub period: u64,
    pub priority: u8,
    pub running: bool,
    pub last_run: Option<u64>,
    pub consecutive_failures: u32,
    pub runs: u64,
    pub failures: u64,
    pub cancellations: u64,
    /// Successful `assert` calls reported by the agent's cycles. Re-asserts
    /// count, so this keeps growing at a fixpoint.
    pub assertions: u64,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.running { "running" } else { "stopped" };
        write!(
            f,
            "{} {:<24} {state:<8} period={} prio={} runs={} failures={} asserted={}",
            self.id, self.name, self.period, self.priority, self.runs, self.failures, self.assertions
        )
    }
}

/// All registered agents, keyed by id.
pub(crate) struct Registry {
    entries: DashMap<AgentId, Arc<AgentEntry>>,
    ids: AgentIdAllocator,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ids: AgentIdAllocator::new(),
        }
    }

    pub fn insert(&self, agent: Box<dyn Agent>, period: u64, priority: u8) -> SchedulerResult<AgentId> {
        let id = self.ids.next_id()?;
        self.entries
            .insert(id, Arc::new(AgentEntry::new(id, agent, period, priority)));
        Ok(id)
    }

    pub fn remove(&self, id: AgentId) -> SchedulerResult<Arc<AgentEntry>> {
        self.entries
            .remove(&id)
            .map(|(_, entry)| entry)
            .ok_or(SchedulerError::UnknownAgent { id: id.get() })
    }

    pub fn get(&self, id: AgentId) -> SchedulerResult<Arc<AgentEntry>> {
        self.entries
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(SchedulerError::UnknownAgent { id: id.get() })
    }

    /// Every entry, in registration order.
    pub fn ordered(&self) -> Vec<Arc<AgentEntry>> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
