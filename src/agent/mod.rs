//! Mind agents: independently written units of reasoning driven by the
//! [`Scheduler`](crate::scheduler::Scheduler).
//!
//! An agent runs in discrete cycles. Each cycle it may read the shared
//! [`KnowledgeStore`] and assert derived atoms back into it; it holds nothing
//! across cycles but its own configuration and [`Handle`](crate::handle::Handle)s.
//!
//! - [`Agent`] is the capability the scheduler invokes.
//! - [`QueryProcessor`] is the stock agent: query, derive, assert.
//! - [`Derivation`] / [`DerivationRule`] decide what a candidate yields.

pub mod derive;
pub mod query_processor;

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::store::KnowledgeStore;

pub use derive::{Derivation, DerivationRule};
pub use query_processor::{QueryProcessor, QueryProcessorConfig};

/// Identifier the scheduler assigns at registration.
///
/// Ids are issued in increasing order and never reused, so they also give
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AgentId(NonZeroU64);

impl AgentId {
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(AgentId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Outcome of one agent cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleResult {
    /// The cycle finished; nothing to count.
    Completed,
    /// The cycle finished after `count` successful `assert` calls, re-asserts
    /// of existing atoms included.
    Asserted { count: usize },
    /// The cycle could not finish. Assertions made before the failure remain.
    Failed { reason: String },
    /// The scheduler asked the agent to stop mid-cycle.
    Cancelled { asserted: usize },
}

impl CycleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleResult::Completed | CycleResult::Asserted { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CycleResult::Failed { .. })
    }

    /// Assertions the cycle reports as made.
    pub fn asserted(&self) -> usize {
        match self {
            CycleResult::Asserted { count } => *count,
            CycleResult::Cancelled { asserted } => *asserted,
            CycleResult::Completed | CycleResult::Failed { .. } => 0,
        }
    }
}

impl fmt::Display for CycleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleResult::Completed => write!(f, "completed"),
            CycleResult::Asserted { count } => write!(f, "asserted {count}"),
            CycleResult::Failed { reason } => write!(f, "failed: {reason}"),
            CycleResult::Cancelled { asserted } => write!(f, "cancelled after {asserted}"),
        }
    }
}

/// Shared cancellation flag; the scheduler sets it, the agent polls it.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the scheduler tells an agent about the cycle it is running.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub agent_id: AgentId,
    pub tick: u64,
    stop: StopToken,
}

impl CycleContext {
    pub fn new(agent_id: AgentId, tick: u64, stop: StopToken) -> Self {
        Self {
            agent_id,
            tick,
            stop,
        }
    }

    /// Whether the agent should wind down: finish the current item, then
    /// return [`CycleResult::Cancelled`].
    pub fn should_stop(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A periodic unit of reasoning over the shared store.
///
/// `run` is called at most once at a time per agent. It must not hold on to
/// anything borrowed from the store past its return; only handles survive
/// between cycles.
pub trait Agent: Send {
    /// Name used in logs and status listings.
    fn name(&self) -> &str;

    /// Execute one cycle.
    fn run(&mut self, store: &KnowledgeStore, ctx: &CycleContext) -> CycleResult;
}
