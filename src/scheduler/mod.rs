//! The scheduler: owns the knowledge store and drives registered agents.
//!
//! Time advances in ticks. On each tick every running agent whose period has
//! elapsed gets one cycle, in registration order. Failures are counted per
//! agent; an agent that fails `failure_threshold` times in a row is stopped
//! and one [`SchedulerEvent::AgentStopped`] is emitted. Nothing is ever
//! unregistered automatically.

#[cfg(feature = "daemon")]
pub mod daemon;
pub mod event;
pub mod registry;

use std::cmp::Reverse;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentId, CycleContext, CycleResult, panic_message};
use crate::error::SchedulerError;
use crate::store::KnowledgeStore;

pub use event::{CollectingSink, EventSink, SchedulerEvent, TracingSink};
pub use registry::AgentStatus;
use registry::{AgentEntry, Registry};

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scheduler tuning, the `[scheduler]` table of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consecutive failures after which an agent is stopped (default: 5).
    pub failure_threshold: u32,
    /// Most agents invoked per tick, highest priority first. 0 = unlimited.
    pub max_runs_per_tick: usize,
    /// Wall-clock tick length for the daemon loop (default: 1000 ms).
    pub tick_interval_ms: u64,
    /// Run the ready agents of a tick concurrently.
    pub parallel: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            max_runs_per_tick: 0,
            tick_interval_ms: 1000,
            parallel: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One agent invocation within a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub agent: AgentId,
    pub name: String,
    pub result: CycleResult,
}

/// Everything that happened in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub runs: Vec<RunRecord>,
}

impl TickReport {
    /// Total assertions reported by the tick's runs.
    pub fn asserted(&self) -> usize {
        self.runs.iter().map(|r| r.result.asserted()).sum()
    }

    pub fn failures(&self) -> usize {
        self.runs.iter().filter(|r| r.result.is_failure()).count()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Hosts the shared store and the agent registry.
pub struct Scheduler {
    store: Arc<KnowledgeStore>,
    config: SchedulerConfig,
    registry: Registry,
    tick: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl Scheduler {
    pub fn new(store: Arc<KnowledgeStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            registry: Registry::new(),
            tick: AtomicU64::new(0),
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of ticks executed so far.
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Registration & control
    // -----------------------------------------------------------------------

    /// Register an agent to run every `period` ticks. It starts running.
    pub fn register(
        &self,
        agent: impl Agent + 'static,
        period: u64,
        priority: u8,
    ) -> SchedulerResult<AgentId> {
        self.register_boxed(Box::new(agent), period, priority)
    }

    pub fn register_boxed(
        &self,
        agent: Box<dyn Agent>,
        period: u64,
        priority: u8,
    ) -> SchedulerResult<AgentId> {
        if period == 0 {
            return Err(SchedulerError::InvalidPeriod {
                name: agent.name().to_string(),
            });
        }
        let name = agent.name().to_string();
        let id = self.registry.insert(agent, period, priority)?;
        tracing::info!(agent = %name, %id, period, priority, "agent registered");
        Ok(id)
    }

    /// Remove an agent. A run already in progress finishes undisturbed.
    pub fn unregister(&self, id: AgentId) -> SchedulerResult<()> {
        let entry = self.registry.remove(id)?;
        entry.stop.stop();
        tracing::info!(agent = %entry.name, %id, "agent unregistered");
        Ok(())
    }

    /// Start or stop an agent.
    ///
    /// Stopping raises the agent's stop token: a run in progress finishes its
    /// current item and returns `Cancelled`. Restarting clears the token and
    /// the consecutive-failure count.
    pub fn set_running(&self, id: AgentId, running: bool) -> SchedulerResult<()> {
        let entry = self.registry.get(id)?;
        let mut state = entry.state()?;
        if running {
            entry.stop.reset();
            state.consecutive_failures = 0;
        } else {
            entry.stop.stop();
        }
        state.running = running;
        tracing::info!(agent = %entry.name, %id, running, "agent state changed");
        Ok(())
    }

    pub fn status(&self, id: AgentId) -> SchedulerResult<AgentStatus> {
        self.registry.get(id)?.status()
    }

    /// Status of every agent, in registration order.
    pub fn agents(&self) -> SchedulerResult<Vec<AgentStatus>> {
        self.registry.ordered().iter().map(|e| e.status()).collect()
    }

    pub fn agent_count(&self) -> usize {
        self.registry.len()
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    /// Run one tick sequentially.
    pub fn tick(&self) -> SchedulerResult<TickReport> {
        let (tick, ready) = self.begin_tick()?;
        let runs = ready
            .iter()
            .map(|entry| self.run_agent(entry, tick))
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok(self.finish_tick(tick, runs))
    }

    /// Run one tick with the ready agents spread over the rayon pool.
    ///
    /// Same per-agent guarantees as [`tick`](Self::tick); the report lists
    /// runs in registration order.
    pub fn tick_parallel(&self) -> SchedulerResult<TickReport> {
        let (tick, ready) = self.begin_tick()?;
        let runs = ready
            .par_iter()
            .map(|entry| self.run_agent(entry, tick))
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok(self.finish_tick(tick, runs))
    }

    /// Run one tick, sequential or parallel per configuration.
    pub fn step(&self) -> SchedulerResult<TickReport> {
        if self.config.parallel {
            self.tick_parallel()
        } else {
            self.tick()
        }
    }

    /// Run `n` ticks, returning every report.
    pub fn run_ticks(&self, n: u64) -> SchedulerResult<Vec<TickReport>> {
        (0..n).map(|_| self.step()).collect()
    }

    fn begin_tick(&self) -> SchedulerResult<(u64, Vec<Arc<AgentEntry>>)> {
        // A poisoned store is unusable for every agent: halt instead of
        // collecting a failure from each of them.
        if let Err(e) = self.store.version() {
            return Err(SchedulerError::Fatal {
                message: e.to_string(),
            });
        }

        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        let mut ready = Vec::new();
        for entry in self.registry.ordered() {
            if entry.is_due(tick)? {
                ready.push(entry);
            }
        }

        let max = self.config.max_runs_per_tick;
        if max > 0 && ready.len() > max {
            ready.sort_by_key(|e| (Reverse(e.priority), e.id));
            ready.truncate(max);
            ready.sort_by_key(|e| e.id);
        }
        Ok((tick, ready))
    }

    fn finish_tick(&self, tick: u64, runs: Vec<RunRecord>) -> TickReport {
        self.sink.emit(&SchedulerEvent::TickCompleted {
            tick,
            runs: runs.len(),
        });
        TickReport { tick, runs }
    }

    fn run_agent(&self, entry: &AgentEntry, tick: u64) -> SchedulerResult<RunRecord> {
        let ctx = CycleContext::new(entry.id, tick, entry.stop.clone());

        let result = {
            let mut agent = entry.agent.lock().map_err(|_| SchedulerError::Fatal {
                message: format!("agent \"{}\" poisoned", entry.name),
            })?;
            let _span = tracing::debug_span!("cycle", agent = %entry.name, tick).entered();
            match catch_unwind(AssertUnwindSafe(|| agent.run(&self.store, &ctx))) {
                Ok(result) => result,
                Err(payload) => CycleResult::Failed {
                    reason: format!("panicked: {}", panic_message(payload.as_ref())),
                },
            }
        };

        self.record(entry, tick, &result)?;
        Ok(RunRecord {
            agent: entry.id,
            name: entry.name.clone(),
            result,
        })
    }

    fn record(&self, entry: &AgentEntry, tick: u64, result: &CycleResult) -> SchedulerResult<()> {
        let mut state = entry.state()?;
        state.last_run = Some(tick);
        state.runs += 1;

        match result {
            CycleResult::Failed { reason } => {
                state.failures += 1;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let consecutive_failures = state.consecutive_failures;
                tracing::warn!(agent = %entry.name, id = %entry.id, tick, consecutive_failures, %reason, "agent cycle failed");
                if state.running && consecutive_failures >= self.config.failure_threshold {
                    state.running = false;
                    entry.stop.stop();
                    self.sink.emit(&SchedulerEvent::AgentStopped {
                        id: entry.id,
                        name: entry.name.clone(),
                        tick,
                        consecutive_failures,
                    });
                }
            }
            CycleResult::Cancelled { asserted } => {
                state.cancellations += 1;
                state.assertions += *asserted as u64;
            }
            CycleResult::Completed | CycleResult::Asserted { .. } => {
                state.consecutive_failures = 0;
                state.assertions += result.asserted() as u64;
                tracing::debug!(agent = %entry.name, tick, count = result.asserted(), "cycle finished");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tick", &self.current_tick())
            .field("agents", &self.registry.len())
            .field("config", &self.config)
            .finish()
    }
}
