//! Scheduler events and the sinks that receive them.
//!
//! The scheduler reports noteworthy transitions (an agent being stopped for
//! failing too often, a tick finishing) as [`SchedulerEvent`]s rather than
//! printing them. Individual failed cycles are only logged. [`TracingSink`] forwards them to `tracing`;
//! [`CollectingSink`] keeps them in memory for tests.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

// ── Event types ─────────────────────────────────────────────────────────

/// A transition reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerEvent {
    /// An agent reached the failure threshold and was set stopped.
    AgentStopped {
        id: AgentId,
        name: String,
        tick: u64,
        consecutive_failures: u32,
    },
    /// A tick finished.
    TickCompleted { tick: u64, runs: usize },
}

impl SchedulerEvent {
    pub fn is_agent_stopped(&self) -> bool {
        matches!(self, SchedulerEvent::AgentStopped { .. })
    }
}

// ── EventSink trait ─────────────────────────────────────────────────────

/// Destination for scheduler events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SchedulerEvent);
}

// ── TracingSink ─────────────────────────────────────────────────────────

/// Logs events through `tracing`. The scheduler's default sink.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::AgentStopped {
                id,
                name,
                tick,
                consecutive_failures,
            } => {
                tracing::error!(agent = %name, %id, tick, consecutive_failures, "agent stopped after repeated failures");
            }
            SchedulerEvent::TickCompleted { tick, runs } => {
                tracing::debug!(tick, runs, "tick completed");
            }
        }
    }
}

// ── CollectingSink ──────────────────────────────────────────────────────

/// Collects events into a `Vec` for inspection.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events collected so far.
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Drain and return all collected events.
    pub fn take(&self) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &SchedulerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.emit(&SchedulerEvent::TickCompleted { tick: 1, runs: 0 });
        sink.emit(&SchedulerEvent::TickCompleted { tick: 2, runs: 3 });
        let events = sink.take();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SchedulerEvent::TickCompleted { tick: 2, runs: 3 });
        assert!(sink.events().is_empty());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SchedulerEvent::AgentStopped {
            id: AgentId::new(3).unwrap(),
            name: "flaky".into(),
            tick: 9,
            consecutive_failures: 5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"AgentStopped\""));
        assert!(event.is_agent_stopped());
    }
}
