//! Rich diagnostic error types for mindgraph.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so users know exactly what went wrong and
//! how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::handle::Handle;

/// Top-level error type for mindgraph.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum MindError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("atom not found: {handle}")]
    #[diagnostic(
        code(mind::store::not_found),
        help(
            "The handle does not resolve to a live atom. It was never issued by this \
             store, it is the invalid sentinel, or the atom has been retracted."
        )
    )]
    NotFound { handle: Handle },

    #[error("dangling reference: target {target} of the asserted atom is not live")]
    #[diagnostic(
        code(mind::store::dangling_reference),
        help(
            "Every outgoing target of an asserted link must be a live atom. \
             Assert the targets first, or drop the candidate if they were retracted."
        )
    )]
    DanglingReference { target: Handle },

    #[error("atom arena exhausted: no slot index left below {limit}")]
    #[diagnostic(
        code(mind::store::exhausted),
        help("The store ran out of slot indices. Retract unused atoms or split the graph.")
    )]
    ArenaExhausted { limit: u32 },

    #[error("knowledge store corrupted: {message}")]
    #[diagnostic(
        code(mind::store::corrupted),
        help(
            "An internal lock was poisoned by a panicking writer. The store can no longer \
             guarantee consistency; restart from the last persisted image."
        )
    )]
    Corrupted { message: String },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(mind::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(mind::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption. Try running with a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(mind::store::serde),
        help(
            "Failed to serialize or deserialize an atom record. \
             This usually means the image was written by an incompatible version."
        )
    )]
    Serialization { message: String },
}

impl StoreError {
    /// Whether the error leaves the store unusable (the fatal class).
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Corrupted { .. })
    }
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

/// Failure of a derivation step for a single candidate atom.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("derivation failed for {candidate}: {message}")]
#[diagnostic(
    code(mind::agent::derive),
    help("The candidate is skipped; the rest of the cycle continues.")
)]
pub struct DeriveError {
    pub candidate: Handle,
    pub message: String,
}

impl DeriveError {
    pub fn new(candidate: Handle, message: impl Into<String>) -> Self {
        Self {
            candidate,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Derivation(#[from] DeriveError),

    #[error("agent \"{agent}\" could not reach the store: {source}")]
    #[diagnostic(
        code(mind::agent::store),
        help("A store error escaped candidate processing. See the inner cause.")
    )]
    Store {
        agent: String,
        #[source]
        source: StoreError,
    },
}

// ---------------------------------------------------------------------------
// Scheduler errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("unknown agent: {id}")]
    #[diagnostic(
        code(mind::scheduler::unknown_agent),
        help("The agent was never registered or has been unregistered. List agents with `scheduler.agents()`.")
    )]
    UnknownAgent { id: u64 },

    #[error("invalid period for agent \"{name}\": must be at least one tick")]
    #[diagnostic(
        code(mind::scheduler::invalid_period),
        help("Register the agent with `period >= 1`.")
    )]
    InvalidPeriod { name: String },

    #[error("agent id space exhausted")]
    #[diagnostic(
        code(mind::scheduler::exhausted),
        help("More than u64::MAX registrations were made. Check for registration loops.")
    )]
    IdsExhausted,

    #[error("scheduler fatal: {message}")]
    #[diagnostic(
        code(mind::scheduler::fatal),
        help("The scheduler's internal state is unusable. Restart the server.")
    )]
    Fatal { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    #[diagnostic(
        code(mind::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(mind::config::parse),
        help("The file must be valid TOML matching the `MindConfig` layout.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config {path}")]
    #[diagnostic(
        code(mind::config::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(mind::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning mindgraph results.
pub type MindResult<T> = std::result::Result<T, MindError>;
