// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # mindgraph
//!
//! Periodic mind agents over a shared knowledge hypergraph.
//!
//! ## Architecture
//!
//! - **Handles** (`handle`): opaque, generation-checked atom identifiers
//! - **Atoms** (`atom`, `pattern`): typed nodes and links, structural filters
//! - **Store** (`store`): concurrent hypergraph with snapshot-isolated queries
//!   and a redb-backed image
//! - **Agents** (`agent`): the cycle capability and the stock query/derive/assert agent
//! - **Scheduler** (`scheduler`): ticks, periods, failure thresholds, events
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mindgraph::agent::{DerivationRule, QueryProcessor};
//! use mindgraph::atom::{AtomSpec, AtomType};
//! use mindgraph::pattern::Pattern;
//! use mindgraph::scheduler::{Scheduler, SchedulerConfig};
//! use mindgraph::store::KnowledgeStore;
//!
//! let store = Arc::new(KnowledgeStore::new());
//! let cat = store.assert(AtomSpec::node(AtomType::Concept, "cat")).unwrap();
//! let dog = store.assert(AtomSpec::node(AtomType::Concept, "dog")).unwrap();
//! store.assert(AtomSpec::link(AtomType::Similarity, vec![cat, dog])).unwrap();
//!
//! let scheduler = Scheduler::new(Arc::clone(&store), SchedulerConfig::default());
//! let closure = QueryProcessor::from_rule(
//!     "similarity-closure",
//!     Pattern::of_type(AtomType::Similarity).with_arity(2),
//!     DerivationRule::Symmetric,
//! );
//! scheduler.register(closure, 1, 0).unwrap();
//! scheduler.tick().unwrap();
//! assert_eq!(store.len().unwrap(), 4);
//! ```

pub mod agent;
pub mod atom;
pub mod config;
pub mod error;
pub mod export;
pub mod handle;
pub mod pattern;
pub mod scheduler;
pub mod store;
