//! The stock agent: query the store, derive, assert.
//!
//! One cycle walks `Idle → Querying → Asserting(0..N) → Idle`. The query is
//! snapshot-isolated, so atoms asserted during the cycle (including its own)
//! are only seen by the next cycle.
//!
//! The reported count is the number of successful `assert` calls. A re-assert
//! of an existing atom counts; it may still have raised its truth value.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, DeriveError};
use crate::pattern::Pattern;
use crate::store::KnowledgeStore;

use super::derive::{Derivation, DerivationRule};
use super::{Agent, CycleContext, CycleResult, panic_message};

/// Declarative description of a [`QueryProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryProcessorConfig {
    pub name: String,
    #[serde(default)]
    pub pattern: Pattern,
    pub rule: DerivationRule,
    /// Upper bound on assertions per cycle. `None` = unlimited.
    #[serde(default)]
    pub max_assertions_per_cycle: Option<usize>,
}

enum Source {
    Rule(DerivationRule),
    Custom(Box<dyn Derivation>),
}

/// Agent that asserts whatever its derivation yields for each atom matching
/// its pattern.
pub struct QueryProcessor {
    name: String,
    pattern: Pattern,
    source: Source,
    max_assertions: Option<usize>,
}

impl QueryProcessor {
    /// Build a processor around an arbitrary derivation (closures included).
    pub fn new(
        name: impl Into<String>,
        pattern: Pattern,
        derivation: impl Derivation + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            pattern,
            source: Source::Custom(Box::new(derivation)),
            max_assertions: None,
        }
    }

    pub fn from_rule(name: impl Into<String>, pattern: Pattern, rule: DerivationRule) -> Self {
        Self {
            name: name.into(),
            pattern,
            source: Source::Rule(rule),
            max_assertions: None,
        }
    }

    pub fn from_config(config: QueryProcessorConfig) -> Self {
        Self::from_rule(config.name, config.pattern, config.rule)
            .with_max_assertions(config.max_assertions_per_cycle)
    }

    pub fn with_max_assertions(mut self, max: Option<usize>) -> Self {
        self.max_assertions = max;
        self
    }

    fn failed(&self, source: crate::error::StoreError) -> CycleResult {
        let err = AgentError::Store {
            agent: self.name.clone(),
            source,
        };
        tracing::warn!(agent = %self.name, error = %err, "cycle failed");
        CycleResult::Failed {
            reason: err.to_string(),
        }
    }

    fn cycle(
        &self,
        derivation: &dyn Derivation,
        store: &KnowledgeStore,
        ctx: &CycleContext,
    ) -> CycleResult {
        let mut query = match store.query(&self.pattern) {
            Ok(query) => query,
            Err(e) => return self.failed(e),
        };

        let mut count = 0usize;
        loop {
            if ctx.should_stop() {
                tracing::debug!(agent = %self.name, asserted = count, "cycle cancelled");
                return CycleResult::Cancelled { asserted: count };
            }
            if self.max_assertions.is_some_and(|max| count >= max) {
                tracing::debug!(agent = %self.name, count, "assertion cap reached");
                break;
            }
            let Some(atom) = query.next_atom() else {
                break;
            };

            let derived = catch_unwind(AssertUnwindSafe(|| derivation.derive(&atom)))
                .unwrap_or_else(|payload| {
                    Err(DeriveError::new(
                        atom.handle,
                        format!("panicked: {}", panic_message(payload.as_ref())),
                    ))
                });
            let spec = match derived {
                Ok(Some(spec)) => spec,
                Ok(None) => continue,
                Err(e) => {
                    let err = AgentError::from(e);
                    tracing::warn!(agent = %self.name, candidate = %atom.handle, error = %err, "derivation skipped");
                    continue;
                }
            };

            match store.assert(spec) {
                Ok(_) => count += 1,
                Err(e) if e.is_fatal() => return self.failed(e),
                Err(e) => {
                    tracing::warn!(agent = %self.name, candidate = %atom.handle, error = %e, "assertion skipped");
                }
            }
        }

        if let Some(e) = query.take_error() {
            return self.failed(e);
        }
        CycleResult::Asserted { count }
    }
}

impl Agent for QueryProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, store: &KnowledgeStore, ctx: &CycleContext) -> CycleResult {
        match &self.source {
            Source::Custom(derivation) => self.cycle(derivation.as_ref(), store, ctx),
            Source::Rule(rule) => match rule.bind(store) {
                Ok(bound) => self.cycle(&bound, store, ctx),
                Err(e) => self.failed(e),
            },
        }
    }
}

impl std::fmt::Debug for QueryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            Source::Rule(rule) => format!("{rule:?}"),
            Source::Custom(_) => "custom".to_string(),
        };
        f.debug_struct("QueryProcessor")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("derivation", &source)
            .field("max_assertions", &self.max_assertions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentId, StopToken};
    use crate::atom::{Atom, AtomSpec, AtomType};
    use crate::error::DeriveError;
    use crate::handle::Handle;

    fn ctx() -> CycleContext {
        CycleContext::new(AgentId::new(1).unwrap(), 1, StopToken::new())
    }

    fn concept(name: &str) -> AtomSpec {
        AtomSpec::node(AtomType::Concept, name)
    }

    #[test]
    fn empty_store_asserts_nothing() {
        let store = KnowledgeStore::new();
        let mut qp = QueryProcessor::from_rule("sym", Pattern::any(), DerivationRule::Symmetric);
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 0 });
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn derives_only_from_matching_atoms() {
        let store = KnowledgeStore::new();
        store.assert(concept("x")).unwrap();
        let y = store.assert(concept("y")).unwrap();

        let mut qp = QueryProcessor::new(
            "derive-x",
            Pattern::of_type(AtomType::Concept).named("x"),
            |atom: &Atom| -> Result<Option<AtomSpec>, DeriveError> {
                Ok(Some(AtomSpec::link(AtomType::List, vec![atom.handle])))
            },
        );
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 1 });
        assert_eq!(store.len().unwrap(), 3);
        assert!(store.incoming(y).unwrap().is_empty());
    }

    #[test]
    fn derivation_errors_are_skipped() {
        let store = KnowledgeStore::new();
        store.assert(concept("bad")).unwrap();
        store.assert(concept("good")).unwrap();

        let mut qp = QueryProcessor::new(
            "picky",
            Pattern::of_type(AtomType::Concept),
            |atom: &Atom| -> Result<Option<AtomSpec>, DeriveError> {
                if atom.name.as_deref() == Some("bad") {
                    Err(DeriveError::new(atom.handle, "rejected"))
                } else {
                    Ok(Some(AtomSpec::link(AtomType::List, vec![atom.handle])))
                }
            },
        );
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 1 });
    }

    #[test]
    fn panicking_derivation_skips_only_that_candidate() {
        let store = KnowledgeStore::new();
        store.assert(concept("bad")).unwrap();
        let good = store.assert(concept("good")).unwrap();

        let mut qp = QueryProcessor::new(
            "fragile",
            Pattern::of_type(AtomType::Concept),
            |atom: &Atom| -> Result<Option<AtomSpec>, DeriveError> {
                if atom.name.as_deref() == Some("bad") {
                    panic!("bad atom");
                }
                Ok(Some(AtomSpec::link(AtomType::List, vec![atom.handle])))
            },
        );
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 1 });
        assert_eq!(store.incoming(good).unwrap().len(), 1);
    }

    #[test]
    fn dangling_assertions_are_skipped() {
        let store = KnowledgeStore::new();
        store.assert(concept("a")).unwrap();
        let ghost = Handle::new(500, 1).unwrap();
        let mut qp = QueryProcessor::new(
            "dangling",
            Pattern::any(),
            move |atom: &Atom| -> Result<Option<AtomSpec>, DeriveError> {
                Ok(Some(AtomSpec::link(AtomType::Similarity, vec![atom.handle, ghost])))
            },
        );
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 0 });
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn symmetric_closure_reaches_fixpoint() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let b = store.assert(concept("b")).unwrap();
        store
            .assert(AtomSpec::link(AtomType::Similarity, vec![a, b]))
            .unwrap();

        let mut qp = QueryProcessor::from_rule(
            "sym",
            Pattern::of_type(AtomType::Similarity).with_arity(2),
            DerivationRule::Symmetric,
        );
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 1 });
        assert_eq!(store.len().unwrap(), 4);
        // Second cycle re-asserts existing atoms only: two successful assert
        // calls, no new atoms, no new version.
        let version = store.version().unwrap();
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 2 });
        assert_eq!(store.len().unwrap(), 4);
        assert_eq!(store.version().unwrap(), version);
    }

    #[test]
    fn assertion_cap_limits_cycle() {
        let store = KnowledgeStore::new();
        for i in 0..10 {
            store.assert(concept(&format!("c{i}"))).unwrap();
        }
        let mut qp = QueryProcessor::from_rule(
            "tagger",
            Pattern::of_type(AtomType::Concept),
            DerivationRule::Tag {
                link_type: AtomType::Member,
                concept: "seen".into(),
            },
        )
        .with_max_assertions(Some(3));
        assert_eq!(qp.run(&store, &ctx()), CycleResult::Asserted { count: 3 });
    }

    #[test]
    fn stop_token_cancels_cycle() {
        let store = KnowledgeStore::new();
        store.assert(concept("a")).unwrap();
        let token = StopToken::new();
        token.stop();
        let ctx = CycleContext::new(AgentId::new(1).unwrap(), 1, token);
        let mut qp = QueryProcessor::from_rule("sym", Pattern::any(), DerivationRule::Symmetric);
        assert_eq!(qp.run(&store, &ctx), CycleResult::Cancelled { asserted: 0 });
    }
}
