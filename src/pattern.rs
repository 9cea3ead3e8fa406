//! Structural atom filters for [`KnowledgeStore::query`](crate::store::KnowledgeStore::query).
//!
//! A [`Pattern`] is a conjunction of optional constraints on a single atom.
//! It is deliberately not a query language: no variables, no joins. Agents
//! that need more combine several queries with their own logic.

use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomType};
use crate::handle::Handle;

/// A conjunction of constraints; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pattern {
    /// Required type tag.
    pub atom_type: Option<AtomType>,
    /// Required name.
    pub name: Option<String>,
    /// Required number of outgoing targets (0 selects nodes).
    pub arity: Option<usize>,
    /// Required targets at given positions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<(usize, Handle)>,
    /// A target that must appear at any position.
    pub contains: Option<Handle>,
    /// Minimum truth-value confidence.
    pub min_confidence: Option<f32>,
}

impl Pattern {
    /// Match every atom.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match atoms of the given type.
    pub fn of_type(atom_type: impl Into<AtomType>) -> Self {
        Self {
            atom_type: Some(atom_type.into()),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn with_target(mut self, position: usize, target: Handle) -> Self {
        self.targets.push((position, target));
        self
    }

    pub fn containing(mut self, target: Handle) -> Self {
        self.contains = Some(target);
        self
    }

    pub fn with_min_confidence(mut self, confidence: f32) -> Self {
        self.min_confidence = Some(confidence);
        self
    }

    /// Whether the atom satisfies every constraint.
    pub fn matches(&self, atom: &Atom) -> bool {
        if self.atom_type.as_ref().is_some_and(|t| *t != atom.atom_type) {
            return false;
        }
        if self
            .name
            .as_deref()
            .is_some_and(|n| atom.name.as_deref() != Some(n))
        {
            return false;
        }
        if self.arity.is_some_and(|a| a != atom.arity()) {
            return false;
        }
        if !self
            .targets
            .iter()
            .all(|(pos, h)| atom.outgoing.get(*pos) == Some(h))
        {
            return false;
        }
        if self.contains.is_some_and(|h| !atom.outgoing.contains(&h)) {
            return false;
        }
        if self
            .min_confidence
            .is_some_and(|c| atom.truth.confidence < c)
        {
            return false;
        }
        true
    }
}
