//! Derivations: what a candidate atom yields.
//!
//! A [`Derivation`] is pure. It sees one atom and proposes at most one new
//! atom; it never touches the store. Plain closures qualify through the
//! blanket impl. [`DerivationRule`] is the configurable set usable from TOML.

use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomSpec, AtomType};
use crate::error::DeriveError;
use crate::handle::Handle;
use crate::store::{KnowledgeStore, StoreResult};

/// Decide what, if anything, a candidate atom yields.
pub trait Derivation: Send {
    fn derive(&self, atom: &Atom) -> Result<Option<AtomSpec>, DeriveError>;
}

impl<F> Derivation for F
where
    F: Fn(&Atom) -> Result<Option<AtomSpec>, DeriveError> + Send,
{
    fn derive(&self, atom: &Atom) -> Result<Option<AtomSpec>, DeriveError> {
        self(atom)
    }
}

/// Configurable derivation, selected by `kind` in configuration files.
///
/// ```toml
/// rule = { kind = "inverse", link_type = "Member" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivationRule {
    /// `L(a, b)` yields `L(b, a)`.
    Symmetric,
    /// `L(a, b)` yields `link_type(b, a)`.
    Inverse { link_type: AtomType },
    /// `L(xs..)` yields `link_type(xs..)`.
    Retype { link_type: AtomType },
    /// `x` yields `link_type(x, concept)`, with `concept` a `Concept` node.
    Tag { link_type: AtomType, concept: String },
}

impl DerivationRule {
    /// Resolve the store-dependent parts of the rule.
    ///
    /// For [`DerivationRule::Tag`] this asserts the concept node, so it
    /// exists (idempotently) before any candidate is processed.
    pub fn bind(&self, store: &KnowledgeStore) -> StoreResult<BoundRule> {
        Ok(match self {
            DerivationRule::Symmetric => BoundRule::Symmetric,
            DerivationRule::Inverse { link_type } => BoundRule::Inverse(link_type.clone()),
            DerivationRule::Retype { link_type } => BoundRule::Retype(link_type.clone()),
            DerivationRule::Tag { link_type, concept } => {
                let concept = store.assert(AtomSpec::node(AtomType::Concept, concept.as_str()))?;
                BoundRule::Tag {
                    link_type: link_type.clone(),
                    concept,
                }
            }
        })
    }
}

/// A [`DerivationRule`] ready to run against one store.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundRule {
    Symmetric,
    Inverse(AtomType),
    Retype(AtomType),
    Tag { link_type: AtomType, concept: Handle },
}

fn binary(atom: &Atom) -> Option<(Handle, Handle)> {
    match atom.outgoing.as_slice() {
        [a, b] => Some((*a, *b)),
        _ => None,
    }
}

impl Derivation for BoundRule {
    fn derive(&self, atom: &Atom) -> Result<Option<AtomSpec>, DeriveError> {
        let spec = match self {
            BoundRule::Symmetric => binary(atom)
                .filter(|(a, b)| a != b)
                .map(|(a, b)| AtomSpec::link(atom.atom_type.clone(), vec![b, a])),
            BoundRule::Inverse(link_type) => {
                binary(atom).map(|(a, b)| AtomSpec::link(link_type.clone(), vec![b, a]))
            }
            BoundRule::Retype(link_type) => (atom.is_link() && atom.atom_type != *link_type)
                .then(|| AtomSpec::link(link_type.clone(), atom.outgoing.clone())),
            BoundRule::Tag { link_type, concept } => (atom.handle != *concept)
                .then(|| AtomSpec::link(link_type.clone(), vec![atom.handle, *concept])),
        };
        // Derived atoms inherit the candidate's truth.
        Ok(spec.map(|s| s.with_truth(atom.truth)))
    }
}
