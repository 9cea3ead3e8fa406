//! Atoms: the typed elements of the knowledge hypergraph.
//!
//! A node is an atom with a name and no outgoing targets; a link is an atom
//! whose outgoing sequence names other atoms by [`Handle`]. Atoms are owned by
//! the [`KnowledgeStore`](crate::store::KnowledgeStore); callers work with
//! clones and handles only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::handle::Handle;

/// Type tag of an atom.
///
/// Serialized as its name, so configuration files can write
/// `atom_type = "Similarity"`. Unknown names become [`AtomType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AtomType {
    /// A named concept.
    Concept,
    /// A named predicate.
    Predicate,
    /// A pattern variable.
    Variable,
    /// A numeric literal, the number is the atom's name.
    Number,
    /// `Inheritance(a, b)`: a is a kind of b.
    Inheritance,
    /// `Similarity(a, b)`: a and b are alike.
    Similarity,
    /// `Evaluation(predicate, list)`.
    Evaluation,
    /// `Member(a, set)`.
    Member,
    /// Ordered argument list.
    List,
    /// `Implication(antecedent, consequent)`.
    Implication,
    /// Any other type tag.
    Custom(String),
}

impl AtomType {
    /// Canonical name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            AtomType::Concept => "Concept",
            AtomType::Predicate => "Predicate",
            AtomType::Variable => "Variable",
            AtomType::Number => "Number",
            AtomType::Inheritance => "Inheritance",
            AtomType::Similarity => "Similarity",
            AtomType::Evaluation => "Evaluation",
            AtomType::Member => "Member",
            AtomType::List => "List",
            AtomType::Implication => "Implication",
            AtomType::Custom(name) => name,
        }
    }
}

impl From<String> for AtomType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Concept" => AtomType::Concept,
            "Predicate" => AtomType::Predicate,
            "Variable" => AtomType::Variable,
            "Number" => AtomType::Number,
            "Inheritance" => AtomType::Inheritance,
            "Similarity" => AtomType::Similarity,
            "Evaluation" => AtomType::Evaluation,
            "Member" => AtomType::Member,
            "List" => AtomType::List,
            "Implication" => AtomType::Implication,
            _ => AtomType::Custom(name),
        }
    }
}

impl From<&str> for AtomType {
    fn from(name: &str) -> Self {
        AtomType::from(name.to_string())
    }
}

impl From<AtomType> for String {
    fn from(t: AtomType) -> Self {
        match t {
            AtomType::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for AtomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simple truth value: how true (`strength`) and how sure (`confidence`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthValue {
    /// Strength in [0.0, 1.0].
    pub strength: f32,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
}

impl TruthValue {
    /// Create a truth value, clamping both components into [0.0, 1.0].
    pub fn new(strength: f32, confidence: f32) -> Self {
        Self {
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Merge an incoming value into this one.
    ///
    /// The more confident value wins; ties keep the stored value. Returns
    /// whether anything changed.
    pub fn merge(&mut self, incoming: TruthValue) -> bool {
        if incoming.confidence > self.confidence {
            *self = incoming;
            true
        } else {
            false
        }
    }
}

impl Default for TruthValue {
    fn default() -> Self {
        Self {
            strength: 1.0,
            confidence: 1.0,
        }
    }
}

/// A proposed atom, as passed to [`KnowledgeStore::assert`](crate::store::KnowledgeStore::assert).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomSpec {
    pub atom_type: AtomType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<Handle>,
    #[serde(default)]
    pub truth: TruthValue,
}

impl AtomSpec {
    /// A named node.
    pub fn node(atom_type: impl Into<AtomType>, name: impl Into<String>) -> Self {
        Self {
            atom_type: atom_type.into(),
            name: Some(name.into()),
            outgoing: Vec::new(),
            truth: TruthValue::default(),
        }
    }

    /// An unnamed link over the given targets.
    pub fn link(atom_type: impl Into<AtomType>, outgoing: impl Into<Vec<Handle>>) -> Self {
        Self {
            atom_type: atom_type.into(),
            name: None,
            outgoing: outgoing.into(),
            truth: TruthValue::default(),
        }
    }

    /// Set the truth value.
    pub fn with_truth(mut self, truth: TruthValue) -> Self {
        self.truth = truth;
        self
    }

    /// Structural identity: two specs with equal keys denote the same atom.
    pub fn key(&self) -> AtomKey {
        AtomKey {
            atom_type: self.atom_type.clone(),
            name: self.name.clone(),
            outgoing: self.outgoing.clone(),
        }
    }
}

/// Structural identity of an atom; truth values are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtomKey {
    pub atom_type: AtomType,
    pub name: Option<String>,
    pub outgoing: Vec<Handle>,
}

/// An atom as stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub handle: Handle,
    pub atom_type: AtomType,
    pub name: Option<String>,
    pub outgoing: Vec<Handle>,
    pub truth: TruthValue,
}

impl Atom {
    pub(crate) fn from_spec(handle: Handle, spec: AtomSpec) -> Self {
        Self {
            handle,
            atom_type: spec.atom_type,
            name: spec.name,
            outgoing: spec.outgoing,
            truth: spec.truth,
        }
    }

    /// Whether the atom has outgoing targets.
    pub fn is_link(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Number of outgoing targets.
    pub fn arity(&self) -> usize {
        self.outgoing.len()
    }

    /// Structural identity of this atom.
    pub fn key(&self) -> AtomKey {
        AtomKey {
            atom_type: self.atom_type.clone(),
            name: self.name.clone(),
            outgoing: self.outgoing.clone(),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.atom_type)?;
        if let Some(name) = &self.name {
            write!(f, " \"{name}\"")?;
        }
        if self.is_link() {
            let targets: Vec<String> = self.outgoing.iter().map(Handle::to_string).collect();
            write!(f, "({})", targets.join(", "))?;
        }
        Ok(())
    }
}
