//! Opaque atom handles.
//!
//! A [`Handle`] names an atom without owning it. It is an index into the
//! store's arena paired with the generation of that slot: when a retracted
//! slot is recycled its generation is bumped, so a stale handle can never
//! resolve to the atom that replaced it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, copyable reference to an atom in a [`KnowledgeStore`](crate::store::KnowledgeStore).
///
/// Ordered by `(index, generation)`. Generation `0` is reserved for
/// [`Handle::INVALID`]; every handle issued by a store has a generation of at
/// least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// The designated "no atom" handle. Never resolves.
    pub const INVALID: Handle = Handle {
        index: u32::MAX,
        generation: 0,
    };

    /// Build a handle from its parts.
    ///
    /// Returns `None` for generation 0, which only [`Handle::INVALID`] may use.
    pub fn new(index: u32, generation: u32) -> Option<Self> {
        (generation != 0).then_some(Self { index, generation })
    }

    /// Slot index inside the arena.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Whether this is anything other than the invalid sentinel.
    pub fn is_valid(self) -> bool {
        self.generation != 0
    }

    /// Pack into a `u64` (generation in the high half).
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`Handle::to_bits`]. Zero-generation bits decode to
    /// [`Handle::INVALID`].
    pub fn from_bits(bits: u64) -> Self {
        let generation = (bits >> 32) as u32;
        let index = bits as u32;
        Self::new(index, generation).unwrap_or(Self::INVALID)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "h:{}.{}", self.index, self.generation)
        } else {
            write!(f, "h:invalid")
        }
    }
}

impl std::str::FromStr for Handle {
    type Err = String;

    /// Parses `h:<index>.<generation>`, `<index>.<generation>` or the packed
    /// `u64` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim().trim_start_matches("h:");
        let parsed = match body.split_once('.') {
            Some((index, generation)) => {
                let index = index.parse::<u32>().map_err(|e| e.to_string())?;
                let generation = generation.parse::<u32>().map_err(|e| e.to_string())?;
                Handle::new(index, generation)
            }
            None => {
                let bits = body.parse::<u64>().map_err(|e| e.to_string())?;
                Some(Handle::from_bits(bits)).filter(|h| h.is_valid())
            }
        };
        parsed.ok_or_else(|| format!("not a valid handle: {s}"))
    }
}
