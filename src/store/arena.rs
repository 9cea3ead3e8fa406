//! Generational slot arena holding every atom the store owns.
//!
//! Each occupied slot records the version that created its atom and, once
//! retracted, the version that retracted it. A retracted slot stays readable
//! by snapshots that predate the retraction; it is recycled (with a bumped
//! generation) only after the oldest live snapshot has moved past it. Truth
//! value revisions are versioned the same way: the replaced value is kept
//! until no snapshot can still ask for it.

use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomSpec, TruthValue};
use crate::error::StoreError;
use crate::handle::Handle;

use super::StoreResult;

/// Highest slot index the arena hands out. `u32::MAX` is left to
/// [`Handle::INVALID`].
pub(crate) const MAX_SLOTS: u32 = u32::MAX - 1;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub atom: Atom,
    pub created: u64,
    pub retracted: Option<u64>,
    /// Superseded truth values, oldest first: `(replaced_at, value)` held
    /// the truth for every version before `replaced_at`.
    revisions: Vec<(u64, TruthValue)>,
}

impl Entry {
    fn new(atom: Atom, created: u64) -> Self {
        Self {
            atom,
            created,
            retracted: None,
            revisions: Vec::new(),
        }
    }

    fn visible_at(&self, version: u64) -> bool {
        self.created <= version && self.retracted.is_none_or(|r| r > version)
    }

    fn truth_at(&self, version: u64) -> TruthValue {
        self.revisions
            .iter()
            .find(|(replaced_at, _)| *replaced_at > version)
            .map_or(self.atom.truth, |(_, truth)| *truth)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Occupied { generation: u32, entry: Entry },
    /// Free, the next atom placed here gets `generation`.
    Free { generation: u32 },
    /// Generation space used up; never handed out again.
    Retired,
}

/// Persisted form of a slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum SlotRecord {
    Live(Atom),
    Free { generation: u32 },
    Retired,
}

#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Retracted slots waiting for old snapshots to drain: `(retracted_at, index)`.
    pending: Vec<(u64, u32)>,
    /// Slots holding superseded truth values: `(replaced_at, index)`.
    revised: Vec<(u64, u32)>,
}

impl Arena {
    fn entry(&self, handle: Handle) -> Option<&Entry> {
        if !handle.is_valid() {
            return None;
        }
        match self.slots.get(handle.index() as usize)? {
            Slot::Occupied { generation, entry } if *generation == handle.generation() => {
                Some(entry)
            }
            _ => None,
        }
    }

    fn entry_mut(&mut self, handle: Handle) -> Option<&mut Entry> {
        if !handle.is_valid() {
            return None;
        }
        match self.slots.get_mut(handle.index() as usize)? {
            Slot::Occupied { generation, entry } if *generation == handle.generation() => {
                Some(entry)
            }
            _ => None,
        }
    }

    /// The atom behind `handle`, if it has not been retracted.
    pub fn live(&self, handle: Handle) -> Option<&Atom> {
        self.entry(handle)
            .filter(|e| e.retracted.is_none())
            .map(|e| &e.atom)
    }

    /// Replace the truth value of a live atom at `version`, keeping the old
    /// one for snapshots taken before it. Returns false if it was not live.
    pub fn revise(&mut self, handle: Handle, truth: TruthValue, version: u64) -> bool {
        match self.entry_mut(handle) {
            Some(entry) if entry.retracted.is_none() => {
                let old = std::mem::replace(&mut entry.atom.truth, truth);
                entry.revisions.push((version, old));
                self.revised.push((version, handle.index()));
                true
            }
            _ => false,
        }
    }

    /// The atom behind `handle` as seen by a snapshot at `version`, truth
    /// value included.
    pub fn visible(&self, handle: Handle, version: u64) -> Option<Atom> {
        self.entry(handle)
            .filter(|e| e.visible_at(version))
            .map(|e| Atom {
                truth: e.truth_at(version),
                ..e.atom.clone()
            })
    }

    /// Every handle visible at `version`, in slot order.
    pub fn visible_handles(&self, version: u64) -> Vec<Handle> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Occupied { entry, .. } if entry.visible_at(version) => {
                    Some(entry.atom.handle)
                }
                _ => None,
            })
            .collect()
    }

    /// Place a new atom, reusing a recycled slot when one is available.
    pub fn allocate(&mut self, spec: AtomSpec, version: u64) -> StoreResult<Handle> {
        let (index, generation) = match self.free.pop() {
            Some(index) => match self.slots[index as usize] {
                Slot::Free { generation } => (index, generation),
                _ => {
                    return Err(StoreError::Corrupted {
                        message: format!("free list names non-free slot {index}"),
                    });
                }
            },
            None => {
                let index = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|i| *i <= MAX_SLOTS)
                    .ok_or(StoreError::ArenaExhausted { limit: MAX_SLOTS })?;
                self.slots.push(Slot::Free { generation: 1 });
                (index, 1)
            }
        };
        let handle = Handle::new(index, generation).ok_or_else(|| StoreError::Corrupted {
            message: format!("slot {index} carries generation 0"),
        })?;
        self.slots[index as usize] = Slot::Occupied {
            generation,
            entry: Entry::new(Atom::from_spec(handle, spec), version),
        };
        Ok(handle)
    }

    /// Mark a live atom retracted at `version`. Returns false if it was not live.
    pub fn retract(&mut self, handle: Handle, version: u64) -> bool {
        match self.entry_mut(handle) {
            Some(entry) if entry.retracted.is_none() => {
                entry.retracted = Some(version);
                self.pending.push((version, handle.index()));
                true
            }
            _ => false,
        }
    }

    /// Recycle retracted slots and drop superseded truth values no live
    /// snapshot can still see.
    ///
    /// `oldest_snapshot` is the smallest registered snapshot version, or
    /// `None` when no snapshot is alive. Returns the number of slots freed.
    pub fn reclaim(&mut self, oldest_snapshot: Option<u64>) -> usize {
        let drained = |at: u64| oldest_snapshot.is_none_or(|v| at <= v);

        let (stale, kept): (Vec<_>, Vec<_>) =
            self.revised.drain(..).partition(|(replaced_at, _)| drained(*replaced_at));
        self.revised = kept;
        for (_, index) in stale {
            if let Some(Slot::Occupied { entry, .. }) = self.slots.get_mut(index as usize) {
                entry.revisions.retain(|(replaced_at, _)| !drained(*replaced_at));
            }
        }

        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|(retracted_at, _)| drained(*retracted_at));
        self.pending = waiting;

        let mut freed = 0;
        for (_, index) in ready {
            let slot = &mut self.slots[index as usize];
            let Slot::Occupied { generation, .. } = slot else {
                continue;
            };
            match generation.checked_add(1) {
                Some(next) => {
                    *slot = Slot::Free { generation: next };
                    self.free.push(index);
                    freed += 1;
                }
                None => *slot = Slot::Retired,
            }
        }
        freed
    }

    /// Total slots ever created.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Retracted atoms still held for old snapshots.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Superseded truth values still held for old snapshots.
    pub fn revision_count(&self) -> usize {
        self.revised.len()
    }

    /// Persisted view of every slot, in index order.
    ///
    /// Retracted-but-pending slots are written as free with their next
    /// generation: no snapshot survives a reload.
    pub fn records(&self) -> Vec<SlotRecord> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Occupied { entry, .. } if entry.retracted.is_none() => {
                    SlotRecord::Live(entry.atom.clone())
                }
                Slot::Occupied { generation, .. } => match generation.checked_add(1) {
                    Some(next) => SlotRecord::Free { generation: next },
                    None => SlotRecord::Retired,
                },
                Slot::Free { generation } => SlotRecord::Free {
                    generation: *generation,
                },
                Slot::Retired => SlotRecord::Retired,
            })
            .collect()
    }

    /// Rebuild an arena from persisted records. Live atoms are stamped with
    /// `version` as their creation version.
    pub fn from_records(records: Vec<SlotRecord>, version: u64) -> StoreResult<Self> {
        let mut arena = Arena::default();
        for (i, record) in records.into_iter().enumerate() {
            let index = i as u32;
            let slot = match record {
                SlotRecord::Live(atom) => {
                    if atom.handle.index() != index || !atom.handle.is_valid() {
                        return Err(StoreError::Serialization {
                            message: format!("atom {} stored in slot {index}", atom.handle),
                        });
                    }
                    Slot::Occupied {
                        generation: atom.handle.generation(),
                        entry: Entry::new(atom, version),
                    }
                }
                SlotRecord::Free { generation } if generation != 0 => {
                    arena.free.push(index);
                    Slot::Free { generation }
                }
                SlotRecord::Free { .. } => {
                    return Err(StoreError::Serialization {
                        message: format!("free slot {index} has generation 0"),
                    });
                }
                SlotRecord::Retired => Slot::Retired,
            };
            arena.slots.push(slot);
        }
        // Hand out low indices first, as a fresh arena would.
        arena.free.reverse();
        Ok(arena)
    }

    /// Live atoms in slot order.
    pub fn live_atoms(&self) -> impl Iterator<Item = &Atom> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { entry, .. } if entry.retracted.is_none() => Some(&entry.atom),
            _ => None,
        })
    }
}
