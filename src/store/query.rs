//! Snapshot-isolated reads.
//!
//! A [`Snapshot`] pins one store version. While it is alive no slot that
//! version can see is recycled, so every read through it observes the graph
//! exactly as it was when the snapshot was taken, truth values included,
//! whatever writers do in the meantime. [`Query`] is a lazy iterator over such a snapshot.

use crate::atom::Atom;
use crate::error::StoreError;
use crate::handle::Handle;
use crate::pattern::Pattern;

use super::{KnowledgeStore, StoreResult};

/// Registration of a snapshot version; released on drop.
#[derive(Debug)]
pub(crate) struct SnapshotGuard<'a> {
    store: &'a KnowledgeStore,
    version: u64,
}

impl<'a> SnapshotGuard<'a> {
    /// Register `version`. The caller must hold the store's state lock, or
    /// already hold a guard for the same version, so nothing at `version`
    /// can be reclaimed concurrently.
    pub(crate) fn register(store: &'a KnowledgeStore, version: u64) -> StoreResult<Self> {
        let mut snapshots = store.snapshots()?;
        *snapshots.entry(version).or_insert(0) += 1;
        Ok(Self { store, version })
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        // A poisoned registry only delays reclamation; never panic in drop.
        if let Ok(mut snapshots) = self.store.snapshots() {
            if let Some(count) = snapshots.get_mut(&self.version) {
                *count -= 1;
                if *count == 0 {
                    snapshots.remove(&self.version);
                }
            }
        }
    }
}

/// A frozen, read-only view of the store.
#[derive(Debug)]
pub struct Snapshot<'a> {
    guard: SnapshotGuard<'a>,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(guard: SnapshotGuard<'a>) -> Self {
        Self { guard }
    }

    /// Store version this snapshot observes.
    pub fn version(&self) -> u64 {
        self.guard.version()
    }

    /// Resolve a handle as of this snapshot.
    pub fn lookup(&self, handle: Handle) -> StoreResult<Atom> {
        let store = self.guard.store;
        let state = store.read()?;
        state
            .arena
            .visible(handle, self.version())
            .ok_or(StoreError::NotFound { handle })
    }

    /// Number of atoms visible in this snapshot.
    pub fn len(&self) -> StoreResult<usize> {
        let state = self.guard.store.read()?;
        Ok(state.arena.visible_handles(self.version()).len())
    }

    /// Whether the snapshot holds no atoms.
    pub fn is_empty(&self) -> StoreResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Lazily iterate the atoms of this snapshot matching `pattern`.
    pub fn query(&self, pattern: &Pattern) -> StoreResult<Query<'a>> {
        let store = self.guard.store;
        let guard = SnapshotGuard::register(store, self.version())?;
        let candidates = {
            let state = store.read()?;
            state.arena.visible_handles(self.version())
        };
        Ok(Query::new(guard, pattern.clone(), candidates))
    }
}

/// Lazy, finite sequence of handles matching a [`Pattern`] at one snapshot.
///
/// The candidate set is fixed when the query starts; each step re-reads one
/// atom under a short read lock and tests it against the pattern. Iterating
/// never blocks other readers, and writers are only held up for the duration
/// of a single step.
#[derive(Debug)]
pub struct Query<'a> {
    guard: SnapshotGuard<'a>,
    pattern: Pattern,
    candidates: std::vec::IntoIter<Handle>,
    error: Option<StoreError>,
    aborted: bool,
}

impl<'a> Query<'a> {
    pub(crate) fn new(guard: SnapshotGuard<'a>, pattern: Pattern, candidates: Vec<Handle>) -> Self {
        Self {
            guard,
            pattern,
            candidates: candidates.into_iter(),
            error: None,
            aborted: false,
        }
    }

    /// Store version this query observes.
    pub fn version(&self) -> u64 {
        self.guard.version()
    }

    /// Advance to the next matching atom, returning its content as of the
    /// query's snapshot.
    pub fn next_atom(&mut self) -> Option<Atom> {
        if self.aborted {
            return None;
        }
        let store = self.guard.store;
        let version = self.guard.version();
        for handle in self.candidates.by_ref() {
            let state = match store.read() {
                Ok(state) => state,
                Err(e) => {
                    self.error = Some(e);
                    self.aborted = true;
                    return None;
                }
            };
            if let Some(atom) = state.arena.visible(handle, version) {
                if self.pattern.matches(&atom) {
                    return Some(atom);
                }
            }
        }
        None
    }

    /// Resolve any handle as of this query's snapshot.
    pub fn lookup(&self, handle: Handle) -> StoreResult<Atom> {
        let state = self.guard.store.read()?;
        state
            .arena
            .visible(handle, self.version())
            .ok_or(StoreError::NotFound { handle })
    }

    /// The store error that cut iteration short, if any.
    ///
    /// An aborted query stays exhausted; callers that must distinguish
    /// "no more matches" from "aborted" check this after iterating.
    pub fn take_error(&mut self) -> Option<StoreError> {
        self.error.take()
    }
}

impl Iterator for Query<'_> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        self.next_atom().map(|atom| atom.handle)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.candidates.len()))
    }
}
