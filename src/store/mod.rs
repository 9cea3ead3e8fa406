//! The shared knowledge hypergraph.
//!
//! [`KnowledgeStore`] is the sole owner of every atom. Agents address atoms by
//! [`Handle`] and go through four operations:
//!
//! - [`lookup`](KnowledgeStore::lookup): read one atom
//! - [`query`](KnowledgeStore::query): lazy, snapshot-isolated pattern scan
//! - [`assert`](KnowledgeStore::assert): idempotent insert
//! - [`retract`](KnowledgeStore::retract): delete, cascading to links
//!
//! A single `RwLock` guards the arena and its indices: readers share it,
//! writers are serialized and each write bumps the store version, which gives
//! the global order snapshots are taken against.

pub(crate) mod arena;
pub mod durable;
pub mod query;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::atom::{Atom, AtomKey, AtomSpec, AtomType};
use crate::error::StoreError;
use crate::handle::Handle;
use crate::pattern::Pattern;

use arena::{Arena, SlotRecord};
pub use durable::DurableImage;
pub use query::{Query, Snapshot};
use query::SnapshotGuard;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything guarded by the store lock.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) arena: Arena,
    /// Structural key → live handle, the idempotence index.
    index: HashMap<AtomKey, Handle>,
    /// Type → live handles of that type.
    by_type: HashMap<AtomType, BTreeSet<Handle>>,
    /// Live target → live links pointing at it.
    incoming: HashMap<Handle, BTreeSet<Handle>>,
    /// Version of the last committed write.
    version: u64,
}

impl StoreState {
    fn link(&mut self, atom: &Atom) {
        self.index.insert(atom.key(), atom.handle);
        self.by_type
            .entry(atom.atom_type.clone())
            .or_default()
            .insert(atom.handle);
        for target in &atom.outgoing {
            self.incoming.entry(*target).or_default().insert(atom.handle);
        }
    }

    fn unlink(&mut self, atom: &Atom) {
        self.index.remove(&atom.key());
        if let Some(set) = self.by_type.get_mut(&atom.atom_type) {
            set.remove(&atom.handle);
            if set.is_empty() {
                self.by_type.remove(&atom.atom_type);
            }
        }
        for target in &atom.outgoing {
            if let Some(set) = self.incoming.get_mut(target) {
                set.remove(&atom.handle);
                if set.is_empty() {
                    self.incoming.remove(target);
                }
            }
        }
        self.incoming.remove(&atom.handle);
    }

    /// Live handles that may match `pattern`, narrowed by the type index.
    fn candidates(&self, pattern: &Pattern) -> Vec<Handle> {
        match &pattern.atom_type {
            Some(t) => self
                .by_type
                .get(t)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
            None => self.arena.live_atoms().map(|a| a.handle).collect(),
        }
    }
}

/// Counters describing the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Live atoms.
    pub live: usize,
    /// Retracted atoms still held for older snapshots.
    pub retracted: usize,
    /// Superseded truth values still held for older snapshots.
    pub revisions: usize,
    /// Arena slots ever created.
    pub slots: usize,
    /// Version of the last committed write.
    pub version: u64,
    /// Snapshots currently alive.
    pub snapshots: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "mindgraph store")?;
        writeln!(f, "  live atoms:  {}", self.live)?;
        writeln!(f, "  retracted:   {}", self.retracted)?;
        writeln!(f, "  revisions:   {}", self.revisions)?;
        writeln!(f, "  slots:       {}", self.slots)?;
        writeln!(f, "  version:     {}", self.version)?;
        writeln!(f, "  snapshots:   {}", self.snapshots)?;
        Ok(())
    }
}

/// Concurrent hypergraph store with snapshot-isolated reads.
pub struct KnowledgeStore {
    state: RwLock<StoreState>,
    /// Live snapshot versions → reference count.
    snapshots: Mutex<BTreeMap<u64, usize>>,
}

impl KnowledgeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuild a store from persisted slot records.
    pub(crate) fn from_records(records: Vec<SlotRecord>, version: u64) -> StoreResult<Self> {
        let arena = Arena::from_records(records, version)?;
        let mut state = StoreState {
            arena,
            version,
            ..StoreState::default()
        };
        let atoms: Vec<Atom> = state.arena.live_atoms().cloned().collect();
        for atom in &atoms {
            if let Some(target) = atom
                .outgoing
                .iter()
                .find(|t| state.arena.live(**t).is_none())
            {
                return Err(StoreError::Serialization {
                    message: format!("{} refers to missing target {target}", atom.handle),
                });
            }
            state.link(atom);
        }
        Ok(Self {
            state: RwLock::new(state),
            snapshots: Mutex::new(BTreeMap::new()),
        })
    }

    /// Persisted view of every slot plus the current version.
    pub(crate) fn records(&self) -> StoreResult<(Vec<SlotRecord>, u64)> {
        let state = self.read()?;
        Ok((state.arena.records(), state.version))
    }

    pub(crate) fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StoreError::Corrupted {
            message: "store lock poisoned".into(),
        })
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StoreError::Corrupted {
            message: "store lock poisoned".into(),
        })
    }

    pub(crate) fn snapshots(&self) -> StoreResult<MutexGuard<'_, BTreeMap<u64, usize>>> {
        self.snapshots.lock().map_err(|_| StoreError::Corrupted {
            message: "snapshot registry poisoned".into(),
        })
    }

    fn oldest_snapshot(&self) -> StoreResult<Option<u64>> {
        Ok(self.snapshots()?.keys().next().copied())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Resolve a handle to its atom.
    pub fn lookup(&self, handle: Handle) -> StoreResult<Atom> {
        let state = self.read()?;
        state
            .arena
            .live(handle)
            .cloned()
            .ok_or(StoreError::NotFound { handle })
    }

    /// Whether the handle names a live atom.
    pub fn contains(&self, handle: Handle) -> StoreResult<bool> {
        Ok(self.read()?.arena.live(handle).is_some())
    }

    /// Find the live atom structurally equal to `spec`, without asserting it.
    pub fn find(&self, spec: &AtomSpec) -> StoreResult<Option<Handle>> {
        let state = self.read()?;
        Ok(state.index.get(&spec.key()).copied())
    }

    /// Live links whose outgoing set contains `handle`.
    pub fn incoming(&self, handle: Handle) -> StoreResult<Vec<Handle>> {
        let state = self.read()?;
        if state.arena.live(handle).is_none() {
            return Err(StoreError::NotFound { handle });
        }
        Ok(state
            .incoming
            .get(&handle)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Start a lazy query over the current version.
    ///
    /// The query sees exactly the atoms live right now that match `pattern`,
    /// even if they are retracted or new atoms arrive while it is iterated.
    /// Calling `query` again re-executes against the then-current state.
    pub fn query(&self, pattern: &Pattern) -> StoreResult<Query<'_>> {
        let state = self.read()?;
        let guard = SnapshotGuard::register(self, state.version)?;
        let candidates = state.candidates(pattern);
        drop(state);
        Ok(Query::new(guard, pattern.clone(), candidates))
    }

    /// Pin the current version for several consistent reads.
    pub fn snapshot(&self) -> StoreResult<Snapshot<'_>> {
        let state = self.read()?;
        let guard = SnapshotGuard::register(self, state.version)?;
        drop(state);
        Ok(Snapshot::new(guard))
    }

    /// Number of live atoms.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.index.len())
    }

    /// Whether the store holds no live atoms.
    pub fn is_empty(&self) -> StoreResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Version of the last committed write.
    pub fn version(&self) -> StoreResult<u64> {
        Ok(self.read()?.version)
    }

    /// Current counters.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.read()?;
        let snapshots = self.snapshots()?.values().sum();
        Ok(StoreStats {
            live: state.index.len(),
            retracted: state.arena.pending_count(),
            revisions: state.arena.revision_count(),
            slots: state.arena.slot_count(),
            version: state.version,
            snapshots,
        })
    }

    /// Clone of every live atom, in slot order.
    pub fn atoms(&self) -> StoreResult<Vec<Atom>> {
        let state = self.read()?;
        Ok(state.arena.live_atoms().cloned().collect())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert an atom, or return the existing handle of a structurally equal one.
    ///
    /// Fails with [`StoreError::DanglingReference`] without touching the store
    /// if any outgoing target is not live. On a repeat assertion the stored
    /// truth value is replaced only by a more confident one; that replacement
    /// is a write of its own, so snapshots taken before it keep the old value.
    pub fn assert(&self, spec: AtomSpec) -> StoreResult<Handle> {
        let mut state = self.write()?;

        if let Some(target) = spec
            .outgoing
            .iter()
            .find(|t| state.arena.live(**t).is_none())
        {
            return Err(StoreError::DanglingReference { target: *target });
        }

        let existing = state.index.get(&spec.key()).copied();
        if let Some(existing) = existing {
            let mut truth = state
                .arena
                .live(existing)
                .map(|atom| atom.truth)
                .ok_or(StoreError::Corrupted {
                    message: format!("index names dead atom {existing}"),
                })?;
            if truth.merge(spec.truth) {
                state.arena.reclaim(self.oldest_snapshot()?);
                let version = state.version + 1;
                state.arena.revise(existing, truth, version);
                state.version = version;
                tracing::trace!(handle = %existing, version, "truth value merged");
            }
            return Ok(existing);
        }

        let freed = state.arena.reclaim(self.oldest_snapshot()?);
        if freed > 0 {
            tracing::trace!(freed, "recycled retracted slots");
        }

        let version = state.version + 1;
        let handle = state.arena.allocate(spec, version)?;
        let atom = state
            .arena
            .live(handle)
            .cloned()
            .ok_or(StoreError::Corrupted {
                message: format!("freshly allocated {handle} is not live"),
            })?;
        state.link(&atom);
        state.version = version;
        Ok(handle)
    }

    /// Retract an atom and every link that (transitively) points at it.
    ///
    /// Retracted handles resolve to [`StoreError::NotFound`] from then on and
    /// are never issued again. Snapshots taken earlier keep seeing the atoms.
    pub fn retract(&self, handle: Handle) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.arena.live(handle).is_none() {
            return Err(StoreError::NotFound { handle });
        }

        // Collect the atom and its incoming closure.
        let mut doomed = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if !seen.insert(h) {
                continue;
            }
            doomed.push(h);
            if let Some(links) = state.incoming.get(&h) {
                stack.extend(links.iter().copied());
            }
        }

        let version = state.version + 1;
        for h in &doomed {
            let atom = state.arena.live(*h).cloned();
            if let Some(atom) = atom {
                state.unlink(&atom);
                state.arena.retract(*h, version);
            }
        }
        state.version = version;

        if doomed.len() > 1 {
            tracing::debug!(%handle, cascaded = doomed.len() - 1, "retracted with incoming links");
        }
        Ok(())
    }
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("KnowledgeStore");
        if let Ok(state) = self.state.try_read() {
            d.field("atoms", &state.index.len())
                .field("version", &state.version);
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::TruthValue;

    fn concept(name: &str) -> AtomSpec {
        AtomSpec::node(AtomType::Concept, name)
    }

    #[test]
    fn assert_and_lookup() {
        let store = KnowledgeStore::new();
        let sun = store.assert(concept("sun")).unwrap();
        let atom = store.lookup(sun).unwrap();
        assert_eq!(atom.handle, sun);
        assert_eq!(atom.name.as_deref(), Some("sun"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn assert_is_idempotent() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("sun")).unwrap();
        let version = store.version().unwrap();
        let b = store.assert(concept("sun")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.version().unwrap(), version);
    }

    #[test]
    fn repeat_assert_merges_truth() {
        let store = KnowledgeStore::new();
        let h = store
            .assert(concept("rumour").with_truth(TruthValue::new(0.5, 0.2)))
            .unwrap();
        store
            .assert(concept("rumour").with_truth(TruthValue::new(0.9, 0.1)))
            .unwrap();
        assert!((store.lookup(h).unwrap().truth.strength - 0.5).abs() < f32::EPSILON);
        store
            .assert(concept("rumour").with_truth(TruthValue::new(0.9, 0.7)))
            .unwrap();
        assert!((store.lookup(h).unwrap().truth.strength - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn truth_merge_is_a_versioned_write() {
        let store = KnowledgeStore::new();
        let h = store
            .assert(concept("a").with_truth(TruthValue::new(0.4, 0.1)))
            .unwrap();
        let before = store.version().unwrap();

        let snap = store.snapshot().unwrap();
        let mut confident = store
            .query(&Pattern::any().with_min_confidence(0.5))
            .unwrap();
        store
            .assert(concept("a").with_truth(TruthValue::new(0.9, 0.9)))
            .unwrap();

        assert_eq!(store.version().unwrap(), before + 1);
        assert_eq!(store.lookup(h).unwrap().truth, TruthValue::new(0.9, 0.9));
        // Readers that started earlier keep the old value.
        assert_eq!(confident.next(), None);
        assert_eq!(snap.lookup(h).unwrap().truth, TruthValue::new(0.4, 0.1));
        assert_eq!(store.stats().unwrap().revisions, 1);
        assert_eq!(
            store
                .query(&Pattern::any().with_min_confidence(0.5))
                .unwrap()
                .collect::<Vec<_>>(),
            vec![h]
        );

        // A merge that changes nothing is not a write.
        store
            .assert(concept("a").with_truth(TruthValue::new(0.1, 0.2)))
            .unwrap();
        assert_eq!(store.version().unwrap(), before + 1);

        // The old value is released with the last reader that could see it.
        drop(confident);
        drop(snap);
        store
            .assert(concept("a").with_truth(TruthValue::new(1.0, 1.0)))
            .unwrap();
        assert_eq!(store.stats().unwrap().revisions, 1);
    }

    #[test]
    fn poisoned_lock_is_reported() {
        let store = std::sync::Arc::new(KnowledgeStore::new());
        store.assert(concept("a")).unwrap();
        let poisoner = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _state = poisoner.state.write().unwrap();
            panic!("poison the store lock");
        })
        .join();

        assert!(matches!(store.len(), Err(StoreError::Corrupted { .. })));
        assert!(matches!(store.is_empty(), Err(StoreError::Corrupted { .. })));
        assert!(matches!(
            store.contains(Handle::new(0, 1).unwrap()),
            Err(StoreError::Corrupted { .. })
        ));
    }

    #[test]
    fn dangling_target_rejected_without_mutation() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let ghost = Handle::new(99, 1).unwrap();
        let err = store
            .assert(AtomSpec::link(AtomType::Similarity, vec![a, ghost]))
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { target } if target == ghost));
        assert_eq!(store.len().unwrap(), 1);

        let err = store
            .assert(AtomSpec::link(AtomType::Member, vec![Handle::INVALID]))
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { .. }));
    }

    #[test]
    fn retract_then_lookup_not_found() {
        let store = KnowledgeStore::new();
        let h = store.assert(concept("a")).unwrap();
        store.retract(h).unwrap();
        assert!(matches!(store.lookup(h), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.retract(h), Err(StoreError::NotFound { .. })));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn retracted_handle_never_reissued() {
        let store = KnowledgeStore::new();
        let h = store.assert(concept("a")).unwrap();
        store.retract(h).unwrap();
        let again = store.assert(concept("a")).unwrap();
        assert_ne!(again, h);
        for i in 0..10 {
            assert_ne!(store.assert(concept(&format!("n{i}"))).unwrap(), h);
        }
    }

    #[test]
    fn retract_cascades_to_links() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let b = store.assert(concept("b")).unwrap();
        let ab = store
            .assert(AtomSpec::link(AtomType::Similarity, vec![a, b]))
            .unwrap();
        let meta = store
            .assert(AtomSpec::link(AtomType::List, vec![ab]))
            .unwrap();
        assert_eq!(store.incoming(a).unwrap(), vec![ab]);

        store.retract(a).unwrap();
        assert!(!store.contains(ab).unwrap());
        assert!(!store.contains(meta).unwrap());
        assert!(store.contains(b).unwrap());
        assert!(store.incoming(b).unwrap().is_empty());
    }

    #[test]
    fn query_filters_by_pattern() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let b = store.assert(concept("b")).unwrap();
        let link = store
            .assert(AtomSpec::link(AtomType::Similarity, vec![a, b]))
            .unwrap();

        let concepts: Vec<_> = store
            .query(&Pattern::of_type(AtomType::Concept))
            .unwrap()
            .collect();
        assert_eq!(concepts, vec![a, b]);

        let links: Vec<_> = store.query(&Pattern::any().with_arity(2)).unwrap().collect();
        assert_eq!(links, vec![link]);

        assert_eq!(store.query(&Pattern::any()).unwrap().count(), 3);
    }

    #[test]
    fn query_ignores_later_asserts() {
        let store = KnowledgeStore::new();
        store.assert(concept("a")).unwrap();
        let mut query = store.query(&Pattern::of_type(AtomType::Concept)).unwrap();
        store.assert(concept("b")).unwrap();
        assert!(query.next().is_some());
        assert!(query.next().is_none());
        // Restarting observes the new state.
        assert_eq!(
            store.query(&Pattern::of_type(AtomType::Concept)).unwrap().count(),
            2
        );
    }

    #[test]
    fn query_still_sees_atoms_retracted_mid_iteration() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let b = store.assert(concept("b")).unwrap();
        let mut query = store.query(&Pattern::of_type(AtomType::Concept)).unwrap();
        store.retract(b).unwrap();
        // Recycling must not hand b's slot to a new atom while the query lives.
        let c = store.assert(concept("c")).unwrap();
        assert_ne!(c.index(), b.index());

        assert_eq!(query.next(), Some(a));
        assert_eq!(query.next(), Some(b));
        assert_eq!(query.lookup(b).unwrap().name.as_deref(), Some("b"));
        assert!(query.lookup(c).is_err());
        assert_eq!(query.next(), None);
        drop(query);

        // Once the query is gone the slot can be reused, with a new generation.
        store.retract(c).unwrap();
        let d = store.assert(concept("d")).unwrap();
        assert!(d != b && d != c);
    }

    #[test]
    fn snapshot_is_frozen() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let snap = store.snapshot().unwrap();
        let b = store.assert(concept("b")).unwrap();
        store.retract(a).unwrap();

        assert_eq!(snap.len().unwrap(), 1);
        assert!(snap.lookup(a).is_ok());
        assert!(snap.lookup(b).is_err());
        let seen: Vec<_> = snap.query(&Pattern::any()).unwrap().collect();
        assert_eq!(seen, vec![a]);
    }

    #[test]
    fn stats_track_snapshots_and_retracted() {
        let store = KnowledgeStore::new();
        let a = store.assert(concept("a")).unwrap();
        let snap = store.snapshot().unwrap();
        store.retract(a).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.retracted, 1);
        assert_eq!(stats.snapshots, 1);
        drop(snap);
        assert_eq!(store.stats().unwrap().snapshots, 0);
    }

    #[test]
    fn find_does_not_insert() {
        let store = KnowledgeStore::new();
        assert_eq!(store.find(&concept("a")).unwrap(), None);
        let a = store.assert(concept("a")).unwrap();
        assert_eq!(store.find(&concept("a")).unwrap(), Some(a));
        assert_eq!(store.len().unwrap(), 1);
    }
}
