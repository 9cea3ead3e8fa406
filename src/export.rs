//! JSON export and import of atoms.
//!
//! An export is a flat list of [`AtomRecord`]s in slot order, so every link
//! comes after its targets. Each record carries a `key`; links name their
//! targets by key. The same format is accepted by [`import_records`], with
//! keys chosen freely by whoever wrote the file: an export can be re-imported
//! into another store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::atom::{AtomSpec, AtomType, TruthValue};
use crate::error::StoreError;
use crate::handle::Handle;
use crate::store::{KnowledgeStore, StoreResult};

/// One atom in export/import form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomRecord {
    /// Record key. Exports use the handle (`h:<index>.<gen>`).
    pub key: String,
    pub atom_type: AtomType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Keys of the outgoing targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<String>,
    #[serde(default)]
    pub truth: TruthValue,
    /// Human-readable rendering with target names resolved (export only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Export every live atom of `store`.
pub fn export_records(store: &KnowledgeStore) -> StoreResult<Vec<AtomRecord>> {
    let snapshot = store.snapshot()?;
    let atoms = snapshot
        .query(&crate::pattern::Pattern::any())?
        .collect::<Vec<Handle>>();

    let mut records = Vec::with_capacity(atoms.len());
    let mut labels: HashMap<Handle, String> = HashMap::new();
    for handle in atoms {
        let atom = snapshot.lookup(handle)?;
        let label = if atom.is_link() {
            let targets: Vec<&str> = atom
                .outgoing
                .iter()
                .map(|t| labels.get(t).map(String::as_str).unwrap_or("?"))
                .collect();
            match &atom.name {
                Some(name) => format!("{}:{name}({})", atom.atom_type, targets.join(", ")),
                None => format!("{}({})", atom.atom_type, targets.join(", ")),
            }
        } else {
            atom.name.clone().unwrap_or_else(|| handle.to_string())
        };
        labels.insert(handle, label.clone());
        records.push(AtomRecord {
            key: handle.to_string(),
            atom_type: atom.atom_type,
            name: atom.name,
            outgoing: atom.outgoing.iter().map(Handle::to_string).collect(),
            truth: atom.truth,
            label: Some(label),
        });
    }
    Ok(records)
}

/// Export every live atom as pretty-printed JSON.
pub fn export_json(store: &KnowledgeStore) -> StoreResult<String> {
    let records = export_records(store)?;
    serde_json::to_string_pretty(&records).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

/// Assert `records` in order, resolving outgoing keys against earlier
/// records. Returns the handle of each record.
///
/// Stops at the first record naming an unknown key. Records asserted before
/// that point stay in the store.
pub fn import_records(store: &KnowledgeStore, records: &[AtomRecord]) -> StoreResult<Vec<Handle>> {
    let mut keys: HashMap<&str, Handle> = HashMap::with_capacity(records.len());
    let mut handles = Vec::with_capacity(records.len());
    for record in records {
        let outgoing = record
            .outgoing
            .iter()
            .map(|key| {
                keys.get(key.as_str())
                    .copied()
                    .ok_or_else(|| StoreError::Serialization {
                        message: format!("record \"{}\" refers to unknown key \"{key}\"", record.key),
                    })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let spec = AtomSpec {
            atom_type: record.atom_type.clone(),
            name: record.name.clone(),
            outgoing,
            truth: record.truth,
        };
        let handle = store.assert(spec)?;
        keys.insert(record.key.as_str(), handle);
        handles.push(handle);
    }
    Ok(handles)
}

/// Parse a JSON array of records and import it.
pub fn import_json(store: &KnowledgeStore, json: &str) -> StoreResult<Vec<Handle>> {
    let records: Vec<AtomRecord> =
        serde_json::from_str(json).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
    import_records(store, &records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_labels_links() {
        let store = KnowledgeStore::new();
        let cat = store.assert(AtomSpec::node(AtomType::Concept, "cat")).unwrap();
        let animal = store
            .assert(AtomSpec::node(AtomType::Concept, "animal"))
            .unwrap();
        store
            .assert(AtomSpec::link(AtomType::Inheritance, vec![cat, animal]))
            .unwrap();

        let records = export_records(&store).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].label.as_deref(), Some("Inheritance(cat, animal)"));
        assert_eq!(records[2].outgoing, vec![cat.to_string(), animal.to_string()]);
    }

    #[test]
    fn exported_json_reimports() {
        let source = KnowledgeStore::new();
        let a = source.assert(AtomSpec::node(AtomType::Concept, "a")).unwrap();
        let b = source
            .assert(AtomSpec::node(AtomType::Concept, "b").with_truth(TruthValue::new(0.3, 0.9)))
            .unwrap();
        source
            .assert(AtomSpec::link(AtomType::Similarity, vec![a, b]))
            .unwrap();
        let json = export_json(&source).unwrap();

        let target = KnowledgeStore::new();
        let handles = import_json(&target, &json).unwrap();
        assert_eq!(handles.len(), 3);
        assert_eq!(target.len().unwrap(), 3);
        assert_eq!(target.lookup(handles[1]).unwrap().truth, TruthValue::new(0.3, 0.9));
        assert_eq!(target.incoming(handles[0]).unwrap(), vec![handles[2]]);
    }

    #[test]
    fn import_rejects_unknown_keys() {
        let store = KnowledgeStore::new();
        let json = r#"[
            {"key": "x", "atom_type": "Concept", "name": "x"},
            {"key": "l", "atom_type": "Similarity", "outgoing": ["x", "y"]}
        ]"#;
        let err = import_json(&store, json).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
        assert_eq!(store.len().unwrap(), 1);
    }
}
