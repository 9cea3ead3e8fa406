//! ACID-durable store image backed by redb.
//!
//! The image holds one record per arena slot, keyed by slot index, so a
//! reloaded store hands back exactly the handles (index and generation) it
//! issued before. Each [`DurableImage::save`] replaces the whole image in a
//! single write transaction: a crash mid-save leaves the previous image.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, TableError};

use crate::error::StoreError;
use crate::store::arena::SlotRecord;
use crate::store::{KnowledgeStore, StoreResult};

/// Slot index → bincode-encoded [`SlotRecord`].
const SLOTS_TABLE: TableDefinition<u32, &[u8]> = TableDefinition::new("slots");

/// Image metadata (`version`, `slots`, `format`).
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const FORMAT_VERSION: u64 = 1;

fn redb_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

/// A persisted knowledge store on disk.
pub struct DurableImage {
    db: Arc<Database>,
    path: PathBuf,
}

impl DurableImage {
    /// Open or create an image in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let path = data_dir.join("mindgraph.redb");
        let db = Database::create(&path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", path.display()),
        })?;
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the image with the current state of `store`.
    pub fn save(&self, store: &KnowledgeStore) -> StoreResult<()> {
        let (records, version) = store.records()?;

        let txn = self
            .db
            .begin_write()
            .map_err(redb_err("begin_write"))?;
        txn.delete_table(SLOTS_TABLE)
            .map_err(redb_err("delete_table"))?;
        {
            let mut slots = txn
                .open_table(SLOTS_TABLE)
                .map_err(redb_err("open_table"))?;
            for (index, record) in records.iter().enumerate() {
                let bytes = bincode::serialize(record).map_err(|e| StoreError::Serialization {
                    message: format!("failed to encode slot {index}: {e}"),
                })?;
                slots
                    .insert(index as u32, bytes.as_slice())
                    .map_err(redb_err("insert"))?;
            }

            let mut meta = txn
                .open_table(META_TABLE)
                .map_err(redb_err("open_table"))?;
            meta.insert("format", FORMAT_VERSION)
                .map_err(redb_err("insert"))?;
            meta.insert("version", version)
                .map_err(redb_err("insert"))?;
            meta.insert("slots", records.len() as u64)
                .map_err(redb_err("insert"))?;
        }
        txn.commit().map_err(redb_err("commit"))?;

        tracing::debug!(slots = records.len(), version, "store image saved");
        Ok(())
    }

    /// Load the stored image. Returns `Ok(None)` if nothing was ever saved.
    pub fn load(&self) -> StoreResult<Option<KnowledgeStore>> {
        let txn = self
            .db
            .begin_read()
            .map_err(redb_err("begin_read"))?;

        let meta = match txn.open_table(META_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(redb_err("open_table")(e)),
        };
        let read_meta = |key: &str| -> StoreResult<Option<u64>> {
            Ok(meta
                .get(key)
                .map_err(redb_err("get"))?
                .map(|guard| guard.value()))
        };

        let format = read_meta("format")?.unwrap_or(0);
        if format != FORMAT_VERSION {
            return Err(StoreError::Serialization {
                message: format!("unsupported image format {format}"),
            });
        }
        let version = read_meta("version")?.unwrap_or(0);
        let expected = read_meta("slots")?.unwrap_or(0);

        let slots = txn
            .open_table(SLOTS_TABLE)
            .map_err(redb_err("open_table"))?;
        let mut records = Vec::with_capacity(expected as usize);
        for entry in slots.iter().map_err(redb_err("iter"))? {
            let (key, value) = entry.map_err(redb_err("iter"))?;
            let index = key.value();
            if index as usize != records.len() {
                return Err(StoreError::Serialization {
                    message: format!("slot {index} out of sequence"),
                });
            }
            let record: SlotRecord =
                bincode::deserialize(value.value()).map_err(|e| StoreError::Serialization {
                    message: format!("failed to decode slot {index}: {e}"),
                })?;
            records.push(record);
        }
        if records.len() as u64 != expected {
            return Err(StoreError::Serialization {
                message: format!("image lists {expected} slots but holds {}", records.len()),
            });
        }

        let store = KnowledgeStore::from_records(records, version)?;
        tracing::debug!(atoms = store.len()?, version, "store image loaded");
        Ok(Some(store))
    }

    /// Load the stored image, or start an empty store.
    pub fn load_or_new(&self) -> StoreResult<KnowledgeStore> {
        Ok(self.load()?.unwrap_or_default())
    }
}

impl std::fmt::Debug for DurableImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableImage")
            .field("path", &self.path)
            .finish()
    }
}
