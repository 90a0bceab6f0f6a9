//! # RlnDb: Persistent Storage Engine
//!
//! The persistence layer for the nullifier ledger and the in-process
//! anchoring store, built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree             | Key                                   | Value                     |
//! |------------------|---------------------------------------|---------------------------|
//! | `ledger_journal` | `epoch` (8B BE) ‖ `nullifier` (32B) ‖ `count` (4B BE) | admission time (8B BE ms) |
//! | `anchors`        | `epoch` (8B BE) ‖ `nullifier` (32B)   | `bincode(AnchoredRecord)` |
//!
//! Both trees lead with the epoch, stored big-endian so that sled's
//! lexicographic ordering matches numeric ordering. That makes "every
//! admission in epoch N" a prefix scan and "everything before epoch N" a
//! range scan.
//!
//! The journal is append-only: an admission writes a new key carrying the
//! post-admission count rather than overwriting a counter. Replay takes the
//! highest count per nullifier. Appends are not flushed individually;
//! the ledger calls [`RlnDb::flush`] once its lock is released.
//!
//! ## Uniqueness
//!
//! Anchors are inserted with `compare_and_swap(key, None, value)`, which is
//! sled's unique-key constraint: a second record for the same
//! `(nullifier, epoch)` can never land on disk.

use std::collections::HashMap;
use std::path::Path;

use sled::{Db, Tree};

use crate::anchor::AnchoredRecord;
use crate::types::{Epoch, Nullifier};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt entry in `{tree}`: {detail}")]
    Corrupt { tree: &'static str, detail: String },
}

pub type DbResult<T> = Result<T, DbError>;

const JOURNAL_KEY_LEN: usize = 8 + 32 + 4;
const ANCHOR_KEY_LEN: usize = 8 + 32;

// ---------------------------------------------------------------------------
// RlnDb
// ---------------------------------------------------------------------------

/// Persistent storage for ledger admissions and anchored records.
///
/// sled trees support concurrent readers and serialized writers, so an
/// `RlnDb` can be cloned and shared across components freely.
#[derive(Debug, Clone)]
pub struct RlnDb {
    db: Db,
    journal: Tree,
    anchors: Tree,
}

impl RlnDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in a temp location and disappears on drop.
    /// Ideal for unit tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            journal: db.open_tree("ledger_journal")?,
            anchors: db.open_tree("anchors")?,
            db,
        })
    }

    // -- Ledger journal -----------------------------------------------------

    /// Append one admission: `nullifier` reached `count` in `epoch`.
    pub fn append_admission(
        &self,
        epoch: Epoch,
        nullifier: &Nullifier,
        count: u32,
        at_millis: u64,
    ) -> DbResult<()> {
        let mut key = Vec::with_capacity(JOURNAL_KEY_LEN);
        key.extend_from_slice(&epoch.to_be_bytes());
        key.extend_from_slice(nullifier.as_bytes());
        key.extend_from_slice(&count.to_be_bytes());
        self.journal.insert(key, &at_millis.to_be_bytes())?;
        Ok(())
    }

    /// Force buffered writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Replay the journal for one epoch: highest recorded count per nullifier.
    pub fn epoch_counts(&self, epoch: Epoch) -> DbResult<HashMap<Nullifier, u32>> {
        let mut counts: HashMap<Nullifier, u32> = HashMap::new();
        for item in self.journal.scan_prefix(epoch.to_be_bytes()) {
            let (key, _) = item?;
            if key.len() != JOURNAL_KEY_LEN {
                return Err(DbError::Corrupt {
                    tree: "ledger_journal",
                    detail: format!("key length {}", key.len()),
                });
            }
            let mut nullifier = [0u8; 32];
            nullifier.copy_from_slice(&key[8..40]);
            let mut count = [0u8; 4];
            count.copy_from_slice(&key[40..44]);
            let count = u32::from_be_bytes(count);
            let slot = counts.entry(Nullifier(nullifier)).or_insert(0);
            *slot = (*slot).max(count);
        }
        Ok(counts)
    }

    /// Delete every journal entry older than `epoch`. Returns how many
    /// entries were removed.
    pub fn prune_journal_before(&self, epoch: Epoch) -> DbResult<usize> {
        self.prune_before(&self.journal, epoch)
    }

    fn prune_before(&self, tree: &Tree, epoch: Epoch) -> DbResult<usize> {
        let mut removed = 0;
        for item in tree.range(..epoch.to_be_bytes().to_vec()) {
            let (key, _) = item?;
            tree.remove(key)?;
            removed += 1;
        }
        if removed > 0 {
            self.db.flush()?;
        }
        Ok(removed)
    }

    // -- Anchors ------------------------------------------------------------

    fn anchor_key(nullifier: &Nullifier, epoch: Epoch) -> [u8; ANCHOR_KEY_LEN] {
        let mut key = [0u8; ANCHOR_KEY_LEN];
        key[..8].copy_from_slice(&epoch.to_be_bytes());
        key[8..].copy_from_slice(nullifier.as_bytes());
        key
    }

    /// Insert an anchored record unless one exists for its pair.
    ///
    /// Returns `Ok(None)` when the record was written, or the record already
    /// on disk when the pair was taken.
    pub fn insert_anchor_unique(&self, record: &AnchoredRecord) -> DbResult<Option<AnchoredRecord>> {
        let key = Self::anchor_key(&record.nullifier, record.epoch);
        let bytes =
            bincode::serialize(record).map_err(|e| DbError::Serialization(e.to_string()))?;

        match self.anchors.compare_and_swap(key, None as Option<&[u8]>, Some(bytes))? {
            Ok(()) => {
                self.db.flush()?;
                Ok(None)
            }
            Err(cas) => {
                let existing = cas.current.ok_or_else(|| DbError::Corrupt {
                    tree: "anchors",
                    detail: "compare_and_swap failed without a current value".into(),
                })?;
                Ok(Some(Self::decode_anchor(&existing)?))
            }
        }
    }

    /// Delete every anchored record older than `epoch`.
    pub fn prune_anchors_before(&self, epoch: Epoch) -> DbResult<usize> {
        self.prune_before(&self.anchors, epoch)
    }

    /// Every anchored record, for startup replay.
    pub fn all_anchors(&self) -> DbResult<Vec<AnchoredRecord>> {
        let mut records = Vec::with_capacity(self.anchors.len());
        for item in self.anchors.iter() {
            let (_, value) = item?;
            records.push(Self::decode_anchor(&value)?);
        }
        Ok(records)
    }

    fn decode_anchor(bytes: &[u8]) -> DbResult<AnchoredRecord> {
        bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
    }
}
