//! In-process anchoring store.
//!
//! "Check pair, decide, write record" runs under one mutex, which gives the
//! single-process version of the anchoring guarantees. With a store
//! attached every record is also written through sled's unique-key insert
//! and replayed on construction, so a restart keeps the set of used pairs.
//!
//! [`StubAnchor::prune_before`] drops whole epochs once no verifier can
//! accept a proof for them any more, and raises a floor below which new
//! records are refused.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{reference_for, AnchorOutcome, AnchorRequest, AnchoredRecord, AnchoringAdapter};
use crate::error::{RlnError, RlnResult};
use crate::storage::RlnDb;
use crate::types::{Epoch, Nullifier};

#[derive(Debug, Default)]
struct Records {
    by_pair: HashMap<(Nullifier, Epoch), AnchoredRecord>,
    by_reference: HashMap<String, (Nullifier, Epoch)>,
    /// Oldest epoch still retained.
    floor: Epoch,
}

impl Records {
    fn insert(&mut self, record: AnchoredRecord) {
        let pair = (record.nullifier, record.epoch);
        self.by_reference.insert(record.reference.clone(), pair);
        self.by_pair.insert(pair, record);
    }

    fn prune_before(&mut self, epoch: Epoch) -> usize {
        let before = self.by_pair.len();
        self.by_pair.retain(|(_, e), _| *e >= epoch);
        self.by_reference.retain(|_, (_, e)| *e >= epoch);
        self.floor = self.floor.max(epoch);
        before - self.by_pair.len()
    }
}

/// Guarded-map anchoring adapter.
#[derive(Debug, Default)]
pub struct StubAnchor {
    records: Mutex<Records>,
    store: Option<RlnDb>,
}

impl StubAnchor {
    /// Purely in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store journaled to `db`; existing records are replayed first.
    pub fn with_store(db: RlnDb) -> RlnResult<Self> {
        let mut records = Records::default();
        for record in db.all_anchors()? {
            records.insert(record);
        }
        info!(restored = records.by_pair.len(), "anchor store replayed");
        Ok(Self {
            records: Mutex::new(records),
            store: Some(db),
        })
    }

    /// Number of anchored records.
    pub fn len(&self) -> usize {
        self.records.lock().by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve_existing(
        existing: &AnchoredRecord,
        request: &AnchorRequest,
    ) -> RlnResult<AnchorOutcome> {
        if existing.matches(request) {
            let outcome = existing.outcome_for(request);
            debug!(
                reference = %outcome.reference,
                created = outcome.created,
                "anchor already recorded, returning existing reference"
            );
            return Ok(outcome);
        }
        warn!(
            nullifier = %request.nullifier,
            epoch = request.epoch.0,
            existing = %existing.reference,
            "anchoring conflict: pair already anchored with a different commitment"
        );
        Err(RlnError::AnchoringConflict {
            nullifier: request.nullifier,
            epoch: request.epoch,
            existing_reference: existing.reference.clone(),
        })
    }
}

#[async_trait]
impl AnchoringAdapter for StubAnchor {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn anchor(&self, request: AnchorRequest) -> RlnResult<AnchorOutcome> {
        let mut records = self.records.lock();
        let pair = (request.nullifier, request.epoch);

        if let Some(existing) = records.by_pair.get(&pair) {
            return Self::resolve_existing(existing, &request);
        }
        if request.epoch < records.floor {
            return Err(RlnError::InvalidInput(format!(
                "epoch {} is older than the retained window (from {})",
                request.epoch, records.floor
            )));
        }

        let record = AnchoredRecord {
            reference: reference_for(&request.nullifier, request.epoch),
            request_id: request.request_id.clone(),
            commitment: request.commitment,
            nullifier: request.nullifier,
            epoch: request.epoch,
            proof: request.proof.clone(),
            payload: request.payload.clone(),
            anchored_at: Utc::now(),
        };

        if let Some(store) = &self.store {
            if let Some(on_disk) = store.insert_anchor_unique(&record)? {
                let outcome = Self::resolve_existing(&on_disk, &request);
                records.insert(on_disk);
                return outcome;
            }
        }

        let reference = record.reference.clone();
        info!(
            nullifier = %record.nullifier,
            epoch = record.epoch.0,
            reference = %reference,
            "nullifier anchored"
        );
        records.insert(record);
        Ok(AnchorOutcome {
            reference,
            created: true,
        })
    }

    async fn is_used(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<bool> {
        Ok(self.records.lock().by_pair.contains_key(&(*nullifier, epoch)))
    }

    async fn find(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<Option<AnchoredRecord>> {
        Ok(self.records.lock().by_pair.get(&(*nullifier, epoch)).cloned())
    }

    async fn lookup(&self, reference: &str) -> RlnResult<Option<AnchoredRecord>> {
        let records = self.records.lock();
        Ok(records
            .by_reference
            .get(reference)
            .and_then(|pair| records.by_pair.get(pair))
            .cloned())
    }

    async fn epoch_nullifiers(&self, epoch: Epoch) -> RlnResult<Vec<Nullifier>> {
        Ok(self
            .records
            .lock()
            .by_pair
            .keys()
            .filter(|(_, e)| *e == epoch)
            .map(|(n, _)| *n)
            .collect())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn prune_before(&self, epoch: Epoch) -> RlnResult<usize> {
        let mut records = self.records.lock();
        if epoch <= records.floor {
            return Ok(0);
        }
        let removed = records.prune_before(epoch);
        if let Some(store) = &self.store {
            store.prune_anchors_before(epoch)?;
        }
        if removed > 0 {
            info!(before = epoch.0, removed, "pruned anchored records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::test_request;
    use std::sync::Arc;

    #[tokio::test]
    async fn anchor_is_idempotent() {
        let stub = StubAnchor::new();
        let first = stub.anchor(test_request(1, 5, 9)).await.unwrap();
        let second = stub.anchor(test_request(1, 5, 9)).await.unwrap();
        assert_eq!(first, second);
        assert!(second.created);
        assert_eq!(stub.len(), 1);
        assert!(stub.is_used(&Nullifier([1; 32]), Epoch(5)).await.unwrap());
        assert!(!stub.is_used(&Nullifier([1; 32]), Epoch(6)).await.unwrap());
    }

    #[tokio::test]
    async fn different_commitment_conflicts() {
        let stub = StubAnchor::new();
        let reference = stub.anchor(test_request(1, 5, 9)).await.unwrap().reference;
        match stub.anchor(test_request(1, 5, 8)).await {
            Err(RlnError::AnchoringConflict { existing_reference, .. }) => {
                assert_eq!(existing_reference, reference)
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lookup_and_epoch_listing() {
        let stub = StubAnchor::new();
        let reference = stub.anchor(test_request(1, 5, 9)).await.unwrap().reference;
        stub.anchor(test_request(2, 5, 9)).await.unwrap();
        stub.anchor(test_request(3, 6, 9)).await.unwrap();

        let record = stub.lookup(&reference).await.unwrap().unwrap();
        assert_eq!(stub.find(&Nullifier([1; 32]), Epoch(5)).await.unwrap(), Some(record.clone()));
        assert_eq!(record.nullifier, Nullifier([1; 32]));
        assert_eq!(record.payload, b"report".to_vec());
        assert!(stub.lookup("anchor-missing").await.unwrap().is_none());

        let mut in_five = stub.epoch_nullifiers(Epoch(5)).await.unwrap();
        in_five.sort();
        assert_eq!(in_five, vec![Nullifier([1; 32]), Nullifier([2; 32])]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_anchors_produce_one_record() {
        let stub = Arc::new(StubAnchor::new());
        let tasks: Vec<_> = (0..16u8)
            .map(|i| {
                let stub = Arc::clone(&stub);
                // Half the callers anchor the same content, half different content.
                let request = AnchorRequest {
                    request_id: format!("caller-{i}"),
                    ..test_request(7, 1, i % 2)
                };
                tokio::spawn(async move { stub.anchor(request).await })
            })
            .collect();

        let mut references = Vec::new();
        let mut created = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) => {
                    created += usize::from(outcome.created);
                    references.push(outcome.reference);
                }
                Err(RlnError::AnchoringConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        references.dedup();
        assert_eq!(references.len(), 1);
        assert_eq!(created, 1);
        assert_eq!(conflicts, 8);
        assert_eq!(stub.len(), 1);
    }

    #[tokio::test]
    async fn store_replays_on_restart() {
        let db = RlnDb::open_temporary().unwrap();
        let reference = {
            let stub = StubAnchor::with_store(db.clone()).unwrap();
            stub.anchor(test_request(4, 2, 1)).await.unwrap().reference
        };
        let restarted = StubAnchor::with_store(db).unwrap();
        assert!(restarted.is_used(&Nullifier([4; 32]), Epoch(2)).await.unwrap());
        assert_eq!(restarted.anchor(test_request(4, 2, 1)).await.unwrap().reference, reference);
        assert!(restarted.anchor(test_request(4, 2, 2)).await.is_err());
    }

    #[tokio::test]
    async fn pruning_drops_old_epochs_everywhere() {
        let db = RlnDb::open_temporary().unwrap();
        let stub = StubAnchor::with_store(db.clone()).unwrap();
        let old = stub.anchor(test_request(1, 4, 1)).await.unwrap().reference;
        stub.anchor(test_request(2, 5, 1)).await.unwrap();
        stub.anchor(test_request(3, 6, 1)).await.unwrap();

        assert_eq!(stub.prune_before(Epoch(5)).await.unwrap(), 1);
        assert_eq!(stub.len(), 2);
        assert!(stub.lookup(&old).await.unwrap().is_none());
        assert!(!stub.is_used(&Nullifier([1; 32]), Epoch(4)).await.unwrap());
        assert_eq!(db.all_anchors().unwrap().len(), 2);

        // Below the floor nothing new is recorded; pruning again is a no-op.
        assert!(matches!(
            stub.anchor(test_request(9, 4, 1)).await,
            Err(RlnError::InvalidInput(_))
        ));
        assert_eq!(stub.prune_before(Epoch(5)).await.unwrap(), 0);
        assert!(stub.anchor(test_request(9, 5, 1)).await.unwrap().created);
    }
}
