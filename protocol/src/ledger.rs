//! Per-epoch nullifier ledger.
//!
//! The ledger is the local authority for rate-limit and replay decisions.
//! It tracks exactly one epoch window at a time:
//!
//! ```text
//!   Empty(e) ──admit──▶ Populated(e, entries) ──admit(e' > e)──▶ Empty(e') ──▶ ...
//! ```
//!
//! Moving to a newer epoch discards every entry of the previous window
//! before any decision is made. Entries from an older window are never
//! consulted.
//!
//! ## Concurrency
//!
//! "Read count, decide, write count" is one critical section under a
//! `parking_lot::Mutex`. Two callers racing for the last slot of the same
//! nullifier are serialized: the first to take the lock wins it, the second
//! gets `RateLimitExceeded`.
//!
//! ## Durability
//!
//! With an [`RlnDb`] attached, every admission is appended to the journal
//! inside the critical section, before the in-memory counter moves, and
//! flushed after the lock is released but before `admit` returns. On
//! construction the journal for the current epoch is replayed, so a restart
//! does not hand out a fresh budget.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReplayPolicy;
use crate::error::{RlnError, RlnResult};
use crate::storage::RlnDb;
use crate::types::{Epoch, Nullifier};

/// Point-in-time view of the tracked window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub epoch: Epoch,
    pub active_nullifiers: usize,
    pub total_messages: u64,
}

#[derive(Debug)]
struct Window {
    epoch: Epoch,
    entries: HashMap<Nullifier, u32>,
}

impl Window {
    fn empty(epoch: Epoch) -> Self {
        Self {
            epoch,
            entries: HashMap::new(),
        }
    }
}

/// Nullifier ledger for one engine instance.
#[derive(Debug)]
pub struct NullifierLedger {
    window: Mutex<Window>,
    max_per_epoch: u32,
    policy: ReplayPolicy,
    journal: Option<RlnDb>,
}

impl NullifierLedger {
    /// In-memory ledger starting at `epoch`.
    pub fn new(max_per_epoch: u32, policy: ReplayPolicy, epoch: Epoch) -> Self {
        Self {
            window: Mutex::new(Window::empty(epoch)),
            max_per_epoch,
            policy,
            journal: None,
        }
    }

    /// Journaled ledger. Replays the admissions recorded for `epoch` and
    /// prunes older windows before returning.
    pub fn with_journal(
        max_per_epoch: u32,
        policy: ReplayPolicy,
        epoch: Epoch,
        db: RlnDb,
    ) -> RlnResult<Self> {
        let entries = db.epoch_counts(epoch)?;
        let pruned = db.prune_journal_before(epoch)?;
        info!(
            epoch = epoch.0,
            restored = entries.len(),
            pruned,
            "nullifier ledger replayed from journal"
        );
        Ok(Self {
            window: Mutex::new(Window { epoch, entries }),
            max_per_epoch,
            policy,
            journal: Some(db),
        })
    }

    pub fn max_per_epoch(&self) -> u32 {
        self.max_per_epoch
    }

    pub fn policy(&self) -> ReplayPolicy {
        self.policy
    }

    /// Admit one use of `nullifier` in `epoch`. Returns the post-admission
    /// count.
    ///
    /// `epoch` must be the reading the caller derived the nullifier from.
    /// A reading older than the tracked window fails with `EpochExpired`.
    pub fn admit(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<u32> {
        let next = {
            let mut window = self.window.lock();
            self.roll_forward(&mut window, epoch)?;

            let count = window.entries.get(nullifier).copied().unwrap_or(0);
            self.decide(nullifier, epoch, count)?;

            let next = count + 1;
            if let Some(db) = &self.journal {
                let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
                db.append_admission(epoch, nullifier, next, now)?;
            }
            window.entries.insert(*nullifier, next);
            next
        };

        // Durable before returning, flushed outside the critical section.
        if let Some(db) = &self.journal {
            db.flush()?;
        }

        debug!(nullifier = %nullifier, epoch = epoch.0, count = next, "nullifier admitted");
        Ok(next)
    }

    /// The same decision `admit` would make, without recording anything.
    /// Returns the current count.
    pub fn check(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<u32> {
        let mut window = self.window.lock();
        self.roll_forward(&mut window, epoch)?;
        let count = window.entries.get(nullifier).copied().unwrap_or(0);
        self.decide(nullifier, epoch, count)?;
        Ok(count)
    }

    /// Messages `nullifier` may still send in `epoch`.
    ///
    /// A reading older than the tracked window has nothing left.
    pub fn remaining(&self, nullifier: &Nullifier, epoch: Epoch) -> u32 {
        let mut window = self.window.lock();
        if self.roll_forward(&mut window, epoch).is_err() {
            return 0;
        }
        let count = window.entries.get(nullifier).copied().unwrap_or(0);
        match self.policy {
            ReplayPolicy::SingleUse if count > 0 => 0,
            _ => self.max_per_epoch.saturating_sub(count),
        }
    }

    /// Snapshot of the window as of `epoch`, rolling forward first.
    pub fn snapshot(&self, epoch: Epoch) -> LedgerSnapshot {
        let mut window = self.window.lock();
        // An older reading reports the window as it stands.
        let _ = self.roll_forward(&mut window, epoch);
        LedgerSnapshot {
            epoch: window.epoch,
            active_nullifiers: window.entries.len(),
            total_messages: window.entries.values().map(|c| u64::from(*c)).sum(),
        }
    }

    /// Resolve staleness before any decision: a newer epoch clears the
    /// window, an older one is refused.
    fn roll_forward(&self, window: &mut Window, epoch: Epoch) -> RlnResult<()> {
        if epoch < window.epoch {
            return Err(RlnError::EpochExpired {
                epoch,
                current: window.epoch,
            });
        }
        if epoch > window.epoch {
            let discarded = window.entries.len();
            *window = Window::empty(epoch);
            debug!(epoch = epoch.0, discarded, "ledger rolled over to new epoch");
            if let Some(db) = &self.journal {
                if let Err(e) = db.prune_journal_before(epoch) {
                    // The window is already clear in memory; stale journal
                    // entries are never replayed for a newer epoch.
                    warn!(error = %e, "failed to prune ledger journal");
                }
            }
        }
        Ok(())
    }

    fn decide(&self, nullifier: &Nullifier, epoch: Epoch, count: u32) -> RlnResult<()> {
        if count >= self.max_per_epoch {
            info!(nullifier = %nullifier, epoch = epoch.0, limit = self.max_per_epoch, "rate limit exceeded");
            return Err(RlnError::RateLimitExceeded {
                nullifier: *nullifier,
                epoch,
                limit: self.max_per_epoch,
            });
        }
        if count > 0 && self.policy == ReplayPolicy::SingleUse {
            warn!(nullifier = %nullifier, epoch = epoch.0, "nullifier replay under single-use policy");
            return Err(RlnError::NullifierReplay {
                nullifier: *nullifier,
                epoch,
            });
        }
        Ok(())
    }
}
