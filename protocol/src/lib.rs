// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # RLN Protocol: Core Library
//!
//! Rate-limiting nullifiers for anonymous groups: members send messages and
//! file reports without revealing who they are, and still cannot spam or
//! double-submit. Each identity gets a fixed budget per epoch, enforced by a
//! nullifier that is deterministic per `(secret, epoch)` and unlinkable
//! across epochs.
//!
//! ## Architecture
//!
//! - **crypto**: BLAKE3 + BN254 field hashing, identity secrets, prover keys.
//! - **epoch**: wall-clock to epoch index. Always re-sampled, never cached.
//! - **ledger**: per-epoch nullifier counters. The local authority on
//!   rate-limit and replay decisions.
//! - **proof**: pluggable proof backends: embedded (local) or a remote
//!   proof service.
//! - **engine**: `send` / `verify` orchestration over the three above.
//! - **anchor**: durable cross-process record of used nullifiers: an
//!   in-process stub or an external JSON-RPC ledger.
//! - **service**: reports: engine + anchoring with an explicit anchor mode.
//! - **storage**: sled persistence for the ledger journal and anchors.
//! - **config**: tunables, protocol constants, backend selection.
//!
//! ## Ground rules
//!
//! 1. Backends are chosen once, from configuration. Nothing downgrades
//!    silently.
//! 2. Identity secrets never reach a log line.
//! 3. Every check-then-write on shared state is one critical section.
//! 4. Budget is consumed only by a proof that exists.

pub mod anchor;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod ledger;
pub mod proof;
pub(crate) mod retry;
pub mod service;
pub mod storage;
pub mod types;

pub use engine::{RlnEngine, RlnProof, Verdict};
pub use error::{RlnError, RlnResult};
