//! # Cryptographic Primitives
//!
//! Everything the engine derives from secrets flows through here:
//!
//! - **hash**: BLAKE3 with domain separation, mapped into the BN254 scalar
//!   field for nullifiers, commitments, and public signals.
//! - **identity**: the identity secret, zeroized and never printed.
//! - **keys**: Ed25519 prover keys used by the local proof backend.
//!
//! Everything here is a thin, type-safe wrapper around audited
//! implementations. We don't roll our own.

pub mod hash;
pub mod identity;
pub mod keys;

pub use hash::{commit_content, derive_nullifier, group_element};
pub use identity::IdentitySecret;
pub use keys::{ProverKeypair, ProverPublicKey};
