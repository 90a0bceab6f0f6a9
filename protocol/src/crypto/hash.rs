//! # Hash & Commitment Primitive
//!
//! The one-way functions every nullifier and commitment is built from.
//! The engine only relies on three properties: determinism, collision
//! resistance, and irreversibility. BLAKE3 provides all three; we then map
//! its output into the BN254 scalar field so the same values can be fed to
//! an arithmetic circuit as public signals without any re-encoding.
//!
//! ## Domain separation
//!
//! Nullifiers, content commitments, and group identifiers each hash under
//! their own BLAKE3 `derive_key` context. A nullifier can therefore never
//! collide with a commitment of some crafted content, even if the byte
//! inputs happen to coincide.
//!
//! ## Field encoding
//!
//! Field elements travel as their 32-byte canonical little-endian
//! serialization. Decoding goes through `ark-serialize` with validation,
//! which rejects any value at or above the field modulus. Every encoding
//! therefore has exactly one decoding and vice versa.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::CanonicalDeserialize;

use super::identity::IdentitySecret;
use crate::types::{Commitment, Epoch, GroupId, Nullifier};

/// `derive_key` context for nullifiers. Changing it invalidates every
/// nullifier ever issued.
pub const NULLIFIER_CONTEXT: &str = "rln-gate 2026-01-01 nullifier v1";

/// `derive_key` context for content commitments.
pub const CONTENT_CONTEXT: &str = "rln-gate 2026-01-01 content commitment v1";

/// `derive_key` context for group identifiers.
pub const GROUP_CONTEXT: &str = "rln-gate 2026-01-01 group id v1";

/// Hash multiple byte slices together without concatenating them first.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 using the built-in `derive_key` mode.
///
/// Don't prepend a tag manually. `derive_key` uses a different internal IV
/// per context string, which makes cross-context collisions impossible by
/// construction.
pub fn domain_separated_hash(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Canonical 32-byte little-endian encoding of a field element.
pub fn field_to_bytes(value: &Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = value.into_bigint().to_bytes_le();
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Decode a canonical field element. Non-canonical encodings (values at or
/// above the modulus) yield `None`.
pub fn field_from_bytes(bytes: &[u8; 32]) -> Option<Fr> {
    Fr::deserialize_compressed(&bytes[..]).ok()
}

/// Reduce a BLAKE3 digest modulo `r`. The 256-bit digest against a
/// ~254-bit modulus keeps the bias negligible.
fn digest_to_field_bytes(digest: [u8; 32]) -> [u8; 32] {
    field_to_bytes(&Fr::from_le_bytes_mod_order(&digest))
}

/// Derive the nullifier of `secret` for `epoch`.
///
/// Same identity and epoch always give the same nullifier. Different epochs
/// give unrelated nullifiers. Nothing about the secret can be recovered
/// from the output.
pub fn derive_nullifier(secret: &IdentitySecret, epoch: Epoch) -> Nullifier {
    let digest = domain_separated_hash(
        NULLIFIER_CONTEXT,
        &[secret.expose_secret(), &epoch.to_be_bytes()],
    );
    Nullifier(digest_to_field_bytes(digest))
}

/// Commit to opaque content. The engine never inspects content semantics.
pub fn commit_content(content: &[u8]) -> Commitment {
    let digest = domain_separated_hash(CONTENT_CONTEXT, &[content]);
    Commitment(digest_to_field_bytes(digest))
}

/// Field encoding of a group identifier.
pub fn group_element(group: &GroupId) -> [u8; 32] {
    let digest = domain_separated_hash(GROUP_CONTEXT, &[group.as_str().as_bytes()]);
    digest_to_field_bytes(digest)
}

/// Field encoding of an epoch index.
pub fn epoch_element(epoch: Epoch) -> [u8; 32] {
    field_to_bytes(&Fr::from(epoch.0))
}

/// Recover an epoch from its field encoding. Elements that do not fit in a
/// `u64` yield `None`.
pub fn epoch_from_element(bytes: &[u8; 32]) -> Option<Epoch> {
    let fr = field_from_bytes(bytes)?;
    let limbs = fr.into_bigint().0;
    if limbs[1..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(Epoch(limbs[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_serialize::CanonicalSerialize;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn secret(byte: u8) -> IdentitySecret {
        IdentitySecret::from_bytes(vec![byte; 32]).unwrap()
    }

    #[test]
    fn nullifier_is_deterministic() {
        let s = secret(7);
        assert_eq!(derive_nullifier(&s, Epoch(100)), derive_nullifier(&s, Epoch(100)));
    }

    #[test]
    fn nullifier_never_repeats_across_many_epochs() {
        let s = secret(9);
        let mut seen = HashSet::new();
        for epoch in 0..10_000u64 {
            assert!(
                seen.insert(derive_nullifier(&s, Epoch(epoch))),
                "nullifier repeated at epoch {epoch}"
            );
        }
    }

    #[test]
    fn different_identities_differ_in_same_epoch() {
        assert_ne!(
            derive_nullifier(&secret(1), Epoch(5)),
            derive_nullifier(&secret(2), Epoch(5))
        );
    }

    #[test]
    fn nullifier_is_canonical_field_element() {
        let n = derive_nullifier(&secret(3), Epoch(42));
        let fr = field_from_bytes(n.as_bytes()).expect("canonical");
        assert_eq!(field_to_bytes(&fr), *n.as_bytes());
        let mut compressed = Vec::new();
        fr.serialize_compressed(&mut compressed).unwrap();
        assert_eq!(compressed, n.as_bytes().to_vec());
    }

    #[test]
    fn nullifier_and_commitment_are_domain_separated() {
        // Same raw bytes under the two contexts must not coincide.
        let raw = [5u8; 40];
        let s = IdentitySecret::from_bytes(raw[..32].to_vec()).unwrap();
        let n = derive_nullifier(&s, Epoch(u64::from_be_bytes([5; 8])));
        let c = commit_content(&raw);
        assert_ne!(n.0, c.0);
    }

    #[test]
    fn commitment_changes_with_content() {
        assert_eq!(commit_content(b"hello"), commit_content(b"hello"));
        assert_ne!(commit_content(b"hello"), commit_content(b"hello!"));
    }

    #[test]
    fn non_canonical_encoding_rejected() {
        assert!(field_from_bytes(&[0xff; 32]).is_none());
    }

    #[test]
    fn epoch_element_round_trip() {
        for e in [0u64, 1, 494_000, u64::MAX] {
            assert_eq!(epoch_from_element(&epoch_element(Epoch(e))), Some(Epoch(e)));
        }
        let big = group_element(&GroupId::new("g").unwrap());
        assert!(epoch_from_element(&big).is_none());
    }

    #[test]
    fn multi_hash_matches_concatenation() {
        assert_eq!(
            blake3_hash_multi(&[b"hello", b" world"]),
            *blake3::hash(b"hello world").as_bytes()
        );
    }

    proptest! {
        #[test]
        fn derive_is_deterministic_for_any_secret(bytes in proptest::collection::vec(any::<u8>(), 1..64), epoch in any::<u64>()) {
            let s = IdentitySecret::from_bytes(bytes).unwrap();
            prop_assert_eq!(derive_nullifier(&s, Epoch(epoch)), derive_nullifier(&s, Epoch(epoch)));
        }

        #[test]
        fn distinct_epochs_give_distinct_nullifiers(bytes in proptest::collection::vec(any::<u8>(), 1..64), a in any::<u64>(), b in any::<u64>()) {
            prop_assume!(a != b);
            let s = IdentitySecret::from_bytes(bytes).unwrap();
            prop_assert_ne!(derive_nullifier(&s, Epoch(a)), derive_nullifier(&s, Epoch(b)));
        }
    }
}
