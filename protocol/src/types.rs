//! # Core Value Types
//!
//! Small newtypes shared by every layer of the engine. Each one wraps a
//! fixed-size value so the compiler keeps nullifiers, commitments, and
//! epochs from being mixed up at call sites.
//!
//! Nullifiers and commitments are 32-byte canonical encodings of BN254
//! scalar field elements (see [`crate::crypto::hash`]). They serialize as
//! lowercase hex strings in JSON so proofs and anchored records stay
//! readable on the wire.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RlnError;

// ---------------------------------------------------------------------------
// Epoch
// ---------------------------------------------------------------------------

/// Index of a fixed-duration time window: `floor(now / epoch_duration)`.
///
/// Never stored as an entity. Always re-derived from the clock immediately
/// before use.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Epoch(pub u64);

impl Epoch {
    /// Big-endian bytes, so lexicographic key order matches numeric order.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Absolute distance between two epochs.
    pub fn distance(self, other: Epoch) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// 32-byte digests
// ---------------------------------------------------------------------------

macro_rules! digest_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Raw canonical bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex encoding.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from a 64-character hex string.
            pub fn from_hex(s: &str) -> Result<Self, RlnError> {
                let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| {
                    RlnError::InvalidInput(format!("{}: bad hex: {}", stringify!($name), e))
                })?;
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    RlnError::InvalidInput(format!("{}: expected 32 bytes", stringify!($name)))
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        /// Abbreviated form (first 8 bytes) for log lines.
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(&self.0[..8]))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_newtype!(
    /// Deterministic pseudonymous tag derived from an identity secret and an
    /// epoch. Reveals nothing about the secret.
    Nullifier
);

digest_newtype!(
    /// One-way binding of message or report content.
    Commitment
);

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Identifier of the anonymous group a message is posted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Wrap a group identifier. Empty identifiers are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, RlnError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RlnError::InvalidInput("group id must not be empty".into()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullifier_hex_round_trip() {
        let n = Nullifier([0xab; 32]);
        let parsed = Nullifier::from_hex(&n.to_hex()).unwrap();
        assert_eq!(n, parsed);
        assert!(Nullifier::from_hex(&format!("0x{}", n.to_hex())).is_ok());
    }

    #[test]
    fn nullifier_rejects_wrong_length() {
        assert!(Nullifier::from_hex("abcd").is_err());
        assert!(Commitment::from_hex("zz").is_err());
    }

    #[test]
    fn digest_serializes_as_hex_string() {
        let c = Commitment([1u8; 32]);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
    }

    #[test]
    fn display_is_abbreviated() {
        let n = Nullifier([0x11; 32]);
        assert_eq!(n.to_string(), "1111111111111111");
    }

    #[test]
    fn empty_group_rejected() {
        assert!(GroupId::new("").is_err());
        assert!(GroupId::new("   ").is_err());
        assert_eq!(GroupId::new("case-42").unwrap().as_str(), "case-42");
    }

    #[test]
    fn epoch_ordering_and_distance() {
        assert!(Epoch(3) > Epoch(2));
        assert_eq!(Epoch(2).distance(Epoch(5)), 3);
        assert_eq!(Epoch(5).distance(Epoch(2)), 3);
        assert_eq!(Epoch(7).to_be_bytes(), 7u64.to_be_bytes());
    }
}
