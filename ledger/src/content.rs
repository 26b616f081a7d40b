//! # Content-Store Boundary
//!
//! Proof-of-aid evidence lives off-chain in a content-addressed store
//! (IPFS, S3-with-digest-keys, whatever the deployment has). The ledger
//! only ever sees the BLAKE3 anchor. This module owns two deliberately
//! separate validations:
//!
//! - **Syntactic** — is the string a well-formed evidence hash at all?
//!   Pure, local, infallible.
//! - **Existence** — does the store actually hold a payload under that
//!   hash? A network call that can fail, time out, or lie by omission.
//!
//! Per the boundary contract, a store that answers non-2xx or times out is
//! treated as "not found" by proof review — but the error is still
//! surfaced to callers (the fraud analyzer turns it into an Indeterminate
//! outcome rather than a false "missing evidence" alert).

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::EVIDENCE_HASH_LENGTH;

// ---------------------------------------------------------------------------
// Syntactic validation
// ---------------------------------------------------------------------------

/// Whether `candidate` is a well-formed evidence hash: exactly 64 lowercase
/// hex characters, the hex encoding of a BLAKE3 digest.
///
/// Uppercase is rejected on purpose — producers hex-encode with the
/// lowercase alphabet, and accepting both would give every hash two
/// spellings and break dedup by string equality.
pub fn is_valid_evidence_hash(candidate: &str) -> bool {
    candidate.len() == EVIDENCE_HASH_LENGTH
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Computes the canonical evidence hash of a payload. Producers call this
/// before upload; tests use it to mint hashes that validate.
pub fn evidence_hash_of(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// Existence validation
// ---------------------------------------------------------------------------

/// Errors crossing the content-store boundary.
#[derive(Debug, Error)]
pub enum ContentStoreError {
    /// The store could not be reached or did not answer in time.
    #[error("content store unreachable: {0}")]
    Unreachable(String),
}

/// The content-addressed store the evidence payloads live in.
///
/// `exists` is the only query the core needs — it never fetches payloads,
/// only checks that the anchor resolves to one.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Whether a payload exists under `evidence_hash`.
    async fn exists(&self, evidence_hash: &str) -> Result<bool, ContentStoreError>;
}

/// In-memory content store used by tests and the default node wiring.
/// Holds only hashes — the payloads themselves are somebody else's problem.
#[derive(Default)]
pub struct InMemoryContentStore {
    hashes: RwLock<HashSet<String>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hash as present.
    pub fn insert(&self, evidence_hash: impl Into<String>) {
        self.hashes.write().insert(evidence_hash.into());
    }

    /// Hashes a payload, registers it, and returns the hash — the common
    /// test fixture path.
    pub fn insert_payload(&self, payload: &[u8]) -> String {
        let hash = evidence_hash_of(payload);
        self.insert(hash.clone());
        hash
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn exists(&self, evidence_hash: &str) -> Result<bool, ContentStoreError> {
        Ok(self.hashes.read().contains(evidence_hash))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_blake3_hash_validates() {
        let hash = evidence_hash_of(b"delivery manifest, zone 7");
        assert_eq!(hash.len(), EVIDENCE_HASH_LENGTH);
        assert!(is_valid_evidence_hash(&hash));
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(!is_valid_evidence_hash(""));
        assert!(!is_valid_evidence_hash("abc123"));
        assert!(!is_valid_evidence_hash(&"a".repeat(63)));
        assert!(!is_valid_evidence_hash(&"a".repeat(65)));
    }

    #[test]
    fn non_hex_rejected() {
        assert!(!is_valid_evidence_hash(&"g".repeat(64)));
        assert!(!is_valid_evidence_hash(&"z".repeat(64)));
    }

    #[test]
    fn uppercase_rejected() {
        let upper = evidence_hash_of(b"x").to_uppercase();
        assert!(!is_valid_evidence_hash(&upper));
    }

    #[tokio::test]
    async fn in_memory_store_roundtrip() {
        let store = InMemoryContentStore::new();
        let hash = store.insert_payload(b"receipt photo bytes");

        assert!(store.exists(&hash).await.unwrap());
        assert!(!store.exists(&evidence_hash_of(b"other")).await.unwrap());
    }
}
