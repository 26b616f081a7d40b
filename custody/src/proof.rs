//! # Proof Linker
//!
//! Proof-of-aid decouples evidence from fund movement. Money moves at
//! redemption; the receipt photo, delivery manifest, or beneficiary
//! signature arrives later as a content-hashed payload in the off-chain
//! store, and a reviewer decides whether it substantiates the redemption.
//!
//! Two validations gate a proof's life, and they are deliberately
//! separate: the *syntactic* check (is this a well-formed BLAKE3 anchor?)
//! runs at attach time, and the *existence* check (does the content store
//! actually hold it?) runs at review time. Verification requires both;
//! a reviewer may reject a pending proof regardless — rejecting bad
//! evidence must never be blocked by the evidence being bad.
//!
//! A rejected proof does not reverse the redemption. Funds were disbursed
//! on-ledger; rejection flags the record for follow-up and counts against
//! the vendor's reputation, nothing more.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use amparo_ledger::config::MAX_DESCRIPTION_LENGTH;
use amparo_ledger::content::is_valid_evidence_hash;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during proof-of-aid operations.
#[derive(Debug, Error)]
pub enum ProofError {
    /// The redemption this proof claims to substantiate does not exist.
    #[error("redemption not found: {0}")]
    RedemptionNotFound(String),

    /// The redemption already has a proof attached.
    #[error("duplicate proof: redemption {redemption_id} already has proof {existing_proof_id}")]
    DuplicateProof {
        redemption_id: String,
        existing_proof_id: String,
    },

    /// The referenced proof does not exist.
    #[error("proof not found: {0}")]
    ProofNotFound(String),

    /// Review requires a pending proof; this one has already been decided.
    #[error("proof {proof_id} is {status}, expected pending")]
    ProofNotPending { proof_id: String, status: String },

    /// The actor lacks the review capability.
    #[error("unauthorized: {actor} lacks the {capability} capability")]
    Unauthorized { actor: String, capability: String },

    /// The evidence hash is not a well-formed content hash.
    #[error("invalid evidence hash: {0:?}")]
    InvalidEvidenceHash(String),

    /// The description exceeds the allowed length.
    #[error("description too long: {length} bytes (max {MAX_DESCRIPTION_LENGTH})")]
    DescriptionTooLong { length: usize },

    /// The content store holds nothing under the proof's hash, so the
    /// proof cannot be verified. (An unreachable store is treated as
    /// "not found" at this boundary.)
    #[error("evidence for proof {proof_id} not found in the content store")]
    EvidenceMissing { proof_id: String },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Review state of a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    /// Attached, awaiting review.
    Pending,
    /// A reviewer confirmed the evidence substantiates the redemption.
    Verified,
    /// A reviewer rejected the evidence. The redemption stands; the
    /// record is flagged for follow-up.
    Rejected,
}

impl std::fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// A reviewer's decision on a pending proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Verify,
    Reject,
}

/// Evidence attached to a confirmed redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfAid {
    pub proof_id: String,
    /// The redemption this proof substantiates.
    pub redemption_id: String,
    /// BLAKE3 anchor of the off-chain evidence payload.
    pub evidence_hash: String,
    /// What the evidence shows.
    pub description: String,
    pub status: ProofStatus,
    /// Reviewer identity, set on the pending → verified/rejected
    /// transition.
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

impl ProofOfAid {
    /// Builds a pending proof, validating the hash format and description
    /// length and minting the id.
    pub fn new(
        redemption_id: &str,
        evidence_hash: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ProofError> {
        if !is_valid_evidence_hash(evidence_hash) {
            return Err(ProofError::InvalidEvidenceHash(evidence_hash.to_string()));
        }
        if description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(ProofError::DescriptionTooLong {
                length: description.len(),
            });
        }
        Ok(Self {
            proof_id: Uuid::new_v4().to_string(),
            redemption_id: redemption_id.to_string(),
            evidence_hash: evidence_hash.to_string(),
            description: description.to_string(),
            status: ProofStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Proof storage: one proof per redemption, enforced atomically.
#[derive(Default)]
pub struct ProofLedger {
    proofs: DashMap<String, ProofOfAid>,
    by_redemption: DashMap<String, String>,
}

impl ProofLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and admits a proof in one step. Redemption existence is the
    /// orchestrator's check.
    pub fn attach(
        &self,
        redemption_id: &str,
        evidence_hash: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<ProofOfAid, ProofError> {
        let proof = ProofOfAid::new(redemption_id, evidence_hash, description, now)?;
        self.admit(proof.clone())?;
        Ok(proof)
    }

    /// Admits a proof built by [`ProofOfAid::new`]. The one-proof-per-
    /// redemption rule is enforced under the index entry, so a racing
    /// duplicate loses cleanly.
    pub(crate) fn admit(&self, proof: ProofOfAid) -> Result<(), ProofError> {
        match self.by_redemption.entry(proof.redemption_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Err(ProofError::DuplicateProof {
                redemption_id: proof.redemption_id.clone(),
                existing_proof_id: existing.get().clone(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(proof.proof_id.clone());
                self.proofs.insert(proof.proof_id.clone(), proof);
                Ok(())
            }
        }
    }

    /// Applies a review decision. Re-checks the pending state under the
    /// entry guard — two racing reviewers resolve to one decision and one
    /// [`ProofError::ProofNotPending`].
    pub fn transition(
        &self,
        proof_id: &str,
        decision: ReviewDecision,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<ProofOfAid, ProofError> {
        let mut proof = self
            .proofs
            .get_mut(proof_id)
            .ok_or_else(|| ProofError::ProofNotFound(proof_id.to_string()))?;

        if proof.status != ProofStatus::Pending {
            return Err(ProofError::ProofNotPending {
                proof_id: proof_id.to_string(),
                status: proof.status.to_string(),
            });
        }

        proof.status = match decision {
            ReviewDecision::Verify => ProofStatus::Verified,
            ReviewDecision::Reject => ProofStatus::Rejected,
        };
        proof.reviewed_by = Some(reviewer.to_string());
        proof.reviewed_at = Some(now);
        Ok(proof.clone())
    }

    /// Snapshot of a proof, or `None`.
    pub fn get(&self, proof_id: &str) -> Option<ProofOfAid> {
        self.proofs.get(proof_id).map(|p| p.clone())
    }

    /// The proof attached to a redemption, if any.
    pub fn for_redemption(&self, redemption_id: &str) -> Option<ProofOfAid> {
        self.by_redemption
            .get(redemption_id)
            .and_then(|id| self.get(&id))
    }

    /// Number of proofs attached.
    pub fn proof_count(&self) -> usize {
        self.proofs.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use amparo_ledger::content::evidence_hash_of;

    fn hash() -> String {
        evidence_hash_of(b"delivery receipt photo")
    }

    #[test]
    fn attach_creates_pending_proof() {
        let ledger = ProofLedger::new();
        let proof = ledger
            .attach("red-1", &hash(), "Signed delivery receipt", Utc::now())
            .unwrap();

        assert_eq!(proof.status, ProofStatus::Pending);
        assert!(proof.reviewed_by.is_none());
        assert_eq!(ledger.for_redemption("red-1").unwrap().proof_id, proof.proof_id);
    }

    #[test]
    fn malformed_hash_rejected_at_attach() {
        let ledger = ProofLedger::new();
        let result = ledger.attach("red-1", "deadbeef", "receipt", Utc::now());
        assert!(matches!(result, Err(ProofError::InvalidEvidenceHash(_))));
    }

    #[test]
    fn oversized_description_rejected() {
        let ledger = ProofLedger::new();
        let long = "x".repeat(MAX_DESCRIPTION_LENGTH + 1);
        let result = ledger.attach("red-1", &hash(), &long, Utc::now());
        assert!(matches!(result, Err(ProofError::DescriptionTooLong { .. })));
    }

    #[test]
    fn second_proof_for_same_redemption_rejected() {
        let ledger = ProofLedger::new();
        let first = ledger.attach("red-1", &hash(), "first", Utc::now()).unwrap();

        let err = ledger
            .attach("red-1", &evidence_hash_of(b"other"), "second", Utc::now())
            .unwrap_err();
        match err {
            ProofError::DuplicateProof {
                existing_proof_id, ..
            } => assert_eq!(existing_proof_id, first.proof_id),
            other => panic!("expected DuplicateProof, got {:?}", other),
        }
    }

    #[test]
    fn verify_transition() {
        let ledger = ProofLedger::new();
        let proof = ledger.attach("red-1", &hash(), "receipt", Utc::now()).unwrap();

        let reviewed = ledger
            .transition(&proof.proof_id, ReviewDecision::Verify, "auditor-1", Utc::now())
            .unwrap();
        assert_eq!(reviewed.status, ProofStatus::Verified);
        assert_eq!(reviewed.reviewed_by.as_deref(), Some("auditor-1"));
        assert!(reviewed.reviewed_at.is_some());
    }

    #[test]
    fn reject_transition() {
        let ledger = ProofLedger::new();
        let proof = ledger.attach("red-1", &hash(), "receipt", Utc::now()).unwrap();

        let reviewed = ledger
            .transition(&proof.proof_id, ReviewDecision::Reject, "auditor-1", Utc::now())
            .unwrap();
        assert_eq!(reviewed.status, ProofStatus::Rejected);
    }

    #[test]
    fn decided_proof_cannot_be_re_reviewed() {
        let ledger = ProofLedger::new();
        let proof = ledger.attach("red-1", &hash(), "receipt", Utc::now()).unwrap();
        ledger
            .transition(&proof.proof_id, ReviewDecision::Verify, "auditor-1", Utc::now())
            .unwrap();

        let err = ledger
            .transition(&proof.proof_id, ReviewDecision::Reject, "auditor-2", Utc::now())
            .unwrap_err();
        match err {
            ProofError::ProofNotPending { status, .. } => assert_eq!(status, "verified"),
            other => panic!("expected ProofNotPending, got {:?}", other),
        }
    }

    #[test]
    fn unknown_proof_rejected() {
        let ledger = ProofLedger::new();
        assert!(matches!(
            ledger.transition("ghost", ReviewDecision::Verify, "a", Utc::now()),
            Err(ProofError::ProofNotFound(_))
        ));
    }

    #[test]
    fn proof_serialization_roundtrip() {
        let ledger = ProofLedger::new();
        let proof = ledger.attach("red-1", &hash(), "receipt", Utc::now()).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let back: ProofOfAid = serde_json::from_str(&json).unwrap();
        assert_eq!(back.proof_id, proof.proof_id);
        assert_eq!(back.status, ProofStatus::Pending);
    }
}
