//! # Vendor Registry
//!
//! Vendors are the merchants that turn vouchers into aid — and the point
//! where most fraud enters a relief program, which is why their record
//! never goes away. A vendor is created unverified, verified by an
//! authority against its claimed zone, and may later be suspended;
//! suspension resets the verified flag but retains every counter for
//! audit.
//!
//! The invariant the redemption engine relies on: a vendor may redeem
//! only within its own zone, and only while `verified` is true.
//!
//! ## Reputation
//!
//! Reputation is a deterministic, bounded score in hundredths of a star
//! (0..=500). It rises with lifetime transaction volume (saturating — a
//! doubling of volume buys a fixed bonus, capped) and falls with the
//! dispute rate (rejected proof-of-aid per transaction). No floats, no
//! randomness, recomputed from the counters on every update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use amparo_ledger::config::{
    REPUTATION_BASE_HUNDREDTHS, REPUTATION_DISPUTE_WEIGHT, REPUTATION_MAX_HUNDREDTHS,
    REPUTATION_VOLUME_CAP, REPUTATION_VOLUME_STEP,
};
use amparo_ledger::content::is_valid_evidence_hash;
use amparo_ledger::event::GeoPoint;

use crate::authority::{AuthorityRegistry, Capability};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during vendor registry operations.
#[derive(Debug, Error)]
pub enum VendorError {
    /// A vendor with this id is already registered.
    #[error("duplicate vendor: {0} is already registered")]
    DuplicateVendor(String),

    /// The referenced vendor does not exist.
    #[error("vendor not found: {0}")]
    VendorNotFound(String),

    /// The vendor belongs to a different zone than the operation claims.
    #[error("zone mismatch: vendor {vendor_id} belongs to {vendor_zone}, not {claimed_zone}")]
    ZoneMismatch {
        vendor_id: String,
        vendor_zone: String,
        claimed_zone: String,
    },

    /// The actor lacks the capability this operation requires.
    #[error("unauthorized: {actor} lacks the {capability} capability")]
    Unauthorized { actor: String, capability: String },

    /// The vendor exists but has not been verified (or was suspended).
    #[error("vendor not verified: {0}")]
    VendorNotVerified(String),

    /// The KYC evidence hash is not a well-formed content hash.
    #[error("invalid KYC evidence hash for vendor {0}")]
    InvalidKycEvidence(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A registered vendor. The id doubles as the vendor's wallet/identity
/// reference on the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_id: String,
    /// Trading name shown to operators.
    pub name: String,
    /// Where the vendor's storefront is.
    pub location: GeoPoint,
    /// The one zone this vendor may redeem in.
    pub zone_id: String,
    /// Whether an authority has verified this vendor. Reset by suspension.
    pub verified: bool,
    /// Content hash of the off-chain KYC evidence bundle.
    pub kyc_evidence_hash: String,
    /// Lifetime confirmed redemption volume in cents.
    pub total_redeemed: u64,
    /// Lifetime confirmed redemption count.
    pub transaction_count: u64,
    /// Rejected proof-of-aid reviews attributed to this vendor.
    pub dispute_count: u64,
    /// Reputation in hundredths of a star, 0..=500.
    pub reputation_score: u16,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent vendor registry keyed by vendor id.
pub struct VendorRegistry {
    vendors: DashMap<String, Vendor>,
    authority: Arc<AuthorityRegistry>,
}

impl VendorRegistry {
    pub fn new(authority: Arc<AuthorityRegistry>) -> Self {
        Self {
            vendors: DashMap::new(),
            authority,
        }
    }

    /// Registers a new, unverified vendor.
    ///
    /// Zone existence is the orchestrator's check — the registry does not
    /// hold a zone ledger reference on purpose.
    ///
    /// # Errors
    ///
    /// [`VendorError::DuplicateVendor`] / [`VendorError::InvalidKycEvidence`].
    pub fn register(
        &self,
        vendor_id: &str,
        name: &str,
        location: GeoPoint,
        zone_id: &str,
        kyc_evidence_hash: &str,
    ) -> Result<Vendor, VendorError> {
        if !is_valid_evidence_hash(kyc_evidence_hash) {
            return Err(VendorError::InvalidKycEvidence(vendor_id.to_string()));
        }

        match self.vendors.entry(vendor_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(VendorError::DuplicateVendor(vendor_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let now = Utc::now();
                let vendor = Vendor {
                    vendor_id: vendor_id.to_string(),
                    name: name.to_string(),
                    location,
                    zone_id: zone_id.to_string(),
                    verified: false,
                    kyc_evidence_hash: kyc_evidence_hash.to_string(),
                    total_redeemed: 0,
                    transaction_count: 0,
                    dispute_count: 0,
                    reputation_score: REPUTATION_BASE_HUNDREDTHS,
                    registered_at: now,
                    updated_at: now,
                };
                slot.insert(vendor.clone());
                Ok(vendor)
            }
        }
    }

    /// Marks a vendor as verified for its zone.
    ///
    /// # Errors
    ///
    /// [`VendorError::Unauthorized`] if `verifier` lacks the verification
    /// capability; [`VendorError::ZoneMismatch`] if `zone_id` is not the
    /// vendor's zone; [`VendorError::VendorNotFound`].
    pub fn verify(
        &self,
        vendor_id: &str,
        zone_id: &str,
        verifier: &str,
    ) -> Result<(), VendorError> {
        if !self.authority.holds(verifier, Capability::VerifyVendor) {
            return Err(VendorError::Unauthorized {
                actor: verifier.to_string(),
                capability: Capability::VerifyVendor.to_string(),
            });
        }

        let mut vendor = self
            .vendors
            .get_mut(vendor_id)
            .ok_or_else(|| VendorError::VendorNotFound(vendor_id.to_string()))?;

        if vendor.zone_id != zone_id {
            return Err(VendorError::ZoneMismatch {
                vendor_id: vendor_id.to_string(),
                vendor_zone: vendor.zone_id.clone(),
                claimed_zone: zone_id.to_string(),
            });
        }

        vendor.verified = true;
        vendor.updated_at = Utc::now();
        Ok(())
    }

    /// Suspends a vendor: `verified` goes false, history stays.
    pub fn suspend(&self, vendor_id: &str) -> Result<(), VendorError> {
        let mut vendor = self
            .vendors
            .get_mut(vendor_id)
            .ok_or_else(|| VendorError::VendorNotFound(vendor_id.to_string()))?;
        vendor.verified = false;
        vendor.updated_at = Utc::now();
        Ok(())
    }

    /// Credits redemption statistics after a confirmed redemption and
    /// recomputes reputation. Counters saturate rather than fail — these
    /// are statistics, and the funds already moved.
    pub fn record_redemption(&self, vendor_id: &str, amount: u64) -> Result<(), VendorError> {
        let mut vendor = self
            .vendors
            .get_mut(vendor_id)
            .ok_or_else(|| VendorError::VendorNotFound(vendor_id.to_string()))?;
        vendor.total_redeemed = vendor.total_redeemed.saturating_add(amount);
        vendor.transaction_count = vendor.transaction_count.saturating_add(1);
        vendor.reputation_score = reputation_of(vendor.transaction_count, vendor.dispute_count);
        vendor.updated_at = Utc::now();
        Ok(())
    }

    /// Counts a rejected proof-of-aid against the vendor and recomputes
    /// reputation.
    pub fn record_dispute(&self, vendor_id: &str) -> Result<(), VendorError> {
        let mut vendor = self
            .vendors
            .get_mut(vendor_id)
            .ok_or_else(|| VendorError::VendorNotFound(vendor_id.to_string()))?;
        vendor.dispute_count = vendor.dispute_count.saturating_add(1);
        vendor.reputation_score = reputation_of(vendor.transaction_count, vendor.dispute_count);
        vendor.updated_at = Utc::now();
        Ok(())
    }

    /// Snapshot of a vendor, or `None`.
    pub fn get(&self, vendor_id: &str) -> Option<Vendor> {
        self.vendors.get(vendor_id).map(|v| v.clone())
    }

    /// Whether the vendor is registered at all.
    pub fn exists(&self, vendor_id: &str) -> bool {
        self.vendors.contains_key(vendor_id)
    }

    /// Number of registered vendors.
    pub fn vendor_count(&self) -> usize {
        self.vendors.len()
    }
}

/// The reputation function: deterministic, bounded to 0..=500, monotone
/// in transaction volume and antitone in dispute rate.
fn reputation_of(transaction_count: u64, dispute_count: u64) -> u16 {
    // One step per doubling of volume, saturating at the cap.
    let doublings = (transaction_count + 1).ilog2() as u16;
    let volume_bonus = doublings
        .saturating_mul(REPUTATION_VOLUME_STEP)
        .min(REPUTATION_VOLUME_CAP);

    // Penalty proportional to disputes per transaction.
    let penalty = dispute_count
        .saturating_mul(REPUTATION_DISPUTE_WEIGHT)
        .checked_div(transaction_count.max(1))
        .unwrap_or(0)
        .min(u64::from(REPUTATION_MAX_HUNDREDTHS)) as u16;

    (REPUTATION_BASE_HUNDREDTHS + volume_bonus)
        .saturating_sub(penalty)
        .min(REPUTATION_MAX_HUNDREDTHS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use amparo_ledger::content::evidence_hash_of;

    fn registry() -> VendorRegistry {
        let authority = Arc::new(AuthorityRegistry::new());
        authority.grant("verifier-1", Capability::VerifyVendor);
        VendorRegistry::new(authority)
    }

    fn kyc() -> String {
        evidence_hash_of(b"kyc bundle for mercado central")
    }

    fn register(registry: &VendorRegistry, vendor_id: &str, zone: &str) -> Vendor {
        registry
            .register(
                vendor_id,
                "Mercado Central",
                GeoPoint::new(-26.9, -49.1),
                zone,
                &kyc(),
            )
            .unwrap()
    }

    #[test]
    fn registration_starts_unverified_with_base_reputation() {
        let registry = registry();
        let vendor = register(&registry, "ven-1", "z1");

        assert!(!vendor.verified);
        assert_eq!(vendor.total_redeemed, 0);
        assert_eq!(vendor.transaction_count, 0);
        assert_eq!(vendor.reputation_score, REPUTATION_BASE_HUNDREDTHS);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = registry();
        register(&registry, "ven-1", "z1");
        let result = registry.register(
            "ven-1",
            "Impostor",
            GeoPoint::new(0.0, 0.0),
            "z2",
            &kyc(),
        );
        assert!(matches!(result, Err(VendorError::DuplicateVendor(_))));
    }

    #[test]
    fn malformed_kyc_hash_rejected() {
        let registry = registry();
        let result = registry.register(
            "ven-1",
            "Mercado",
            GeoPoint::new(0.0, 0.0),
            "z1",
            "not-a-hash",
        );
        assert!(matches!(result, Err(VendorError::InvalidKycEvidence(_))));
    }

    #[test]
    fn verify_sets_flag() {
        let registry = registry();
        register(&registry, "ven-1", "z1");

        registry.verify("ven-1", "z1", "verifier-1").unwrap();
        assert!(registry.get("ven-1").unwrap().verified);
    }

    #[test]
    fn verify_wrong_zone_rejected() {
        let registry = registry();
        register(&registry, "ven-1", "z1");

        let err = registry.verify("ven-1", "z2", "verifier-1").unwrap_err();
        match err {
            VendorError::ZoneMismatch {
                vendor_zone,
                claimed_zone,
                ..
            } => {
                assert_eq!(vendor_zone, "z1");
                assert_eq!(claimed_zone, "z2");
            }
            other => panic!("expected ZoneMismatch, got {:?}", other),
        }
        assert!(!registry.get("ven-1").unwrap().verified);
    }

    #[test]
    fn verify_without_capability_rejected() {
        let registry = registry();
        register(&registry, "ven-1", "z1");

        let result = registry.verify("ven-1", "z1", "random-actor");
        assert!(matches!(result, Err(VendorError::Unauthorized { .. })));
    }

    #[test]
    fn suspend_resets_verified_but_keeps_history() {
        let registry = registry();
        register(&registry, "ven-1", "z1");
        registry.verify("ven-1", "z1", "verifier-1").unwrap();
        registry.record_redemption("ven-1", 10_000).unwrap();

        registry.suspend("ven-1").unwrap();

        let vendor = registry.get("ven-1").unwrap();
        assert!(!vendor.verified);
        assert_eq!(vendor.total_redeemed, 10_000);
        assert_eq!(vendor.transaction_count, 1);
    }

    #[test]
    fn record_redemption_accumulates() {
        let registry = registry();
        register(&registry, "ven-1", "z1");

        registry.record_redemption("ven-1", 10_000).unwrap();
        registry.record_redemption("ven-1", 5_000).unwrap();

        let vendor = registry.get("ven-1").unwrap();
        assert_eq!(vendor.total_redeemed, 15_000);
        assert_eq!(vendor.transaction_count, 2);
    }

    #[test]
    fn reputation_rises_with_volume() {
        let before = reputation_of(0, 0);
        let after = reputation_of(100, 0);
        assert!(after > before);
        assert!(after <= REPUTATION_MAX_HUNDREDTHS);
    }

    #[test]
    fn reputation_volume_bonus_saturates() {
        let big = reputation_of(1 << 40, 0);
        let bigger = reputation_of(1 << 50, 0);
        assert_eq!(big, bigger);
        assert_eq!(big, REPUTATION_BASE_HUNDREDTHS + REPUTATION_VOLUME_CAP);
    }

    #[test]
    fn reputation_falls_with_disputes() {
        let clean = reputation_of(20, 0);
        let disputed = reputation_of(20, 5);
        assert!(disputed < clean);
    }

    #[test]
    fn reputation_is_bounded_below() {
        // A vendor whose every transaction is disputed bottoms out at 0,
        // never underflows.
        assert_eq!(reputation_of(1, 100), 0);
    }

    #[test]
    fn reputation_is_deterministic() {
        assert_eq!(reputation_of(37, 3), reputation_of(37, 3));
    }

    #[test]
    fn operations_on_unknown_vendor_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.verify("ghost", "z1", "verifier-1"),
            Err(VendorError::VendorNotFound(_))
        ));
        assert!(matches!(
            registry.suspend("ghost"),
            Err(VendorError::VendorNotFound(_))
        ));
        assert!(matches!(
            registry.record_redemption("ghost", 1),
            Err(VendorError::VendorNotFound(_))
        ));
    }

    #[test]
    fn vendor_serialization_roundtrip() {
        let registry = registry();
        let vendor = register(&registry, "ven-1", "z1");
        let json = serde_json::to_string(&vendor).unwrap();
        let back: Vendor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.vendor_id, "ven-1");
        assert_eq!(back.reputation_score, REPUTATION_BASE_HUNDREDTHS);
    }
}
