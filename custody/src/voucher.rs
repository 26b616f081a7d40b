//! # Voucher Store
//!
//! A voucher is a single-use, category-restricted, time-bounded claim on
//! one zone's funds, issued to a beneficiary. Its amount is fixed at
//! issuance and immutable; redemption is all-or-nothing — the `used` flag
//! is the whole lifecycle, and a request for any other amount is an
//! `AmountMismatch`.
//!
//! Expiry is a property of time, not a stored state: `is_expired` is a
//! pure query and the periodic sweep only exists for reporting. A voucher
//! is never explicitly deleted — it leaves circulation by being redeemed
//! or by aging out.
//!
//! Single-use enforcement happens under the voucher's map entry guard:
//! two concurrent redemption attempts for the same voucher resolve to
//! exactly one success and one `VoucherAlreadyUsed`.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use amparo_ledger::config::MAX_CATEGORIES_PER_VOUCHER;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during voucher operations.
#[derive(Debug, Error)]
pub enum VoucherError {
    /// The referenced voucher does not exist.
    #[error("voucher not found: {0}")]
    VoucherNotFound(String),

    /// Voucher amounts must be positive.
    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(u64),

    /// A voucher needs at least one allowed category, and not absurdly many.
    #[error("invalid categories: expected 1..={MAX_CATEGORIES_PER_VOUCHER} non-empty entries")]
    EmptyCategories,

    /// The voucher's validity window has passed.
    #[error("voucher {voucher_id} expired at {expired_at}")]
    VoucherExpired {
        voucher_id: String,
        expired_at: DateTime<Utc>,
    },

    /// The voucher was already redeemed.
    #[error("voucher {voucher_id} already used by {used_by}")]
    VoucherAlreadyUsed {
        voucher_id: String,
        used_by: String,
    },

    /// The requested category is not on the voucher.
    #[error("category {category:?} not allowed for voucher {voucher_id}")]
    CategoryNotAllowed {
        voucher_id: String,
        category: String,
    },

    /// Redemption is all-or-nothing; the request amount must equal the
    /// voucher amount.
    #[error(
        "amount mismatch for voucher {voucher_id}: voucher is {voucher_amount}, requested {requested}"
    )]
    AmountMismatch {
        voucher_id: String,
        voucher_amount: u64,
        requested: u64,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A restricted-use claim on zone funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub voucher_id: String,
    /// The beneficiary identity this voucher was issued to.
    pub beneficiary: String,
    /// The zone whose funds back this voucher.
    pub zone_id: String,
    /// Claim amount in cents. Fixed at issuance.
    pub amount: u64,
    /// Spending categories this voucher may be redeemed for.
    pub allowed_categories: BTreeSet<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Redemption state — a voucher transitions `unused → used` exactly once.
    pub used: bool,
    pub used_by: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Voucher {
    /// Builds a new voucher, validating amount and categories and minting
    /// the id. Category names are trimmed and lowercased so `"Food"` and
    /// `"food "` are the same restriction.
    pub fn new(
        beneficiary: &str,
        amount: u64,
        zone_id: &str,
        categories: impl IntoIterator<Item = String>,
        expiry: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, VoucherError> {
        if amount == 0 {
            return Err(VoucherError::InvalidAmount(amount));
        }

        let allowed_categories: BTreeSet<String> = categories
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if allowed_categories.is_empty() || allowed_categories.len() > MAX_CATEGORIES_PER_VOUCHER
        {
            return Err(VoucherError::EmptyCategories);
        }

        Ok(Self {
            voucher_id: Uuid::new_v4().to_string(),
            beneficiary: beneficiary.to_string(),
            zone_id: zone_id.to_string(),
            amount,
            allowed_categories,
            issued_at: now,
            expires_at: now + expiry,
            used: false,
            used_by: None,
            used_at: None,
        })
    }

    /// Whether the voucher's validity window has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Concurrent voucher store keyed by voucher id.
#[derive(Default)]
pub struct VoucherStore {
    vouchers: DashMap<String, Voucher>,
}

impl VoucherStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a voucher. Zone status is the orchestrator's check — the
    /// store validates only what it owns.
    pub fn issue(
        &self,
        beneficiary: &str,
        amount: u64,
        zone_id: &str,
        categories: impl IntoIterator<Item = String>,
        expiry: Duration,
        now: DateTime<Utc>,
    ) -> Result<Voucher, VoucherError> {
        let voucher = Voucher::new(beneficiary, amount, zone_id, categories, expiry, now)?;
        self.vouchers
            .insert(voucher.voucher_id.clone(), voucher.clone());
        Ok(voucher)
    }

    /// Admits a voucher built by [`Voucher::new`] after its issuance
    /// transaction was accepted by the chain.
    pub(crate) fn admit(&self, voucher: Voucher) {
        self.vouchers.insert(voucher.voucher_id.clone(), voucher);
    }

    /// Marks a voucher used — the single-use transition.
    ///
    /// All conditions are re-checked under the entry guard, in the
    /// engine's published order (existence, unused, unexpired, category,
    /// amount), so a race reports the same reason a sequential retry
    /// would. Returns the voucher as-of the transition.
    pub fn mark_used(
        &self,
        voucher_id: &str,
        vendor_id: &str,
        amount: u64,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<Voucher, VoucherError> {
        let mut voucher = self
            .vouchers
            .get_mut(voucher_id)
            .ok_or_else(|| VoucherError::VoucherNotFound(voucher_id.to_string()))?;

        if voucher.used {
            return Err(VoucherError::VoucherAlreadyUsed {
                voucher_id: voucher_id.to_string(),
                used_by: voucher.used_by.clone().unwrap_or_default(),
            });
        }
        if voucher.is_expired_at(now) {
            return Err(VoucherError::VoucherExpired {
                voucher_id: voucher_id.to_string(),
                expired_at: voucher.expires_at,
            });
        }
        let normalized = category.trim().to_lowercase();
        if !voucher.allowed_categories.contains(&normalized) {
            return Err(VoucherError::CategoryNotAllowed {
                voucher_id: voucher_id.to_string(),
                category: category.to_string(),
            });
        }
        if amount != voucher.amount {
            return Err(VoucherError::AmountMismatch {
                voucher_id: voucher_id.to_string(),
                voucher_amount: voucher.amount,
                requested: amount,
            });
        }

        voucher.used = true;
        voucher.used_by = Some(vendor_id.to_string());
        voucher.used_at = Some(now);
        Ok(voucher.clone())
    }

    /// Reverts a `mark_used` whose redemption could not complete (the
    /// zone debit failed under it). Only the engine's commit path calls
    /// this; the voucher returns to circulation untouched.
    pub(crate) fn release(&self, voucher_id: &str) {
        if let Some(mut voucher) = self.vouchers.get_mut(voucher_id) {
            voucher.used = false;
            voucher.used_by = None;
            voucher.used_at = None;
        }
    }

    /// Pure expiry query.
    pub fn is_expired(&self, voucher_id: &str, now: DateTime<Utc>) -> Result<bool, VoucherError> {
        self.vouchers
            .get(voucher_id)
            .map(|v| v.is_expired_at(now))
            .ok_or_else(|| VoucherError::VoucherNotFound(voucher_id.to_string()))
    }

    /// Unused vouchers whose window has passed — the periodic sweep's
    /// input. Expiry needs no mutation; this is reporting.
    pub fn expired_vouchers(&self, now: DateTime<Utc>) -> Vec<Voucher> {
        self.vouchers
            .iter()
            .filter(|v| !v.used && v.is_expired_at(now))
            .map(|v| v.clone())
            .collect()
    }

    /// Unused, unexpired vouchers still claimable.
    pub fn outstanding_count(&self, now: DateTime<Utc>) -> usize {
        self.vouchers
            .iter()
            .filter(|v| !v.used && !v.is_expired_at(now))
            .count()
    }

    /// Snapshot of a voucher, or `None`.
    pub fn get(&self, voucher_id: &str) -> Option<Voucher> {
        self.vouchers.get(voucher_id).map(|v| v.clone())
    }

    /// Number of vouchers ever issued.
    pub fn voucher_count(&self) -> usize {
        self.vouchers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VoucherStore {
        VoucherStore::new()
    }

    fn issue(store: &VoucherStore, amount: u64, days: i64) -> Voucher {
        store
            .issue(
                "household-77",
                amount,
                "z1",
                vec!["food".to_string()],
                Duration::days(days),
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn issue_creates_unused_voucher() {
        let store = store();
        let v = issue(&store, 15_000, 10);

        assert!(!v.used);
        assert_eq!(v.amount, 15_000);
        assert!(v.allowed_categories.contains("food"));
        assert!(v.expires_at > v.issued_at);
    }

    #[test]
    fn zero_amount_rejected() {
        let store = store();
        let result = store.issue(
            "b",
            0,
            "z1",
            vec!["food".to_string()],
            Duration::days(1),
            Utc::now(),
        );
        assert!(matches!(result, Err(VoucherError::InvalidAmount(0))));
    }

    #[test]
    fn empty_categories_rejected() {
        let store = store();
        let result = store.issue("b", 100, "z1", vec![], Duration::days(1), Utc::now());
        assert!(matches!(result, Err(VoucherError::EmptyCategories)));
    }

    #[test]
    fn whitespace_only_categories_rejected() {
        let store = store();
        let result = store.issue(
            "b",
            100,
            "z1",
            vec!["  ".to_string(), "".to_string()],
            Duration::days(1),
            Utc::now(),
        );
        assert!(matches!(result, Err(VoucherError::EmptyCategories)));
    }

    #[test]
    fn categories_are_normalized() {
        let store = store();
        let v = store
            .issue(
                "b",
                100,
                "z1",
                vec!["  Food ".to_string(), "MEDICAL".to_string()],
                Duration::days(1),
                Utc::now(),
            )
            .unwrap();
        assert!(v.allowed_categories.contains("food"));
        assert!(v.allowed_categories.contains("medical"));
    }

    #[test]
    fn mark_used_happy_path() {
        let store = store();
        let v = issue(&store, 15_000, 10);
        let now = Utc::now();

        let used = store
            .mark_used(&v.voucher_id, "ven-1", 15_000, "food", now)
            .unwrap();
        assert!(used.used);
        assert_eq!(used.used_by.as_deref(), Some("ven-1"));
        assert_eq!(used.used_at, Some(now));
    }

    #[test]
    fn second_use_rejected() {
        let store = store();
        let v = issue(&store, 15_000, 10);
        store
            .mark_used(&v.voucher_id, "ven-1", 15_000, "food", Utc::now())
            .unwrap();

        let err = store
            .mark_used(&v.voucher_id, "ven-2", 15_000, "food", Utc::now())
            .unwrap_err();
        match err {
            VoucherError::VoucherAlreadyUsed { used_by, .. } => assert_eq!(used_by, "ven-1"),
            other => panic!("expected VoucherAlreadyUsed, got {:?}", other),
        }
    }

    #[test]
    fn expired_voucher_rejected_even_when_everything_else_fits() {
        let store = store();
        let v = issue(&store, 15_000, -1); // expired yesterday

        let result = store.mark_used(&v.voucher_id, "ven-1", 15_000, "food", Utc::now());
        assert!(matches!(result, Err(VoucherError::VoucherExpired { .. })));
        assert!(!store.get(&v.voucher_id).unwrap().used);
    }

    #[test]
    fn wrong_category_rejected() {
        let store = store();
        let v = issue(&store, 15_000, 10);

        let result = store.mark_used(&v.voucher_id, "ven-1", 15_000, "medical", Utc::now());
        assert!(matches!(result, Err(VoucherError::CategoryNotAllowed { .. })));
    }

    #[test]
    fn category_match_is_case_insensitive() {
        let store = store();
        let v = issue(&store, 15_000, 10);
        assert!(store
            .mark_used(&v.voucher_id, "ven-1", 15_000, " FOOD ", Utc::now())
            .is_ok());
    }

    #[test]
    fn partial_amount_rejected() {
        let store = store();
        let v = issue(&store, 15_000, 10);

        let err = store
            .mark_used(&v.voucher_id, "ven-1", 10_000, "food", Utc::now())
            .unwrap_err();
        match err {
            VoucherError::AmountMismatch {
                voucher_amount,
                requested,
                ..
            } => {
                assert_eq!(voucher_amount, 15_000);
                assert_eq!(requested, 10_000);
            }
            other => panic!("expected AmountMismatch, got {:?}", other),
        }
    }

    #[test]
    fn unknown_voucher_rejected() {
        let store = store();
        assert!(matches!(
            store.mark_used("ghost", "ven-1", 1, "food", Utc::now()),
            Err(VoucherError::VoucherNotFound(_))
        ));
    }

    #[test]
    fn release_returns_voucher_to_circulation() {
        let store = store();
        let v = issue(&store, 15_000, 10);
        store
            .mark_used(&v.voucher_id, "ven-1", 15_000, "food", Utc::now())
            .unwrap();

        store.release(&v.voucher_id);
        let back = store.get(&v.voucher_id).unwrap();
        assert!(!back.used);
        assert!(back.used_by.is_none());

        // Usable again after release.
        assert!(store
            .mark_used(&v.voucher_id, "ven-2", 15_000, "food", Utc::now())
            .is_ok());
    }

    #[test]
    fn concurrent_use_resolves_to_one_winner() {
        let store = std::sync::Arc::new(store());
        let v = issue(&store, 15_000, 10);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                let id = v.voucher_id.clone();
                std::thread::spawn(move || {
                    store
                        .mark_used(&id, &format!("ven-{}", i), 15_000, "food", Utc::now())
                        .is_ok()
                })
            })
            .collect();

        let successes = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn expiry_query_and_sweep() {
        let store = store();
        let fresh = issue(&store, 100, 10);
        let stale = issue(&store, 100, -1);
        let now = Utc::now();

        assert!(!store.is_expired(&fresh.voucher_id, now).unwrap());
        assert!(store.is_expired(&stale.voucher_id, now).unwrap());

        let expired = store.expired_vouchers(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].voucher_id, stale.voucher_id);
        assert_eq!(store.outstanding_count(now), 1);
    }

    #[test]
    fn redeemed_voucher_is_not_in_the_expiry_sweep() {
        let store = store();
        let v = issue(&store, 100, -1);
        // Force-use it by releasing expiry constraints: mark as used via a
        // fresh voucher path instead — a used voucher aged past expiry
        // must not be double-reported.
        let fresh = issue(&store, 100, 10);
        store
            .mark_used(&fresh.voucher_id, "ven-1", 100, "food", Utc::now())
            .unwrap();

        let expired = store.expired_vouchers(Utc::now() + Duration::days(30));
        let ids: Vec<_> = expired.iter().map(|v| v.voucher_id.as_str()).collect();
        assert!(ids.contains(&v.voucher_id.as_str()));
        assert!(!ids.contains(&fresh.voucher_id.as_str()));
    }

    #[test]
    fn voucher_serialization_roundtrip() {
        let store = store();
        let v = issue(&store, 15_000, 10);
        let json = serde_json::to_string(&v).unwrap();
        let back: Voucher = serde_json::from_str(&json).unwrap();
        assert_eq!(back.voucher_id, v.voucher_id);
        assert_eq!(back.allowed_categories, v.allowed_categories);
    }
}
