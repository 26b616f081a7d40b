//! # Redemption Engine
//!
//! The orchestration point where a voucher becomes confirmed spend. Every
//! command crosses three ledgers; this module owns the fixed validation
//! order, the chain submission, and the atomic commit.
//!
//! ## Validation order (deterministic rejection reasons)
//!
//! 1. Voucher: exists, unused, unexpired.
//! 2. Vendor: exists, zone matches the voucher's, verified.
//! 3. Terms: category allowed, amount equals the voucher amount.
//! 4. Zone: active, sufficient funding.
//!
//! Identical inputs always report the same first failing reason. A
//! rejected attempt mutates nothing and produces no record — only
//! confirmed redemptions enter the append-only log.
//!
//! ## Commit protocol
//!
//! Validation is read-only. The redemption transaction is then submitted
//! to the chain (bounded retry; a terminal submission failure leaves all
//! three ledgers untouched), and only afterwards does the engine commit:
//! mark the voucher used under its entry guard, debit the zone under its
//! entry guard, credit vendor statistics, append the record, publish the
//! event. If the zone debit loses a race after the voucher was marked,
//! the voucher is released before the error returns — the winner's funds
//! were never at risk, and the voucher goes back into circulation.
//!
//! Replaying a redemption command is inherently idempotent: the voucher's
//! single-use check is the idempotency guard, and the second attempt
//! reports `VoucherAlreadyUsed`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use amparo_ledger::content::{is_valid_evidence_hash, ContentStore};
use amparo_ledger::event::{EventBus, EventEnvelope, GeoPoint, LedgerEvent};
use amparo_ledger::submit::{
    submit_with_retry, LedgerClient, LedgerTransaction, SubmitError, SubmitOptions,
};

use crate::authority::{AuthorityRegistry, Capability};
use crate::proof::{ProofError, ProofLedger, ProofOfAid, ProofStatus, ReviewDecision};
use crate::vendor::{Vendor, VendorError, VendorRegistry};
use crate::voucher::{Voucher, VoucherError, VoucherStore};
use crate::zone::{DisasterZone, ZoneError, ZoneLedger, ZoneStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The engine's unified error: every command reports the specific typed
/// reason from the component that rejected it, or the submission failure
/// from the chain boundary. Nothing generic ever escapes.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error(transparent)]
    Vendor(#[from] VendorError),
    #[error(transparent)]
    Voucher(#[from] VoucherError),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Outcome recorded for a redemption. The engine only ever appends
/// `Confirmed` records; `Failed` exists for wire compatibility with
/// consumers that also ingest chain-side execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Confirmed,
    Failed,
}

/// One confirmed redemption — the unit the fraud analyzer scores and the
/// audit trail is made of. Immutable once appended, with one late-bound
/// exception: the evidence anchor, filled in when proof-of-aid arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub redemption_id: String,
    pub voucher_id: String,
    pub vendor_id: String,
    pub zone_id: String,
    pub amount: u64,
    pub category: String,
    /// Where the redemption terminal reported itself, if it did.
    pub geo: Option<GeoPoint>,
    /// Evidence anchor, attached later by the proof linker.
    pub evidence_hash: Option<String>,
    pub tx_ref: String,
    pub status: RedemptionStatus,
    pub redeemed_at: DateTime<Utc>,
}

/// A vendor's request to redeem a voucher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub voucher_id: String,
    pub vendor_id: String,
    /// Must equal the voucher amount — redemption is all-or-nothing.
    pub amount: u64,
    pub category: String,
    /// Optional geo-tag from the vendor terminal.
    pub geo: Option<GeoPoint>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The custody orchestrator. Owns the three ledgers, the proof linker,
/// the append-only record log, the chain client, and the event bus.
pub struct RedemptionEngine {
    authority: Arc<AuthorityRegistry>,
    zones: ZoneLedger,
    vendors: VendorRegistry,
    vouchers: VoucherStore,
    proofs: ProofLedger,
    records: RwLock<Vec<RedemptionRecord>>,
    record_index: DashMap<String, usize>,
    bus: EventBus,
    client: Arc<dyn LedgerClient>,
    content: Arc<dyn ContentStore>,
    submit_opts: SubmitOptions,
}

impl RedemptionEngine {
    pub fn new(
        authority: Arc<AuthorityRegistry>,
        client: Arc<dyn LedgerClient>,
        content: Arc<dyn ContentStore>,
        bus: EventBus,
        submit_opts: SubmitOptions,
    ) -> Self {
        Self {
            zones: ZoneLedger::new(Arc::clone(&authority)),
            vendors: VendorRegistry::new(Arc::clone(&authority)),
            authority,
            vouchers: VoucherStore::new(),
            proofs: ProofLedger::new(),
            records: RwLock::new(Vec::new()),
            record_index: DashMap::new(),
            bus,
            client,
            content,
            submit_opts,
        }
    }

    // -- Zone commands ------------------------------------------------------

    /// Creates and funds a new disaster zone.
    pub async fn create_zone(
        &self,
        name: &str,
        center: GeoPoint,
        radius_meters: f64,
        initial_funding: u64,
        creator: &str,
    ) -> Result<DisasterZone, EngineError> {
        self.zones.authorize_creation(creator)?;
        let zone = DisasterZone::new(name, center, radius_meters, initial_funding, creator)?;

        let tx = LedgerTransaction::CreateZone {
            zone_id: zone.zone_id.clone(),
            name: zone.name.clone(),
            initial_funding,
            creator: creator.to_string(),
        };
        let tx_ref = submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        self.zones.admit(zone.clone());
        self.bus.publish(EventEnvelope::new(
            tx_ref,
            LedgerEvent::ZoneCreated {
                zone_id: zone.zone_id.clone(),
                name: zone.name.clone(),
                center: zone.center,
                radius_meters: zone.radius_meters,
                initial_funding,
                creator: creator.to_string(),
            },
        ));
        tracing::info!(zone_id = %zone.zone_id, initial_funding, "zone created");
        Ok(zone)
    }

    /// Adds funding to an active zone. Returns the new funding level.
    pub async fn add_funding(
        &self,
        zone_id: &str,
        amount: u64,
        actor: &str,
    ) -> Result<u64, EngineError> {
        // Pre-validate so a doomed request never reaches the chain.
        if amount == 0 {
            return Err(ZoneError::InvalidAmount(amount).into());
        }
        let zone = self
            .zones
            .get(zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(zone_id.to_string()))?;
        if zone.status != ZoneStatus::Active {
            return Err(ZoneError::ZoneInactive {
                zone_id: zone_id.to_string(),
                status: zone.status.to_string(),
            }
            .into());
        }

        let tx = LedgerTransaction::AddFunding {
            zone_id: zone_id.to_string(),
            amount,
            actor: actor.to_string(),
        };
        let tx_ref = submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        let new_funding = self.zones.add_funding(zone_id, amount)?;
        self.bus.publish(EventEnvelope::new(
            tx_ref,
            LedgerEvent::FundingAdded {
                zone_id: zone_id.to_string(),
                amount,
                actor: actor.to_string(),
            },
        ));
        Ok(new_funding)
    }

    /// Suspends a zone's activity. Local state only — the zone's funds
    /// stay on-ledger.
    pub fn deactivate_zone(&self, zone_id: &str) -> Result<(), EngineError> {
        self.zones.deactivate(zone_id)?;
        Ok(())
    }

    /// Ends a zone's response (terminal).
    pub fn complete_zone(&self, zone_id: &str) -> Result<(), EngineError> {
        self.zones.complete(zone_id)?;
        Ok(())
    }

    // -- Vendor commands ----------------------------------------------------

    /// Registers an unverified vendor in a zone.
    pub async fn register_vendor(
        &self,
        vendor_id: &str,
        name: &str,
        location: GeoPoint,
        zone_id: &str,
        kyc_evidence_hash: &str,
    ) -> Result<Vendor, EngineError> {
        if !self.zones.exists(zone_id) {
            return Err(ZoneError::ZoneNotFound(zone_id.to_string()).into());
        }
        if self.vendors.exists(vendor_id) {
            return Err(VendorError::DuplicateVendor(vendor_id.to_string()).into());
        }
        if !is_valid_evidence_hash(kyc_evidence_hash) {
            return Err(VendorError::InvalidKycEvidence(vendor_id.to_string()).into());
        }

        let tx = LedgerTransaction::RegisterVendor {
            vendor_id: vendor_id.to_string(),
            zone_id: zone_id.to_string(),
        };
        submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        let vendor = self
            .vendors
            .register(vendor_id, name, location, zone_id, kyc_evidence_hash)?;
        Ok(vendor)
    }

    /// Verifies a vendor for its zone.
    pub async fn verify_vendor(
        &self,
        vendor_id: &str,
        zone_id: &str,
        verifier: &str,
    ) -> Result<(), EngineError> {
        if !self.authority.holds(verifier, Capability::VerifyVendor) {
            return Err(VendorError::Unauthorized {
                actor: verifier.to_string(),
                capability: Capability::VerifyVendor.to_string(),
            }
            .into());
        }
        let vendor = self
            .vendors
            .get(vendor_id)
            .ok_or_else(|| VendorError::VendorNotFound(vendor_id.to_string()))?;
        if vendor.zone_id != zone_id {
            return Err(VendorError::ZoneMismatch {
                vendor_id: vendor_id.to_string(),
                vendor_zone: vendor.zone_id,
                claimed_zone: zone_id.to_string(),
            }
            .into());
        }

        let tx = LedgerTransaction::VerifyVendor {
            vendor_id: vendor_id.to_string(),
            zone_id: zone_id.to_string(),
            verifier: verifier.to_string(),
        };
        submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        self.vendors.verify(vendor_id, zone_id, verifier)?;
        Ok(())
    }

    /// Suspends a vendor. Local state only; historical counters survive.
    pub fn suspend_vendor(&self, vendor_id: &str) -> Result<(), EngineError> {
        self.vendors.suspend(vendor_id)?;
        Ok(())
    }

    // -- Voucher commands ---------------------------------------------------

    /// Issues a voucher against an active zone. Funding is reserved
    /// logically, not moved — the zone debit happens at redemption.
    pub async fn issue_voucher(
        &self,
        beneficiary: &str,
        amount: u64,
        zone_id: &str,
        categories: impl IntoIterator<Item = String>,
        expiry: Duration,
    ) -> Result<Voucher, EngineError> {
        let zone = self
            .zones
            .get(zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(zone_id.to_string()))?;
        if zone.status != ZoneStatus::Active {
            return Err(ZoneError::ZoneInactive {
                zone_id: zone_id.to_string(),
                status: zone.status.to_string(),
            }
            .into());
        }

        let voucher = Voucher::new(beneficiary, amount, zone_id, categories, expiry, Utc::now())?;

        let tx = LedgerTransaction::IssueVoucher {
            voucher_id: voucher.voucher_id.clone(),
            zone_id: zone_id.to_string(),
            beneficiary: beneficiary.to_string(),
            amount,
        };
        let tx_ref = submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        self.vouchers.admit(voucher.clone());
        self.bus.publish(EventEnvelope::new(
            tx_ref,
            LedgerEvent::VoucherIssued {
                voucher_id: voucher.voucher_id.clone(),
                zone_id: zone_id.to_string(),
                beneficiary: beneficiary.to_string(),
                amount,
                expires_at: voucher.expires_at,
            },
        ));
        tracing::info!(voucher_id = %voucher.voucher_id, zone_id, amount, "voucher issued");
        Ok(voucher)
    }

    // -- Redemption ---------------------------------------------------------

    /// Validates and executes a redemption. See the module docs for the
    /// validation order and commit protocol.
    pub async fn redeem(&self, req: RedemptionRequest) -> Result<RedemptionRecord, EngineError> {
        let now = Utc::now();

        // 1. Voucher: exists, unused, unexpired.
        let voucher = self
            .vouchers
            .get(&req.voucher_id)
            .ok_or_else(|| VoucherError::VoucherNotFound(req.voucher_id.clone()))?;
        if voucher.used {
            return Err(VoucherError::VoucherAlreadyUsed {
                voucher_id: req.voucher_id.clone(),
                used_by: voucher.used_by.clone().unwrap_or_default(),
            }
            .into());
        }
        if voucher.is_expired_at(now) {
            return Err(VoucherError::VoucherExpired {
                voucher_id: req.voucher_id.clone(),
                expired_at: voucher.expires_at,
            }
            .into());
        }

        // 2. Vendor: exists, zone match, verified.
        let vendor = self
            .vendors
            .get(&req.vendor_id)
            .ok_or_else(|| VendorError::VendorNotFound(req.vendor_id.clone()))?;
        if vendor.zone_id != voucher.zone_id {
            return Err(VendorError::ZoneMismatch {
                vendor_id: req.vendor_id.clone(),
                vendor_zone: vendor.zone_id,
                claimed_zone: voucher.zone_id.clone(),
            }
            .into());
        }
        if !vendor.verified {
            return Err(VendorError::VendorNotVerified(req.vendor_id.clone()).into());
        }

        // 3. Terms: category, amount.
        let category = req.category.trim().to_lowercase();
        if !voucher.allowed_categories.contains(&category) {
            return Err(VoucherError::CategoryNotAllowed {
                voucher_id: req.voucher_id.clone(),
                category: req.category.clone(),
            }
            .into());
        }
        if req.amount != voucher.amount {
            return Err(VoucherError::AmountMismatch {
                voucher_id: req.voucher_id.clone(),
                voucher_amount: voucher.amount,
                requested: req.amount,
            }
            .into());
        }

        // 4. Zone: active, sufficient funding.
        let zone = self
            .zones
            .get(&voucher.zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(voucher.zone_id.clone()))?;
        if zone.status != ZoneStatus::Active {
            return Err(ZoneError::ZoneInactive {
                zone_id: zone.zone_id.clone(),
                status: zone.status.to_string(),
            }
            .into());
        }
        if zone.available() < req.amount {
            return Err(ZoneError::InsufficientFunds {
                zone_id: zone.zone_id.clone(),
                available: zone.available(),
                requested: req.amount,
            }
            .into());
        }

        // 5. Chain submission. Keyed by the voucher id — the chain sees a
        // retried redemption as the same logical operation.
        let redemption_id = Uuid::new_v4().to_string();
        let tx = LedgerTransaction::RedeemVoucher {
            redemption_id: redemption_id.clone(),
            voucher_id: req.voucher_id.clone(),
            vendor_id: req.vendor_id.clone(),
            amount: req.amount,
        };
        let tx_ref = submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        // 6. Atomic commit.
        self.commit(req, voucher.zone_id, redemption_id, tx_ref, now)
    }

    /// The commit path: no awaits, every check re-run under the relevant
    /// entry guard, guards taken in voucher → zone → vendor order.
    fn commit(
        &self,
        req: RedemptionRequest,
        zone_id: String,
        redemption_id: String,
        tx_ref: String,
        now: DateTime<Utc>,
    ) -> Result<RedemptionRecord, EngineError> {
        self.vouchers
            .mark_used(&req.voucher_id, &req.vendor_id, req.amount, &req.category, now)?;

        if let Err(zone_err) = self.zones.reserve_and_spend(&zone_id, req.amount) {
            // The voucher was marked but the funds lost a race; put it
            // back into circulation before reporting the zone's reason.
            self.vouchers.release(&req.voucher_id);
            return Err(zone_err.into());
        }

        if let Err(err) = self.vendors.record_redemption(&req.vendor_id, req.amount) {
            // Statistics only — the funds already moved and the chain
            // accepted the transaction. Loudly visible, never fatal.
            tracing::error!(vendor_id = %req.vendor_id, error = %err, "failed to credit vendor statistics");
        }

        let record = RedemptionRecord {
            redemption_id: redemption_id.clone(),
            voucher_id: req.voucher_id.clone(),
            vendor_id: req.vendor_id.clone(),
            zone_id: zone_id.clone(),
            amount: req.amount,
            category: req.category.trim().to_lowercase(),
            geo: req.geo,
            evidence_hash: None,
            tx_ref: tx_ref.clone(),
            status: RedemptionStatus::Confirmed,
            redeemed_at: now,
        };
        {
            let mut records = self.records.write();
            self.record_index
                .insert(redemption_id.clone(), records.len());
            records.push(record.clone());
        }

        self.bus.publish(EventEnvelope::new(
            tx_ref,
            LedgerEvent::VoucherRedeemed {
                redemption_id,
                voucher_id: req.voucher_id,
                vendor_id: req.vendor_id,
                zone_id,
                amount: req.amount,
                category: record.category.clone(),
                geo: record.geo,
            },
        ));
        tracing::info!(
            redemption_id = %record.redemption_id,
            amount = record.amount,
            "redemption confirmed"
        );
        Ok(record)
    }

    // -- Proof linker -------------------------------------------------------

    /// Attaches proof-of-aid evidence to a confirmed redemption.
    pub async fn attach_proof(
        &self,
        redemption_id: &str,
        evidence_hash: &str,
        description: &str,
    ) -> Result<ProofOfAid, EngineError> {
        let record_idx = match self.record_index.get(redemption_id) {
            Some(idx) => *idx,
            None => {
                return Err(ProofError::RedemptionNotFound(redemption_id.to_string()).into())
            }
        };
        if let Some(existing) = self.proofs.for_redemption(redemption_id) {
            return Err(ProofError::DuplicateProof {
                redemption_id: redemption_id.to_string(),
                existing_proof_id: existing.proof_id,
            }
            .into());
        }
        let proof = ProofOfAid::new(redemption_id, evidence_hash, description, Utc::now())?;

        let tx = LedgerTransaction::SubmitProof {
            proof_id: proof.proof_id.clone(),
            redemption_id: redemption_id.to_string(),
            evidence_hash: evidence_hash.to_string(),
        };
        let tx_ref = submit_with_retry(&*self.client, &tx, &self.submit_opts).await?;

        self.proofs.admit(proof.clone())?;

        // The one late-bound field on a record: its evidence anchor.
        let zone_id = {
            let mut records = self.records.write();
            let record = &mut records[record_idx];
            record.evidence_hash = Some(evidence_hash.to_string());
            record.zone_id.clone()
        };

        self.bus.publish(EventEnvelope::new(
            tx_ref,
            LedgerEvent::ProofSubmitted {
                proof_id: proof.proof_id.clone(),
                redemption_id: redemption_id.to_string(),
                zone_id,
                evidence_hash: evidence_hash.to_string(),
            },
        ));
        Ok(proof)
    }

    /// Reviews a pending proof.
    ///
    /// Verification requires the evidence to exist in the content store —
    /// a store that cannot be reached counts as "not found" at this
    /// boundary. Rejection is always available to a reviewer and counts
    /// as a dispute against the redeeming vendor; the underlying fund
    /// movement is never reversed.
    pub async fn review_proof(
        &self,
        proof_id: &str,
        reviewer: &str,
        decision: ReviewDecision,
    ) -> Result<ProofOfAid, EngineError> {
        if !self.authority.holds(reviewer, Capability::ReviewProof) {
            return Err(ProofError::Unauthorized {
                actor: reviewer.to_string(),
                capability: Capability::ReviewProof.to_string(),
            }
            .into());
        }
        let proof = self
            .proofs
            .get(proof_id)
            .ok_or_else(|| ProofError::ProofNotFound(proof_id.to_string()))?;
        if proof.status != ProofStatus::Pending {
            return Err(ProofError::ProofNotPending {
                proof_id: proof_id.to_string(),
                status: proof.status.to_string(),
            }
            .into());
        }

        if decision == ReviewDecision::Verify {
            let present = self
                .content
                .exists(&proof.evidence_hash)
                .await
                .unwrap_or(false);
            if !present {
                return Err(ProofError::EvidenceMissing {
                    proof_id: proof_id.to_string(),
                }
                .into());
            }
        }

        let reviewed = self
            .proofs
            .transition(proof_id, decision, reviewer, Utc::now())?;

        if decision == ReviewDecision::Reject {
            if let Some(record) = self.record(&reviewed.redemption_id) {
                if let Err(err) = self.vendors.record_dispute(&record.vendor_id) {
                    tracing::error!(vendor_id = %record.vendor_id, error = %err, "failed to record dispute");
                }
                tracing::warn!(
                    proof_id,
                    redemption_id = %reviewed.redemption_id,
                    vendor_id = %record.vendor_id,
                    "proof rejected; redemption flagged for follow-up"
                );
            }
        }
        Ok(reviewed)
    }

    // -- Queries ------------------------------------------------------------

    pub fn zone(&self, zone_id: &str) -> Option<DisasterZone> {
        self.zones.get(zone_id)
    }

    pub fn vendor(&self, vendor_id: &str) -> Option<Vendor> {
        self.vendors.get(vendor_id)
    }

    pub fn voucher(&self, voucher_id: &str) -> Option<Voucher> {
        self.vouchers.get(voucher_id)
    }

    pub fn proof(&self, proof_id: &str) -> Option<ProofOfAid> {
        self.proofs.get(proof_id)
    }

    pub fn record(&self, redemption_id: &str) -> Option<RedemptionRecord> {
        let idx = *self.record_index.get(redemption_id)?;
        self.records.read().get(idx).cloned()
    }

    /// Full append-only record log, oldest first.
    pub fn records(&self) -> Vec<RedemptionRecord> {
        self.records.read().clone()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.zone_count()
    }

    pub fn vendor_count(&self) -> usize {
        self.vendors.vendor_count()
    }

    pub fn voucher_count(&self) -> usize {
        self.vouchers.voucher_count()
    }

    /// Unused vouchers past their expiry — the sweep's input.
    pub fn expired_vouchers(&self, now: DateTime<Utc>) -> Vec<Voucher> {
        self.vouchers.expired_vouchers(now)
    }

    /// Unused, unexpired vouchers.
    pub fn outstanding_vouchers(&self, now: DateTime<Utc>) -> usize {
        self.vouchers.outstanding_count(now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use amparo_ledger::content::{evidence_hash_of, InMemoryContentStore};
    use amparo_ledger::submit::RecordingLedgerClient;

    fn engine_with(content: Arc<InMemoryContentStore>, bus: EventBus) -> RedemptionEngine {
        let authority = Arc::new(AuthorityRegistry::new());
        authority.grant_all("relief-admin");
        RedemptionEngine::new(
            authority,
            Arc::new(RecordingLedgerClient::new()),
            content,
            bus,
            SubmitOptions::default(),
        )
    }

    fn engine() -> RedemptionEngine {
        engine_with(Arc::new(InMemoryContentStore::new()), EventBus::new(64))
    }

    fn center() -> GeoPoint {
        GeoPoint::new(-26.92, -49.07)
    }

    async fn setup_zone(engine: &RedemptionEngine, funding: u64) -> DisasterZone {
        engine
            .create_zone("Flood Response", center(), 25_000.0, funding, "relief-admin")
            .await
            .unwrap()
    }

    async fn setup_verified_vendor(engine: &RedemptionEngine, zone_id: &str) -> String {
        engine
            .register_vendor(
                "ven-1",
                "Mercado Central",
                center(),
                zone_id,
                &evidence_hash_of(b"kyc"),
            )
            .await
            .unwrap();
        engine
            .verify_vendor("ven-1", zone_id, "relief-admin")
            .await
            .unwrap();
        "ven-1".to_string()
    }

    fn request(voucher: &Voucher, vendor: &str) -> RedemptionRequest {
        RedemptionRequest {
            voucher_id: voucher.voucher_id.clone(),
            vendor_id: vendor.to_string(),
            amount: voucher.amount,
            category: "food".into(),
            geo: None,
        }
    }

    #[tokio::test]
    async fn validation_order_reports_voucher_before_vendor() {
        // Unknown voucher AND unknown vendor: the voucher reason wins
        // because it is checked first.
        let engine = engine();
        let err = engine
            .redeem(RedemptionRequest {
                voucher_id: "ghost-voucher".into(),
                vendor_id: "ghost-vendor".into(),
                amount: 1,
                category: "food".into(),
                geo: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Voucher(VoucherError::VoucherNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unverified_vendor_cannot_redeem() {
        let engine = engine();
        let zone = setup_zone(&engine, 100_000).await;
        engine
            .register_vendor(
                "ven-1",
                "Mercado",
                center(),
                &zone.zone_id,
                &evidence_hash_of(b"kyc"),
            )
            .await
            .unwrap();
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();

        let err = engine.redeem(request(&voucher, "ven-1")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Vendor(VendorError::VendorNotVerified(_))
        ));
        // No mutation.
        assert!(!engine.voucher(&voucher.voucher_id).unwrap().used);
        assert_eq!(engine.zone(&zone.zone_id).unwrap().total_spent, 0);
        assert_eq!(engine.record_count(), 0);
    }

    #[tokio::test]
    async fn vendor_from_another_zone_cannot_redeem() {
        let engine = engine();
        let zone_a = setup_zone(&engine, 100_000).await;
        let zone_b = setup_zone(&engine, 100_000).await;
        setup_verified_vendor(&engine, &zone_a.zone_id).await;

        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone_b.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();

        let err = engine.redeem(request(&voucher, "ven-1")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Vendor(VendorError::ZoneMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn successful_redemption_commits_across_all_three_ledgers() {
        let engine = engine();
        let zone = setup_zone(&engine, 100_000).await;
        let vendor = setup_verified_vendor(&engine, &zone.zone_id).await;
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();

        let record = engine.redeem(request(&voucher, &vendor)).await.unwrap();

        assert_eq!(record.status, RedemptionStatus::Confirmed);
        assert_eq!(record.amount, 15_000);
        assert!(engine.voucher(&voucher.voucher_id).unwrap().used);
        assert_eq!(engine.zone(&zone.zone_id).unwrap().total_spent, 15_000);
        let v = engine.vendor(&vendor).unwrap();
        assert_eq!(v.total_redeemed, 15_000);
        assert_eq!(v.transaction_count, 1);
        assert_eq!(engine.record_count(), 1);
    }

    #[tokio::test]
    async fn redemption_emits_exactly_one_event() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let engine = engine_with(Arc::new(InMemoryContentStore::new()), bus);

        let zone = setup_zone(&engine, 100_000).await;
        let vendor = setup_verified_vendor(&engine, &zone.zone_id).await;
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();
        engine.redeem(request(&voucher, &vendor)).await.unwrap();

        let mut redeemed_events = 0;
        while let Ok(env) = rx.try_recv() {
            if matches!(env.event, LedgerEvent::VoucherRedeemed { .. }) {
                redeemed_events += 1;
            }
        }
        assert_eq!(redeemed_events, 1);
    }

    #[tokio::test]
    async fn rejected_attempt_is_not_recorded() {
        let engine = engine();
        let zone = setup_zone(&engine, 100_000).await;
        let vendor = setup_verified_vendor(&engine, &zone.zone_id).await;
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();

        let mut bad = request(&voucher, &vendor);
        bad.category = "medical".into();
        assert!(engine.redeem(bad).await.is_err());
        assert_eq!(engine.record_count(), 0);
    }

    #[tokio::test]
    async fn proof_lifecycle_verify() {
        let content = Arc::new(InMemoryContentStore::new());
        let hash = content.insert_payload(b"signed delivery receipt");
        let engine = engine_with(Arc::clone(&content), EventBus::new(64));

        let zone = setup_zone(&engine, 100_000).await;
        let vendor = setup_verified_vendor(&engine, &zone.zone_id).await;
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();
        let record = engine.redeem(request(&voucher, &vendor)).await.unwrap();

        let proof = engine
            .attach_proof(&record.redemption_id, &hash, "Signed receipt")
            .await
            .unwrap();
        assert_eq!(proof.status, ProofStatus::Pending);
        assert_eq!(
            engine.record(&record.redemption_id).unwrap().evidence_hash,
            Some(hash.clone())
        );

        let reviewed = engine
            .review_proof(&proof.proof_id, "relief-admin", ReviewDecision::Verify)
            .await
            .unwrap();
        assert_eq!(reviewed.status, ProofStatus::Verified);
    }

    #[tokio::test]
    async fn proof_for_unknown_redemption_rejected() {
        let engine = engine();
        let err = engine
            .attach_proof("ghost", &evidence_hash_of(b"x"), "nope")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Proof(ProofError::RedemptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn verify_without_uploaded_evidence_fails_but_reject_works() {
        let engine = engine();
        let zone = setup_zone(&engine, 100_000).await;
        let vendor = setup_verified_vendor(&engine, &zone.zone_id).await;
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();
        let record = engine.redeem(request(&voucher, &vendor)).await.unwrap();

        let hash = evidence_hash_of(b"never uploaded");
        let proof = engine
            .attach_proof(&record.redemption_id, &hash, "missing payload")
            .await
            .unwrap();

        let err = engine
            .review_proof(&proof.proof_id, "relief-admin", ReviewDecision::Verify)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Proof(ProofError::EvidenceMissing { .. })
        ));

        // Rejection goes through regardless, and the redemption stands.
        let reviewed = engine
            .review_proof(&proof.proof_id, "relief-admin", ReviewDecision::Reject)
            .await
            .unwrap();
        assert_eq!(reviewed.status, ProofStatus::Rejected);
        assert_eq!(engine.zone(&zone.zone_id).unwrap().total_spent, 15_000);
        assert_eq!(engine.vendor(&vendor).unwrap().dispute_count, 1);
    }

    #[tokio::test]
    async fn review_requires_the_capability() {
        let engine = engine();
        let zone = setup_zone(&engine, 100_000).await;
        let vendor = setup_verified_vendor(&engine, &zone.zone_id).await;
        let voucher = engine
            .issue_voucher("hh-1", 15_000, &zone.zone_id, vec!["food".into()], Duration::days(10))
            .await
            .unwrap();
        let record = engine.redeem(request(&voucher, &vendor)).await.unwrap();
        let proof = engine
            .attach_proof(&record.redemption_id, &evidence_hash_of(b"r"), "r")
            .await
            .unwrap();

        let err = engine
            .review_proof(&proof.proof_id, "random-actor", ReviewDecision::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Proof(ProofError::Unauthorized { .. })));
    }
}
