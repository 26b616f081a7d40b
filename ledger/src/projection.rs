//! # Read-Side Projection
//!
//! Reporting and dashboards want indexed lookups; the chain wants nothing
//! to do with them. The monitor folds the event stream into a
//! [`ProjectionStore`], and everything query-shaped reads from there.
//!
//! The projection is strictly downstream: the redemption engine never
//! consults it for a correctness decision. If the projection and the
//! ledger disagree, the ledger is right and the projection gets rebuilt
//! from the stream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::{EventEnvelope, GeoPoint, LedgerEvent};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Projected view of a disaster zone's funding activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRow {
    pub zone_id: String,
    pub name: String,
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub initial_funding: u64,
    /// Funding added after creation, accumulated from the stream.
    pub funding_added: u64,
    /// Total confirmed redemption volume.
    pub redeemed_total: u64,
    pub redemption_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Projected view of an issued voucher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherRow {
    pub voucher_id: String,
    pub zone_id: String,
    pub beneficiary: String,
    pub amount: u64,
    pub expires_at: DateTime<Utc>,
    pub redeemed: bool,
}

/// Projected view of a confirmed redemption — the row reporting queries
/// live on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRow {
    pub redemption_id: String,
    pub voucher_id: String,
    pub vendor_id: String,
    pub zone_id: String,
    pub amount: u64,
    pub category: String,
    pub geo: Option<GeoPoint>,
    pub tx_ref: String,
    pub recorded_at: DateTime<Utc>,
}

/// Projected view of submitted proof-of-aid evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofRow {
    pub proof_id: String,
    pub redemption_id: String,
    pub evidence_hash: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The read-side store. In production this is a relational database with
/// the indexes below; the in-memory implementation keeps the same shape
/// for tests and single-node deployments.
pub trait ProjectionStore: Send + Sync {
    /// Folds one envelope into the projection. The monitor dedupes before
    /// calling, so `apply` may assume each event id arrives once.
    fn apply(&self, envelope: &EventEnvelope);

    fn zone(&self, zone_id: &str) -> Option<ZoneRow>;
    fn voucher(&self, voucher_id: &str) -> Option<VoucherRow>;
    fn redemption(&self, redemption_id: &str) -> Option<RedemptionRow>;

    /// Redemptions for one zone, in stream order.
    fn redemptions_for_zone(&self, zone_id: &str) -> Vec<RedemptionRow>;
    /// Redemptions by one vendor, in stream order.
    fn redemptions_for_vendor(&self, vendor_id: &str) -> Vec<RedemptionRow>;
    /// Redemptions recorded in `[from, to)`.
    fn redemptions_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RedemptionRow>;
    /// Proofs attached to one redemption.
    fn proofs_for_redemption(&self, redemption_id: &str) -> Vec<ProofRow>;

    /// Total rows projected, for status reporting.
    fn redemption_count(&self) -> usize;
}

#[derive(Default)]
struct Tables {
    zones: HashMap<String, ZoneRow>,
    vouchers: HashMap<String, VoucherRow>,
    redemptions: HashMap<String, RedemptionRow>,
    redemption_order: Vec<String>,
    by_zone: HashMap<String, Vec<String>>,
    by_vendor: HashMap<String, Vec<String>>,
    proofs: HashMap<String, Vec<ProofRow>>,
}

/// Hash-map-backed [`ProjectionStore`].
#[derive(Default)]
pub struct InMemoryProjectionStore {
    tables: RwLock<Tables>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn apply(&self, envelope: &EventEnvelope) {
        let mut t = self.tables.write();
        match &envelope.event {
            LedgerEvent::ZoneCreated {
                zone_id,
                name,
                center,
                radius_meters,
                initial_funding,
                ..
            } => {
                t.zones.insert(
                    zone_id.clone(),
                    ZoneRow {
                        zone_id: zone_id.clone(),
                        name: name.clone(),
                        center: *center,
                        radius_meters: *radius_meters,
                        initial_funding: *initial_funding,
                        funding_added: 0,
                        redeemed_total: 0,
                        redemption_count: 0,
                        created_at: envelope.recorded_at,
                    },
                );
            }
            LedgerEvent::FundingAdded { zone_id, amount, .. } => {
                if let Some(zone) = t.zones.get_mut(zone_id) {
                    zone.funding_added = zone.funding_added.saturating_add(*amount);
                }
            }
            LedgerEvent::VoucherIssued {
                voucher_id,
                zone_id,
                beneficiary,
                amount,
                expires_at,
            } => {
                t.vouchers.insert(
                    voucher_id.clone(),
                    VoucherRow {
                        voucher_id: voucher_id.clone(),
                        zone_id: zone_id.clone(),
                        beneficiary: beneficiary.clone(),
                        amount: *amount,
                        expires_at: *expires_at,
                        redeemed: false,
                    },
                );
            }
            LedgerEvent::VoucherRedeemed {
                redemption_id,
                voucher_id,
                vendor_id,
                zone_id,
                amount,
                category,
                geo,
            } => {
                let row = RedemptionRow {
                    redemption_id: redemption_id.clone(),
                    voucher_id: voucher_id.clone(),
                    vendor_id: vendor_id.clone(),
                    zone_id: zone_id.clone(),
                    amount: *amount,
                    category: category.clone(),
                    geo: *geo,
                    tx_ref: envelope.tx_ref.clone(),
                    recorded_at: envelope.recorded_at,
                };
                t.redemptions.insert(redemption_id.clone(), row);
                t.redemption_order.push(redemption_id.clone());
                t.by_zone
                    .entry(zone_id.clone())
                    .or_default()
                    .push(redemption_id.clone());
                t.by_vendor
                    .entry(vendor_id.clone())
                    .or_default()
                    .push(redemption_id.clone());
                if let Some(voucher) = t.vouchers.get_mut(voucher_id) {
                    voucher.redeemed = true;
                }
                if let Some(zone) = t.zones.get_mut(zone_id) {
                    zone.redeemed_total = zone.redeemed_total.saturating_add(*amount);
                    zone.redemption_count += 1;
                }
            }
            LedgerEvent::ProofSubmitted {
                proof_id,
                redemption_id,
                evidence_hash,
                ..
            } => {
                t.proofs
                    .entry(redemption_id.clone())
                    .or_default()
                    .push(ProofRow {
                        proof_id: proof_id.clone(),
                        redemption_id: redemption_id.clone(),
                        evidence_hash: evidence_hash.clone(),
                        recorded_at: envelope.recorded_at,
                    });
            }
        }
    }

    fn zone(&self, zone_id: &str) -> Option<ZoneRow> {
        self.tables.read().zones.get(zone_id).cloned()
    }

    fn voucher(&self, voucher_id: &str) -> Option<VoucherRow> {
        self.tables.read().vouchers.get(voucher_id).cloned()
    }

    fn redemption(&self, redemption_id: &str) -> Option<RedemptionRow> {
        self.tables.read().redemptions.get(redemption_id).cloned()
    }

    fn redemptions_for_zone(&self, zone_id: &str) -> Vec<RedemptionRow> {
        let t = self.tables.read();
        t.by_zone
            .get(zone_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| t.redemptions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn redemptions_for_vendor(&self, vendor_id: &str) -> Vec<RedemptionRow> {
        let t = self.tables.read();
        t.by_vendor
            .get(vendor_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| t.redemptions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn redemptions_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<RedemptionRow> {
        let t = self.tables.read();
        t.redemption_order
            .iter()
            .filter_map(|id| t.redemptions.get(id))
            .filter(|r| r.recorded_at >= from && r.recorded_at < to)
            .cloned()
            .collect()
    }

    fn proofs_for_redemption(&self, redemption_id: &str) -> Vec<ProofRow> {
        self.tables
            .read()
            .proofs
            .get(redemption_id)
            .cloned()
            .unwrap_or_default()
    }

    fn redemption_count(&self) -> usize {
        self.tables.read().redemptions.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
