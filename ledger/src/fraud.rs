//! # Fraud Analyzer
//!
//! Advisory pattern checks over the confirmed event stream. The analyzer
//! never blocks, retries, or reverses a transaction — money moves first,
//! and fraud is assessed after the fact. What it produces is alerts for
//! operators and, just as deliberately, *Indeterminate* outcomes: a check
//! that could not run says so instead of silently passing.
//!
//! ## Checks
//!
//! | Check                 | Trigger                                           | Severity |
//! |-----------------------|---------------------------------------------------|----------|
//! | rapid-transactions    | > N redemptions per vendor in rolling window W    | medium   |
//! | unusual-amount        | redemption above the configured ceiling           | high     |
//! | geographic-anomaly    | geo-tag outside the zone's radius                 | medium   |
//! | duplicate-transaction | same voucher redeemed under two tx references     | critical |
//! | unauthorized-creation | zone created by an actor without the capability   | critical |
//! | invalid-proof         | evidence hash fails syntactic validation          | medium   |
//! | missing-proof         | evidence hash absent from the content store       | high     |
//!
//! The unauthorized-creation check is defense-in-depth: the zone ledger
//! already refuses these, so a hit here means the admission control and
//! the event stream disagree — which is exactly what an operator wants to
//! hear about at critical severity.
//!
//! The analyzer keeps only its own sliding-window and dedup state. It
//! holds no reference to custody state and cannot mutate it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{
    FRAUD_DUPLICATE_MEMORY, FRAUD_UNUSUAL_AMOUNT_CENTS, FRAUD_VELOCITY_MAX_REDEMPTIONS,
    FRAUD_VELOCITY_WINDOW_SECS,
};
use crate::content::{is_valid_evidence_hash, ContentStore};
use crate::event::{EventEnvelope, GeoPoint, LedgerEvent};

// ---------------------------------------------------------------------------
// Alert Types
// ---------------------------------------------------------------------------

/// The pattern a fraud alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FraudKind {
    RapidTransactions,
    UnusualAmount,
    GeographicAnomaly,
    DuplicateTransaction,
    UnauthorizedCreation,
    InvalidProof,
    MissingProof,
}

impl std::fmt::Display for FraudKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RapidTransactions => "rapid-transactions",
            Self::UnusualAmount => "unusual-amount",
            Self::GeographicAnomaly => "geographic-anomaly",
            Self::DuplicateTransaction => "duplicate-transaction",
            Self::UnauthorizedCreation => "unauthorized-creation",
            Self::InvalidProof => "invalid-proof",
            Self::MissingProof => "missing-proof",
        };
        f.write_str(s)
    }
}

/// How urgently an operator should care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// An advisory flag raised by the analyzer. Immutable once created;
/// consumed by the operator notification path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    pub alert_id: String,
    pub kind: FraudKind,
    pub severity: Severity,
    /// The entity the alert is about — a vendor, voucher, zone, or proof id.
    pub subject: String,
    /// Human-readable explanation with the numbers that tripped the check.
    pub details: String,
    pub raised_at: DateTime<Utc>,
}

impl FraudAlert {
    fn new(kind: FraudKind, severity: Severity, subject: &str, details: String) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            kind,
            severity,
            subject: subject.to_string(),
            details,
            raised_at: Utc::now(),
        }
    }
}

/// The result of one check against one event.
///
/// `Indeterminate` is the whole point of this enum: a check that could not
/// be evaluated (unknown zone geometry, unreachable content store) is
/// reported as such instead of being conflated with a clean pass.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// The check ran and found nothing.
    Pass,
    /// The check ran and tripped.
    Alert(FraudAlert),
    /// The check could not be evaluated.
    Indeterminate { reason: String },
}

impl CheckOutcome {
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Alert(_))
    }
}

// ---------------------------------------------------------------------------
// Collaborator views
// ---------------------------------------------------------------------------

/// Read-only view of who may create zones, for the unauthorized-creation
/// double-check. Implemented by the custody authority registry.
pub trait AuthorityDirectory: Send + Sync {
    fn may_create_zones(&self, actor: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the analyzer. Defaults come from [`crate::config`].
#[derive(Debug, Clone)]
pub struct FraudConfig {
    /// Rolling window for the rapid-transactions check.
    pub velocity_window: Duration,
    /// Redemptions per vendor tolerated inside the window.
    pub velocity_max: usize,
    /// Single-redemption amount ceiling in cents.
    pub unusual_amount_threshold: u64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            velocity_window: Duration::seconds(FRAUD_VELOCITY_WINDOW_SECS),
            velocity_max: FRAUD_VELOCITY_MAX_REDEMPTIONS,
            unusual_amount_threshold: FRAUD_UNUSUAL_AMOUNT_CENTS,
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct ZoneGeometry {
    center: GeoPoint,
    radius_meters: f64,
}

#[derive(Default)]
struct WindowState {
    /// Recent redemption timestamps per vendor, pruned to the window.
    velocity: HashMap<String, VecDeque<DateTime<Utc>>>,
    /// Voucher id -> first tx reference seen, for duplicate detection.
    seen_vouchers: HashMap<String, String>,
    /// Insertion order for bounded eviction of `seen_vouchers`.
    seen_order: VecDeque<String>,
    /// Zone geometries learned from creation events.
    zones: HashMap<String, ZoneGeometry>,
}

/// The fraud analyzer. One instance watches the whole stream; all methods
/// are read-only with respect to custody state.
pub struct FraudAnalyzer {
    config: FraudConfig,
    authority: Arc<dyn AuthorityDirectory>,
    content: Arc<dyn ContentStore>,
    state: Mutex<WindowState>,
}

impl FraudAnalyzer {
    pub fn new(
        config: FraudConfig,
        authority: Arc<dyn AuthorityDirectory>,
        content: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            config,
            authority,
            content,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Runs every check applicable to the event and returns one outcome per
    /// check, alerts and indeterminates included.
    pub async fn assess(&self, envelope: &EventEnvelope) -> Vec<CheckOutcome> {
        match &envelope.event {
            LedgerEvent::ZoneCreated {
                zone_id,
                center,
                radius_meters,
                creator,
                ..
            } => {
                let mut state = self.state.lock();
                state.zones.insert(
                    zone_id.clone(),
                    ZoneGeometry {
                        center: *center,
                        radius_meters: *radius_meters,
                    },
                );
                drop(state);
                vec![self.check_creation_authority(creator, zone_id)]
            }
            LedgerEvent::FundingAdded { .. } | LedgerEvent::VoucherIssued { .. } => Vec::new(),
            LedgerEvent::VoucherRedeemed {
                voucher_id,
                vendor_id,
                zone_id,
                amount,
                geo,
                ..
            } => {
                let mut state = self.state.lock();
                vec![
                    Self::check_velocity(
                        &self.config,
                        &mut state,
                        vendor_id,
                        envelope.recorded_at,
                    ),
                    self.check_amount(*amount, voucher_id),
                    Self::check_geography(&state, zone_id, geo.as_ref(), voucher_id),
                    Self::check_duplicate(&mut state, voucher_id, &envelope.tx_ref),
                ]
            }
            LedgerEvent::ProofSubmitted {
                proof_id,
                evidence_hash,
                ..
            } => {
                vec![self.check_proof(proof_id, evidence_hash).await]
            }
        }
    }

    /// rapid-transactions: prune the vendor's window, record this event,
    /// alert once the count exceeds the ceiling.
    fn check_velocity(
        config: &FraudConfig,
        state: &mut WindowState,
        vendor_id: &str,
        at: DateTime<Utc>,
    ) -> CheckOutcome {
        let window_start = at - config.velocity_window;
        let timestamps = state.velocity.entry(vendor_id.to_string()).or_default();
        while timestamps.front().is_some_and(|t| *t < window_start) {
            timestamps.pop_front();
        }
        timestamps.push_back(at);

        if timestamps.len() > config.velocity_max {
            CheckOutcome::Alert(FraudAlert::new(
                FraudKind::RapidTransactions,
                Severity::Medium,
                vendor_id,
                format!(
                    "{} redemptions in the last {}s (limit {})",
                    timestamps.len(),
                    config.velocity_window.num_seconds(),
                    config.velocity_max
                ),
            ))
        } else {
            CheckOutcome::Pass
        }
    }

    /// unusual-amount: flat ceiling on a single redemption.
    fn check_amount(&self, amount: u64, voucher_id: &str) -> CheckOutcome {
        if amount > self.config.unusual_amount_threshold {
            CheckOutcome::Alert(FraudAlert::new(
                FraudKind::UnusualAmount,
                Severity::High,
                voucher_id,
                format!(
                    "redemption of {} cents exceeds threshold {}",
                    amount, self.config.unusual_amount_threshold
                ),
            ))
        } else {
            CheckOutcome::Pass
        }
    }

    /// geographic-anomaly: geo-tag outside the zone radius. A missing tag
    /// passes (tags are optional); an unknown zone is Indeterminate — the
    /// analyzer may have attached mid-stream and never seen the creation
    /// event.
    fn check_geography(
        state: &WindowState,
        zone_id: &str,
        geo: Option<&GeoPoint>,
        voucher_id: &str,
    ) -> CheckOutcome {
        let Some(tag) = geo else {
            return CheckOutcome::Pass;
        };
        let Some(zone) = state.zones.get(zone_id) else {
            return CheckOutcome::Indeterminate {
                reason: format!("no geometry known for zone {}", zone_id),
            };
        };

        let distance = zone.center.distance_meters(tag);
        if distance > zone.radius_meters {
            CheckOutcome::Alert(FraudAlert::new(
                FraudKind::GeographicAnomaly,
                Severity::Medium,
                voucher_id,
                format!(
                    "redemption geo-tag {:.0}m from zone center (radius {:.0}m)",
                    distance, zone.radius_meters
                ),
            ))
        } else {
            CheckOutcome::Pass
        }
    }

    /// duplicate-transaction: the same voucher observed as redeemed under a
    /// second, different transaction reference. The monitor's event dedup
    /// already filters re-deliveries of the *same* transaction, so a hit
    /// here means the upstream ledger confirmed a double-spend.
    fn check_duplicate(state: &mut WindowState, voucher_id: &str, tx_ref: &str) -> CheckOutcome {
        if let Some(first_tx) = state.seen_vouchers.get(voucher_id) {
            if first_tx != tx_ref {
                return CheckOutcome::Alert(FraudAlert::new(
                    FraudKind::DuplicateTransaction,
                    Severity::Critical,
                    voucher_id,
                    format!(
                        "voucher redeemed under {} after earlier redemption under {}",
                        tx_ref, first_tx
                    ),
                ));
            }
            return CheckOutcome::Pass;
        }

        state
            .seen_vouchers
            .insert(voucher_id.to_string(), tx_ref.to_string());
        state.seen_order.push_back(voucher_id.to_string());
        while state.seen_order.len() > FRAUD_DUPLICATE_MEMORY {
            if let Some(evicted) = state.seen_order.pop_front() {
                state.seen_vouchers.remove(&evicted);
            }
        }
        CheckOutcome::Pass
    }

    /// unauthorized-creation: the actor on a zone-creation event must hold
    /// the creation capability.
    fn check_creation_authority(&self, creator: &str, zone_id: &str) -> CheckOutcome {
        if self.authority.may_create_zones(creator) {
            CheckOutcome::Pass
        } else {
            CheckOutcome::Alert(FraudAlert::new(
                FraudKind::UnauthorizedCreation,
                Severity::Critical,
                zone_id,
                format!("zone created by {} who lacks the creation capability", creator),
            ))
        }
    }

    /// invalid-proof / missing-proof: syntactic check first (local, cheap),
    /// then the content-store existence lookup. An unreachable store is
    /// Indeterminate, not a false "missing evidence".
    async fn check_proof(&self, proof_id: &str, evidence_hash: &str) -> CheckOutcome {
        if !is_valid_evidence_hash(evidence_hash) {
            return CheckOutcome::Alert(FraudAlert::new(
                FraudKind::InvalidProof,
                Severity::Medium,
                proof_id,
                format!("evidence hash {:?} is not a valid BLAKE3 digest", evidence_hash),
            ));
        }

        match self.content.exists(evidence_hash).await {
            Ok(true) => CheckOutcome::Pass,
            Ok(false) => CheckOutcome::Alert(FraudAlert::new(
                FraudKind::MissingProof,
                Severity::High,
                proof_id,
                format!("evidence hash {} not present in the content store", evidence_hash),
            )),
            Err(err) => CheckOutcome::Indeterminate {
                reason: format!("content store lookup failed: {}", err),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
