//! # Event Stream Boundary
//!
//! The external ledger confirms every state-changing transaction by emitting
//! a typed event. This module defines those events, the envelope that
//! carries them, and the in-process broadcast bus the monitor subscribes to.
//!
//! ## Delivery Contract
//!
//! - Events published for the same zone are observed in publication order
//!   (the bus is FIFO per publisher, and all of a zone's mutations flow
//!   through one engine). Cross-zone ordering is not guaranteed.
//! - Delivery is at-least-once from a subscriber's point of view: a lagged
//!   receiver may miss and later re-observe envelopes, and upstream
//!   re-publication is legal. Consumers dedupe by [`EventEnvelope::event_id`].
//!
//! Payloads are explicit tagged variants — no loosely-structured maps.
//! Anything that doesn't fit a variant doesn't enter the system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::EARTH_RADIUS_METERS;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Disaster-zone identifier.
pub type ZoneId = String;
/// Vendor identifier — doubles as the vendor's wallet/identity reference.
pub type VendorId = String;
/// Voucher identifier.
pub type VoucherId = String;
/// Confirmed-redemption identifier.
pub type RedemptionId = String;
/// Proof-of-aid identifier.
pub type ProofId = String;
/// Reference to a transaction on the external ledger.
pub type TxRef = String;

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// A WGS84 coordinate pair. Used for zone centers, vendor locations, and
/// optional redemption geo-tags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
}

impl GeoPoint {
    /// Creates a coordinate pair.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both coordinates are finite and inside the WGS84 envelope.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other` in meters (haversine).
    ///
    /// Accurate to well under 0.5% for the distances a disaster zone spans,
    /// which is all the geographic-anomaly check needs.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let to_rad = |deg: f64| deg.to_radians();
        let dlat = to_rad(other.lat - self.lat);
        let dlon = to_rad(other.lon - self.lon);
        let a = (dlat / 2.0).sin().powi(2)
            + to_rad(self.lat).cos() * to_rad(other.lat).cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A confirmed state change on the relief ledger.
///
/// Each variant carries every identifier a downstream consumer needs —
/// subscribers never have to call back into the engine to interpret an
/// event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    /// A new disaster zone was created and funded.
    #[serde(rename = "zone_created")]
    ZoneCreated {
        zone_id: ZoneId,
        name: String,
        center: GeoPoint,
        radius_meters: f64,
        initial_funding: u64,
        creator: String,
    },
    /// Additional funding was added to an existing zone.
    #[serde(rename = "funding_added")]
    FundingAdded {
        zone_id: ZoneId,
        amount: u64,
        actor: String,
    },
    /// A voucher was issued to a beneficiary against a zone's funding.
    #[serde(rename = "voucher_issued")]
    VoucherIssued {
        voucher_id: VoucherId,
        zone_id: ZoneId,
        beneficiary: String,
        amount: u64,
        expires_at: DateTime<Utc>,
    },
    /// A voucher was redeemed by a vendor; funds moved.
    #[serde(rename = "voucher_redeemed")]
    VoucherRedeemed {
        redemption_id: RedemptionId,
        voucher_id: VoucherId,
        vendor_id: VendorId,
        zone_id: ZoneId,
        amount: u64,
        category: String,
        geo: Option<GeoPoint>,
    },
    /// Proof-of-aid evidence was attached to a confirmed redemption.
    #[serde(rename = "proof_submitted")]
    ProofSubmitted {
        proof_id: ProofId,
        redemption_id: RedemptionId,
        zone_id: ZoneId,
        evidence_hash: String,
    },
}

impl LedgerEvent {
    /// The zone this event belongs to — the per-key ordering domain.
    pub fn zone_id(&self) -> &str {
        match self {
            Self::ZoneCreated { zone_id, .. }
            | Self::FundingAdded { zone_id, .. }
            | Self::VoucherIssued { zone_id, .. }
            | Self::VoucherRedeemed { zone_id, .. }
            | Self::ProofSubmitted { zone_id, .. } => zone_id,
        }
    }

    /// Short lowercase tag for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ZoneCreated { .. } => "zone_created",
            Self::FundingAdded { .. } => "funding_added",
            Self::VoucherIssued { .. } => "voucher_issued",
            Self::VoucherRedeemed { .. } => "voucher_redeemed",
            Self::ProofSubmitted { .. } => "proof_submitted",
        }
    }
}

/// The unit of delivery on the bus: an event plus the metadata consumers
/// need for ordering and deduplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique id for this delivery's logical event. Dedup key.
    pub event_id: String,
    /// The ledger transaction that produced this event.
    pub tx_ref: TxRef,
    /// Ordering key — copied out of the payload for cheap access.
    pub zone_id: ZoneId,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
    /// The event itself.
    pub event: LedgerEvent,
}

impl EventEnvelope {
    /// Wraps an event for publication, minting a fresh event id.
    pub fn new(tx_ref: TxRef, event: LedgerEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tx_ref,
            zone_id: event.zone_id().to_string(),
            recorded_at: Utc::now(),
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// Event Bus
// ---------------------------------------------------------------------------

/// Broadcast bus connecting the engine to its subscribers (monitor,
/// operator WebSocket feeds). Cheap to clone; all clones publish into the
/// same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Creates a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Opens a new subscription. Each receiver observes every envelope
    /// published after this call, in publication order.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publishes an envelope to all current subscribers. Returns the number
    /// of receivers that will observe it; zero subscribers is not an error —
    /// the engine does not care whether anyone is watching.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.tx.send(envelope).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::EVENT_CHANNEL_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn redeemed(zone: &str, voucher: &str) -> LedgerEvent {
        LedgerEvent::VoucherRedeemed {
            redemption_id: "r-1".into(),
            voucher_id: voucher.into(),
            vendor_id: "v-1".into(),
            zone_id: zone.into(),
            amount: 15_000,
            category: "food".into(),
            geo: None,
        }
    }

    #[test]
    fn envelope_copies_zone_ordering_key() {
        let env = EventEnvelope::new("tx-1".into(), redeemed("zone-a", "vch-1"));
        assert_eq!(env.zone_id, "zone-a");
        assert!(!env.event_id.is_empty());
    }

    #[test]
    fn envelope_ids_are_unique() {
        let a = EventEnvelope::new("tx-1".into(), redeemed("z", "v"));
        let b = EventEnvelope::new("tx-1".into(), redeemed("z", "v"));
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(redeemed("zone-a", "vch-1")).unwrap();
        assert_eq!(json["type"], "voucher_redeemed");
        assert_eq!(json["amount"], 15_000);
    }

    #[test]
    fn event_roundtrips_through_json() {
        let env = EventEnvelope::new("tx-9".into(), redeemed("zone-b", "vch-2"));
        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, env.event_id);
        assert_eq!(back.zone_id, "zone-b");
    }

    #[tokio::test]
    async fn bus_preserves_per_zone_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for voucher in ["vch-1", "vch-2", "vch-3"] {
            bus.publish(EventEnvelope::new("tx".into(), redeemed("zone-a", voucher)));
        }

        for expected in ["vch-1", "vch-2", "vch-3"] {
            let env = rx.recv().await.unwrap();
            match env.event {
                LedgerEvent::VoucherRedeemed { voucher_id, .. } => {
                    assert_eq!(voucher_id, expected)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(EventEnvelope::new("tx".into(), redeemed("z", "v"))), 0);
    }

    #[test]
    fn geo_distance_is_plausible() {
        // São Paulo to Rio de Janeiro, roughly 360 km.
        let sp = GeoPoint::new(-23.5505, -46.6333);
        let rio = GeoPoint::new(-22.9068, -43.1729);
        let d = sp.distance_meters(&rio);
        assert!((300_000.0..420_000.0).contains(&d), "got {}", d);
    }

    #[test]
    fn geo_distance_to_self_is_zero() {
        let p = GeoPoint::new(10.0, 20.0);
        assert!(p.distance_meters(&p) < 1e-6);
    }

    #[test]
    fn geo_validity() {
        assert!(GeoPoint::new(-23.5, -46.6).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
    }
}
