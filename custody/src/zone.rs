//! # Zone Ledger
//!
//! A disaster zone is a bounded pot of relief funding with a geographic
//! scope. This module owns the funding arithmetic and the one invariant
//! everything else leans on: at all times, for every zone,
//! `total_spent <= current_funding`.
//!
//! The check-and-debit in [`ZoneLedger::reserve_and_spend`] is the
//! system's hottest critical section. Each zone lives behind its own map
//! entry, and a mutable entry guard makes the sufficiency check and the
//! increment indivisible per zone — concurrent redemptions against
//! different zones never contend.
//!
//! Zones are never deleted. A zone that should stop accepting activity is
//! deactivated; a zone whose response has ended is completed (terminal).
//! Status only moves forward: `active → {inactive, completed}`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use amparo_ledger::event::GeoPoint;

use crate::authority::{AuthorityRegistry, Capability};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during zone ledger operations.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// The referenced zone does not exist.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// The zone geometry is unusable: non-positive radius or coordinates
    /// outside the WGS84 envelope.
    #[error("invalid geometry: radius {radius_meters}m, center ({lat}, {lon})")]
    InvalidGeometry {
        radius_meters: f64,
        lat: f64,
        lon: f64,
    },

    /// The actor lacks the capability this operation requires.
    #[error("unauthorized: {actor} lacks the {capability} capability")]
    Unauthorized { actor: String, capability: String },

    /// Monetary amounts must be positive.
    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(u64),

    /// The zone is not accepting activity.
    #[error("zone {zone_id} is {status}, expected active")]
    ZoneInactive { zone_id: String, status: String },

    /// The zone is completed — a terminal state.
    #[error("zone {0} is completed (terminal)")]
    ZoneCompleted(String),

    /// The debit would overdraw the zone.
    #[error(
        "insufficient funds in zone {zone_id}: available {available}, requested {requested}"
    )]
    InsufficientFunds {
        zone_id: String,
        available: u64,
        requested: u64,
    },

    /// Funding arithmetic would overflow u64. Either a bug or an attack.
    #[error("funding overflow in zone {zone_id}")]
    FundingOverflow { zone_id: String },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle status of a zone. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    /// Accepting funding, issuance, and redemptions.
    Active,
    /// Suspended — no new activity, but may still be completed.
    Inactive,
    /// Response ended. Terminal.
    Completed,
}

impl std::fmt::Display for ZoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// A disaster zone: a pot of relief funding bounded in space and scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisasterZone {
    /// Unique zone identifier.
    pub zone_id: String,
    /// Human-readable name (e.g., "Vale do Itajaí Flood Response").
    pub name: String,
    /// Geographic center of the zone.
    pub center: GeoPoint,
    /// Radius of the zone in meters.
    pub radius_meters: f64,
    /// Funding the zone was created with.
    pub initial_funding: u64,
    /// Funding currently allocated (initial plus later additions).
    pub current_funding: u64,
    /// Total confirmed redemption volume. Never exceeds `current_funding`.
    pub total_spent: u64,
    /// Lifecycle status.
    pub status: ZoneStatus,
    /// Identity that created the zone.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last funding-relevant mutation.
    pub updated_at: DateTime<Utc>,
}

impl DisasterZone {
    /// Builds a new active zone, validating geometry and minting the id.
    ///
    /// The zone is not part of any ledger yet — [`ZoneLedger::create_zone`]
    /// is the one-step path, and the redemption engine uses this
    /// constructor directly when a chain submission sits between
    /// validation and admission.
    pub fn new(
        name: &str,
        center: GeoPoint,
        radius_meters: f64,
        initial_funding: u64,
        creator: &str,
    ) -> Result<Self, ZoneError> {
        validate_geometry(center, radius_meters)?;
        let now = Utc::now();
        Ok(Self {
            zone_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            center,
            radius_meters,
            initial_funding,
            current_funding: initial_funding,
            total_spent: 0,
            status: ZoneStatus::Active,
            created_by: creator.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Funding not yet spent. The invariant guarantees this never
    /// underflows.
    pub fn available(&self) -> u64 {
        self.current_funding - self.total_spent
    }
}

/// Validates zone geometry. Pure; shared by creation and by callers that
/// want to reject bad requests before submitting anything.
pub fn validate_geometry(center: GeoPoint, radius_meters: f64) -> Result<(), ZoneError> {
    if radius_meters.is_finite() && radius_meters > 0.0 && center.is_valid() {
        Ok(())
    } else {
        Err(ZoneError::InvalidGeometry {
            radius_meters,
            lat: center.lat,
            lon: center.lon,
        })
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The zone funding ledger. Keyed by zone id; every mutation happens under
/// that zone's entry guard.
pub struct ZoneLedger {
    zones: DashMap<String, DisasterZone>,
    authority: Arc<AuthorityRegistry>,
}

impl ZoneLedger {
    pub fn new(authority: Arc<AuthorityRegistry>) -> Self {
        Self {
            zones: DashMap::new(),
            authority,
        }
    }

    /// Creates a new active zone funded with `initial_funding`.
    ///
    /// # Errors
    ///
    /// [`ZoneError::Unauthorized`] if `creator` lacks the zone-creation
    /// capability; [`ZoneError::InvalidGeometry`] for a non-positive
    /// radius or out-of-range center.
    pub fn create_zone(
        &self,
        name: &str,
        center: GeoPoint,
        radius_meters: f64,
        initial_funding: u64,
        creator: &str,
    ) -> Result<DisasterZone, ZoneError> {
        self.authorize_creation(creator)?;
        let zone = DisasterZone::new(name, center, radius_meters, initial_funding, creator)?;
        self.zones.insert(zone.zone_id.clone(), zone.clone());
        Ok(zone)
    }

    /// Checks the creation capability without creating anything.
    pub fn authorize_creation(&self, creator: &str) -> Result<(), ZoneError> {
        if self.authority.holds(creator, Capability::CreateZone) {
            Ok(())
        } else {
            Err(ZoneError::Unauthorized {
                actor: creator.to_string(),
                capability: Capability::CreateZone.to_string(),
            })
        }
    }

    /// Admits a zone built by [`DisasterZone::new`] after its creation
    /// transaction was accepted by the chain.
    pub(crate) fn admit(&self, zone: DisasterZone) {
        self.zones.insert(zone.zone_id.clone(), zone);
    }

    /// Adds funding to an active zone. Returns the new `current_funding`.
    ///
    /// # Errors
    ///
    /// [`ZoneError::InvalidAmount`] for a zero amount;
    /// [`ZoneError::ZoneNotFound`] / [`ZoneError::ZoneInactive`] /
    /// [`ZoneError::FundingOverflow`] as labeled.
    pub fn add_funding(&self, zone_id: &str, amount: u64) -> Result<u64, ZoneError> {
        if amount == 0 {
            return Err(ZoneError::InvalidAmount(amount));
        }
        let mut zone = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(zone_id.to_string()))?;

        if zone.status != ZoneStatus::Active {
            return Err(ZoneError::ZoneInactive {
                zone_id: zone_id.to_string(),
                status: zone.status.to_string(),
            });
        }

        zone.current_funding = zone
            .current_funding
            .checked_add(amount)
            .ok_or_else(|| ZoneError::FundingOverflow {
                zone_id: zone_id.to_string(),
            })?;
        zone.updated_at = Utc::now();
        Ok(zone.current_funding)
    }

    /// Atomically checks sufficiency and debits the zone. Returns the
    /// funding still available after the debit.
    ///
    /// Called only by the redemption engine's commit path. The entry guard
    /// makes the check and the increment indivisible with respect to
    /// concurrent redemptions against the same zone — the classic
    /// check-then-act race cannot happen here.
    ///
    /// # Errors
    ///
    /// [`ZoneError::ZoneNotFound`] / [`ZoneError::ZoneInactive`] /
    /// [`ZoneError::InsufficientFunds`] as labeled.
    pub fn reserve_and_spend(&self, zone_id: &str, amount: u64) -> Result<u64, ZoneError> {
        let mut zone = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(zone_id.to_string()))?;

        if zone.status != ZoneStatus::Active {
            return Err(ZoneError::ZoneInactive {
                zone_id: zone_id.to_string(),
                status: zone.status.to_string(),
            });
        }

        let available = zone.available();
        if available < amount {
            return Err(ZoneError::InsufficientFunds {
                zone_id: zone_id.to_string(),
                available,
                requested: amount,
            });
        }

        // available >= amount, so this cannot overflow past current_funding.
        zone.total_spent += amount;
        zone.updated_at = Utc::now();
        Ok(zone.available())
    }

    /// Deactivates a zone. Idempotent when already inactive.
    ///
    /// # Errors
    ///
    /// [`ZoneError::ZoneCompleted`] — completed is terminal;
    /// [`ZoneError::ZoneNotFound`].
    pub fn deactivate(&self, zone_id: &str) -> Result<(), ZoneError> {
        let mut zone = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(zone_id.to_string()))?;

        match zone.status {
            ZoneStatus::Completed => Err(ZoneError::ZoneCompleted(zone_id.to_string())),
            ZoneStatus::Inactive => Ok(()),
            ZoneStatus::Active => {
                zone.status = ZoneStatus::Inactive;
                zone.updated_at = Utc::now();
                Ok(())
            }
        }
    }

    /// Marks a zone's response as ended. Idempotent when already
    /// completed; valid from both active and inactive — status never
    /// moves backward from here.
    pub fn complete(&self, zone_id: &str) -> Result<(), ZoneError> {
        let mut zone = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| ZoneError::ZoneNotFound(zone_id.to_string()))?;

        if zone.status != ZoneStatus::Completed {
            zone.status = ZoneStatus::Completed;
            zone.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Snapshot of a zone, or `None` if it does not exist.
    pub fn get(&self, zone_id: &str) -> Option<DisasterZone> {
        self.zones.get(zone_id).map(|z| z.clone())
    }

    /// Whether the zone exists and is accepting activity.
    pub fn is_active(&self, zone_id: &str) -> bool {
        self.zones
            .get(zone_id)
            .map(|z| z.status == ZoneStatus::Active)
            .unwrap_or(false)
    }

    /// Whether the zone exists at all.
    pub fn exists(&self, zone_id: &str) -> bool {
        self.zones.contains_key(zone_id)
    }

    /// Number of zones ever created.
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
