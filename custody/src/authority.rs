//! # Capability Grants
//!
//! Privileged operations — creating zones, verifying vendors, reviewing
//! proofs — are gated by explicit capability grants. There is no ambient
//! session: every checked operation takes the acting identity as a
//! parameter and the registry answers whether that identity holds the
//! required capability.
//!
//! Identity here is a reference to the ledger-side identity (a wallet
//! address or government key id); how that identity was authenticated is
//! the perimeter's problem, not ours.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use amparo_ledger::fraud::AuthorityDirectory;

/// The acting identity on a capability-checked operation.
pub type ActorId = String;

/// Privileges an actor can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create and fund new disaster zones (government/treasury role).
    CreateZone,
    /// Verify vendor KYC and zone affiliation.
    VerifyVendor,
    /// Review submitted proof-of-aid evidence.
    ReviewProof,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateZone => "create-zone",
            Self::VerifyVendor => "verify-vendor",
            Self::ReviewProof => "review-proof",
        };
        f.write_str(s)
    }
}

/// Concurrent map of actor → granted capabilities.
#[derive(Default)]
pub struct AuthorityRegistry {
    grants: DashMap<ActorId, HashSet<Capability>>,
}

impl AuthorityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a capability. Idempotent.
    pub fn grant(&self, actor: &str, capability: Capability) {
        self.grants
            .entry(actor.to_string())
            .or_default()
            .insert(capability);
    }

    /// Grants every capability — bootstrap convenience for the initial
    /// administrator identity.
    pub fn grant_all(&self, actor: &str) {
        for capability in [
            Capability::CreateZone,
            Capability::VerifyVendor,
            Capability::ReviewProof,
        ] {
            self.grant(actor, capability);
        }
    }

    /// Revokes a capability. Unknown actors and absent grants are no-ops.
    pub fn revoke(&self, actor: &str, capability: Capability) {
        if let Some(mut caps) = self.grants.get_mut(actor) {
            caps.remove(&capability);
        }
    }

    /// Whether the actor currently holds the capability.
    pub fn holds(&self, actor: &str, capability: Capability) -> bool {
        self.grants
            .get(actor)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false)
    }
}

impl AuthorityDirectory for AuthorityRegistry {
    fn may_create_zones(&self, actor: &str) -> bool {
        self.holds(actor, Capability::CreateZone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_actor_holds_nothing() {
        let registry = AuthorityRegistry::new();
        assert!(!registry.holds("anyone", Capability::CreateZone));
    }

    #[test]
    fn grant_and_revoke() {
        let registry = AuthorityRegistry::new();
        registry.grant("gov-1", Capability::CreateZone);

        assert!(registry.holds("gov-1", Capability::CreateZone));
        assert!(!registry.holds("gov-1", Capability::VerifyVendor));

        registry.revoke("gov-1", Capability::CreateZone);
        assert!(!registry.holds("gov-1", Capability::CreateZone));
    }

    #[test]
    fn grant_all_covers_every_capability() {
        let registry = AuthorityRegistry::new();
        registry.grant_all("admin");
        assert!(registry.holds("admin", Capability::CreateZone));
        assert!(registry.holds("admin", Capability::VerifyVendor));
        assert!(registry.holds("admin", Capability::ReviewProof));
    }

    #[test]
    fn directory_view_tracks_creation_capability() {
        let registry = AuthorityRegistry::new();
        assert!(!registry.may_create_zones("gov-1"));
        registry.grant("gov-1", Capability::CreateZone);
        assert!(registry.may_create_zones("gov-1"));
    }

    #[test]
    fn revoking_unknown_actor_is_a_noop() {
        let registry = AuthorityRegistry::new();
        registry.revoke("ghost", Capability::ReviewProof);
        assert!(!registry.holds("ghost", Capability::ReviewProof));
    }
}
