//! Role pairings, grants and reference status.
//!
//! The validator consults a [`RoleDirectory`] for everything it needs to
//! know about the acting entity's standing: whether the (actor, role)
//! pairing exists and is live, which actions the role may perform, its
//! resource caps, and whether cited grants and references are revoked.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use r7_interchange::ResourceKind;

use crate::predicate::action_matches;

/// A binding of an entity to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePairing {
    pub actor: String,
    pub role_type: String,
    pub role_ref: String,
    /// Action names (trailing `*` globs allowed) the role may perform.
    pub capabilities: BTreeSet<String>,
    /// Per-action resource caps for this role.
    #[serde(default)]
    pub caps: BTreeMap<ResourceKind, Decimal>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub revoked: bool,
}

impl RolePairing {
    pub fn new(actor: &str, role_type: &str, role_ref: &str) -> Self {
        RolePairing {
            actor: actor.to_string(),
            role_type: role_type.to_string(),
            role_ref: role_ref.to_string(),
            capabilities: BTreeSet::new(),
            caps: BTreeMap::new(),
            expires_at: None,
            revoked: false,
        }
    }

    pub fn with_capability(mut self, action: &str) -> Self {
        self.capabilities.insert(action.to_string());
        self
    }

    pub fn with_cap(mut self, kind: ResourceKind, amount: Decimal) -> Self {
        self.caps.insert(kind, amount);
        self
    }

    pub fn permits(&self, action: &str) -> bool {
        self.capabilities.iter().any(|c| action_matches(c, action))
    }

    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        !self.revoked && self.expires_at.map_or(true, |at| now < at)
    }
}

/// A delegated permission cited by an action's reference context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub holder: String,
    #[serde(default)]
    pub caps: BTreeMap<ResourceKind, Decimal>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub revoked: bool,
}

impl Grant {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        !self.revoked && self.expires_at.map_or(true, |at| now < at)
    }
}

/// What the directory knows about a cited precedent or attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Valid,
    Revoked,
    /// Not known to the directory. The validator then looks it up in the
    /// ledger.
    Unknown,
}

pub trait RoleDirectory: Send + Sync + 'static {
    fn role_pairing(&self, actor: &str, role_ref: &str) -> Option<RolePairing>;

    fn grant(&self, id: &str) -> Option<Grant>;

    fn reference_status(&self, reference: &str) -> ReferenceStatus;

    /// Whether a cited witness identity exists and is in good standing.
    fn witness_in_good_standing(&self, witness: &str) -> bool;
}

#[derive(Debug, Default)]
struct DirectoryInner {
    pairings: HashMap<(String, String), RolePairing>,
    grants: HashMap<String, Grant>,
    references: HashMap<String, ReferenceStatus>,
    witnesses: BTreeSet<String>,
    revoked_witnesses: BTreeSet<String>,
}

/// In-memory [`RoleDirectory`].
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    inner: RwLock<DirectoryInner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryInner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryInner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add_pairing(&self, pairing: RolePairing) {
        let key = (pairing.actor.clone(), pairing.role_ref.clone());
        self.write().pairings.insert(key, pairing);
    }

    pub fn revoke_pairing(&self, actor: &str, role_ref: &str) {
        if let Some(p) = self
            .write()
            .pairings
            .get_mut(&(actor.to_string(), role_ref.to_string()))
        {
            p.revoked = true;
        }
    }

    pub fn add_grant(&self, grant: Grant) {
        self.write().grants.insert(grant.id.clone(), grant);
    }

    pub fn set_reference(&self, reference: &str, status: ReferenceStatus) {
        self.write().references.insert(reference.to_string(), status);
    }

    pub fn add_witness(&self, witness: &str) {
        self.write().witnesses.insert(witness.to_string());
    }

    pub fn revoke_witness(&self, witness: &str) {
        self.write().revoked_witnesses.insert(witness.to_string());
    }
}

impl RoleDirectory for MemoryDirectory {
    fn role_pairing(&self, actor: &str, role_ref: &str) -> Option<RolePairing> {
        self.read()
            .pairings
            .get(&(actor.to_string(), role_ref.to_string()))
            .cloned()
    }

    fn grant(&self, id: &str) -> Option<Grant> {
        self.read().grants.get(id).cloned()
    }

    fn reference_status(&self, reference: &str) -> ReferenceStatus {
        self.read()
            .references
            .get(reference)
            .copied()
            .unwrap_or(ReferenceStatus::Unknown)
    }

    fn witness_in_good_standing(&self, witness: &str) -> bool {
        let inner = self.read();
        inner.witnesses.contains(witness) && !inner.revoked_witnesses.contains(witness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn capabilities_support_globs() {
        let p = RolePairing::new("a", "analyst", "r")
            .with_capability("analyze*")
            .with_capability("report");
        assert!(p.permits("analyze_dataset"));
        assert!(p.permits("report"));
        assert!(!p.permits("delete"));
    }

    #[test]
    fn pairing_liveness() {
        let now = datetime!(2026-06-01 00:00 UTC);
        let mut p = RolePairing::new("a", "analyst", "r");
        assert!(p.is_live(now));
        p.expires_at = Some(datetime!(2026-05-01 00:00 UTC));
        assert!(!p.is_live(now));
        p.expires_at = None;
        p.revoked = true;
        assert!(!p.is_live(now));
    }

    #[test]
    fn directory_lookups() {
        let dir = MemoryDirectory::new();
        dir.add_pairing(RolePairing::new("a", "analyst", "r"));
        dir.set_reference("h1", ReferenceStatus::Revoked);
        dir.add_witness("w1");
        dir.add_witness("w2");
        dir.revoke_witness("w2");

        assert!(dir.role_pairing("a", "r").is_some());
        assert!(dir.role_pairing("a", "other").is_none());
        assert_eq!(dir.reference_status("h1"), ReferenceStatus::Revoked);
        assert_eq!(dir.reference_status("h2"), ReferenceStatus::Unknown);
        assert!(dir.witness_in_good_standing("w1"));
        assert!(!dir.witness_in_good_standing("w2"));

        dir.revoke_pairing("a", "r");
        assert!(dir.role_pairing("a", "r").unwrap().revoked);
    }
}
