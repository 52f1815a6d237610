//! Tenant ownership.
//!
//! New documents carry a single `ownerRef`. Documents written before it
//! existed name their owner under one of the legacy fields; those are read
//! through [`OwnerRef::Legacy`] until the owner migration collapses them.

use serde_json::Value;

use crate::database::document::{Document, IdRef};

pub const OWNER_FIELD: &str = "ownerRef";

/// Legacy owner fields, in the order they were introduced
pub const LEGACY_OWNER_FIELDS: &[&str] = &["usuarioId", "userId"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerRef {
    Canonical(IdRef),
    Legacy(Vec<IdRef>),
    Unowned,
}

impl OwnerRef {
    /// Read a tenant's owner. A present but malformed `ownerRef` leaves the
    /// tenant unowned; legacy fields are not consulted in that case.
    pub fn from_document(tenant: &Document) -> Self {
        if let Some(value) = tenant.get(OWNER_FIELD).filter(|v| !v.is_null()) {
            return match IdRef::from_value(value) {
                Some(owner) => OwnerRef::Canonical(owner),
                None => OwnerRef::Unowned,
            };
        }

        let legacy: Vec<IdRef> = LEGACY_OWNER_FIELDS
            .iter()
            .filter_map(|f| tenant.get(f).and_then(IdRef::from_value))
            .collect();
        if legacy.is_empty() {
            OwnerRef::Unowned
        } else {
            OwnerRef::Legacy(legacy)
        }
    }

    pub fn is_owned_by(&self, principal: &IdRef) -> bool {
        match self {
            OwnerRef::Canonical(owner) => owner.matches(principal),
            OwnerRef::Legacy(owners) => owners.iter().any(|o| o.matches(principal)),
            OwnerRef::Unowned => false,
        }
    }

    /// The single owner legacy fields agree on, if they agree
    pub fn collapsed(&self) -> Option<&IdRef> {
        match self {
            OwnerRef::Canonical(owner) => Some(owner),
            OwnerRef::Legacy(owners) => {
                let first = owners.first()?;
                owners.iter().all(|o| o.matches(first)).then_some(first)
            }
            OwnerRef::Unowned => None,
        }
    }

    /// Stored form for `ownerRef`: the hyphenated id when canonical, else raw
    pub fn to_value(owner: &IdRef) -> Value {
        match owner.canonical() {
            Some(id) => Value::String(id.to_string()),
            None => Value::String(owner.raw().to_string()),
        }
    }
}

/// Decides whether a principal controls a tenant. Never fails: anything
/// malformed on either side is simply not ownership.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipVerifier;

impl OwnershipVerifier {
    pub fn verifies(&self, tenant: &Document, principal_id: &str) -> bool {
        let Some(principal) = IdRef::parse(principal_id) else {
            return false;
        };
        OwnerRef::from_document(tenant).is_owned_by(&principal)
    }
}
