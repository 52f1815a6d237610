/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named document collections owned by the storefront data layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Tenants,
    Resources,
    Principals,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Tenants => "tenants",
            Collection::Resources => "resources",
            Collection::Principals => "principals",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity an identifier is resolved against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Tenant,
    Resource,
    Principal,
}

impl EntityKind {
    pub fn collection(&self) -> Collection {
        match self {
            EntityKind::Tenant => Collection::Tenants,
            EntityKind::Resource => Collection::Resources,
            EntityKind::Principal => Collection::Principals,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::Tenant => "tenant",
            EntityKind::Resource => "resource",
            EntityKind::Principal => "principal",
        })
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tenant" | "store" | "loja" => Ok(EntityKind::Tenant),
            "resource" | "product" | "produto" => Ok(EntityKind::Resource),
            "principal" | "user" | "usuario" => Ok(EntityKind::Principal),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Mutations a caller can request against a tenant or one of its resources
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Append one image URL to a resource's image list
    AddImage { url: String },
    /// Remove one image URL from a resource's image list
    RemoveImage { url: String },
    /// Insert a new resource document under a tenant
    AddResource { document: Map<String, Value> },
    /// Replace top-level tenant fields
    UpdateTenant { fields: Map<String, Value> },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::AddImage { .. } => "add_image",
            Mutation::RemoveImage { .. } => "remove_image",
            Mutation::AddResource { .. } => "add_resource",
            Mutation::UpdateTenant { .. } => "update_tenant",
        }
    }

    /// True when the mutation consumes plan capacity
    pub fn consumes_quota(&self) -> bool {
        matches!(self, Mutation::AddImage { .. } | Mutation::AddResource { .. })
    }
}

/// Result of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum QuotaDecision {
    Authorized,
    QuotaExceeded { limit: u32 },
}

impl QuotaDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, QuotaDecision::Authorized)
    }
}
