//! Plan catalog and quota policies.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::document::Document;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read plan catalog {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("Failed to parse plan catalog: {0}")]
    Parse(String),
    #[error("Invalid plan catalog: {0}")]
    Invalid(String),
}

/// A numeric cap. Stored as a count where 0 or absent means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Limit {
    #[default]
    Unlimited,
    AtMost(u32),
}

impl From<Option<u32>> for Limit {
    fn from(value: Option<u32>) -> Self {
        match value {
            None | Some(0) => Limit::Unlimited,
            Some(n) => Limit::AtMost(n),
        }
    }
}

impl From<Limit> for Option<u32> {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => None,
            Limit::AtMost(n) => Some(n),
        }
    }
}

impl Limit {
    pub fn allows(&self, current: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::AtMost(n) => current < u64::from(*n),
        }
    }

    pub fn value(&self) -> Option<u32> {
        (*self).into()
    }

    pub fn tighter(self, other: Limit) -> Limit {
        match (self, other) {
            (Limit::AtMost(a), Limit::AtMost(b)) => Limit::AtMost(a.min(b)),
            (Limit::AtMost(a), Limit::Unlimited) | (Limit::Unlimited, Limit::AtMost(a)) => Limit::AtMost(a),
            (Limit::Unlimited, Limit::Unlimited) => Limit::Unlimited,
        }
    }
}

impl std::fmt::Display for Limit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::AtMost(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPolicy {
    #[serde(default)]
    pub max_images_per_resource: Limit,
    #[serde(default)]
    pub max_resources_per_tenant: Limit,
}

impl QuotaPolicy {
    pub fn new(images: u32, resources: u32) -> Self {
        Self {
            max_images_per_resource: Some(images).into(),
            max_resources_per_tenant: Some(resources).into(),
        }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Component-wise minimum of two policies
    pub fn tighter(self, other: QuotaPolicy) -> QuotaPolicy {
        QuotaPolicy {
            max_images_per_resource: self.max_images_per_resource.tighter(other.max_images_per_resource),
            max_resources_per_tenant: self.max_resources_per_tenant.tighter(other.max_resources_per_tenant),
        }
    }
}

/// Where the plan id of a quota decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Principal,
    PrincipalBilling,
    Tenant,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPlan {
    pub plan_id: String,
    pub source: PlanSource,
    pub known: bool,
    pub policy: QuotaPolicy,
}

/// Immutable plan table, loaded once at startup and shared by reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCatalog {
    pub version: String,
    /// Lowest tier, used when no plan id is recorded anywhere
    pub default_plan: String,
    pub plans: BTreeMap<String, QuotaPolicy>,
}

impl PlanCatalog {
    pub fn builtin() -> Self {
        let plans = BTreeMap::from([
            ("free".to_string(), QuotaPolicy::new(1, 10)),
            ("start".to_string(), QuotaPolicy::new(2, 50)),
            ("pro".to_string(), QuotaPolicy::new(5, 500)),
            ("premium".to_string(), QuotaPolicy::unlimited()),
        ]);
        Self {
            version: "builtin-1".to_string(),
            default_plan: "free".to_string(),
            plans,
        }
    }

    /// Load a YAML or JSON catalog; `None` yields the built-in table
    pub fn load(path: Option<&str>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;
        catalog.validated()
    }

    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_json::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))?;
        catalog.validated()
    }

    fn validated(mut self) -> Result<Self, CatalogError> {
        if self.plans.is_empty() {
            return Err(CatalogError::Invalid("catalog defines no plans".to_string()));
        }
        self.plans = self.plans.into_iter().map(|(k, v)| (k.trim().to_lowercase(), v)).collect();
        self.default_plan = self.default_plan.trim().to_lowercase();
        if !self.plans.contains_key(&self.default_plan) {
            return Err(CatalogError::Invalid(format!(
                "default plan '{}' is not defined",
                self.default_plan
            )));
        }
        Ok(self)
    }

    pub fn get(&self, plan_id: &str) -> Option<&QuotaPolicy> {
        self.plans.get(&plan_id.trim().to_lowercase())
    }

    /// Policy for a plan id; unknown ids get the most restrictive policy
    pub fn quota_for(&self, plan_id: &str) -> QuotaPolicy {
        self.get(plan_id).copied().unwrap_or_else(|| self.most_restrictive())
    }

    pub fn default_policy(&self) -> QuotaPolicy {
        self.quota_for(&self.default_plan)
    }

    pub fn most_restrictive(&self) -> QuotaPolicy {
        self.plans
            .values()
            .copied()
            .reduce(QuotaPolicy::tighter)
            .unwrap_or_default()
    }

    /// Plan for a quota decision: principal `plan`, then `billing.plan`,
    /// then the tenant's own `plan`, then the default tier.
    pub fn resolve_plan(&self, principal: Option<&Document>, tenant: &Document) -> ResolvedPlan {
        let recorded = principal
            .and_then(|p| {
                p.str_field("plan")
                    .map(|id| (id, PlanSource::Principal))
                    .or_else(|| p.str_field("billing.plan").map(|id| (id, PlanSource::PrincipalBilling)))
            })
            .or_else(|| tenant.str_field("plan").map(|id| (id, PlanSource::Tenant)));

        match recorded {
            Some((plan_id, source)) => ResolvedPlan {
                plan_id: plan_id.to_string(),
                source,
                known: self.get(plan_id).is_some(),
                policy: self.quota_for(plan_id),
            },
            None => ResolvedPlan {
                plan_id: self.default_plan.clone(),
                source: PlanSource::Default,
                known: true,
                policy: self.default_policy(),
            },
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => Document::from_stored(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(catalog.quota_for("start").max_images_per_resource, Limit::AtMost(2));
        assert_eq!(catalog.quota_for("START ").max_images_per_resource, Limit::AtMost(2));
        assert_eq!(catalog.quota_for("premium"), QuotaPolicy::unlimited());
    }

    #[test]
    fn test_unknown_plan_is_most_restrictive() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(catalog.quota_for("gold"), QuotaPolicy::new(1, 10));
    }

    #[test]
    fn test_zero_means_unlimited() {
        let catalog = PlanCatalog::from_yaml_str(
            "version: '2'\ndefaultPlan: Basic\nplans:\n  basic:\n    maxImagesPerResource: 3\n    maxResourcesPerTenant: 0\n",
        )
        .unwrap();
        let policy = catalog.default_policy();
        assert_eq!(policy.max_images_per_resource, Limit::AtMost(3));
        assert_eq!(policy.max_resources_per_tenant, Limit::Unlimited);
    }

    #[test]
    fn test_catalog_requires_default_plan() {
        let err = PlanCatalog::from_json_str(r#"{"version":"1","defaultPlan":"x","plans":{"free":{}}}"#).unwrap_err();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }

    #[test]
    fn test_plan_resolution_order() {
        let catalog = PlanCatalog::builtin();
        let tenant = doc(json!({ "plan": "pro" }));

        let principal = doc(json!({ "plan": "start", "billing": { "plan": "premium" } }));
        assert_eq!(catalog.resolve_plan(Some(&principal), &tenant).source, PlanSource::Principal);

        let billing_only = doc(json!({ "billing": { "plan": "premium" } }));
        let resolved = catalog.resolve_plan(Some(&billing_only), &tenant);
        assert_eq!(resolved.source, PlanSource::PrincipalBilling);
        assert_eq!(resolved.policy, QuotaPolicy::unlimited());

        let resolved = catalog.resolve_plan(None, &tenant);
        assert_eq!((resolved.plan_id.as_str(), resolved.source), ("pro", PlanSource::Tenant));

        let resolved = catalog.resolve_plan(None, &doc(json!({})));
        assert_eq!(resolved.source, PlanSource::Default);
        assert_eq!(resolved.policy, QuotaPolicy::new(1, 10));
    }

    #[test]
    fn test_limit_boundary() {
        assert!(Limit::AtMost(2).allows(1));
        assert!(!Limit::AtMost(2).allows(2));
        assert!(Limit::Unlimited.allows(u64::MAX));
    }
}
