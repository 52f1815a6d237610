//! Quota decisions against live usage.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::database::document::{Document, IdRef};
use crate::database::store::StoreError;
use crate::identity::ownership::OwnerRef;
use crate::identity::plans::{Limit, PlanCatalog, QuotaPolicy, ResolvedPlan};
use crate::identity::SharedStore;
use crate::types::{Collection, Mutation, QuotaDecision};

/// Every value a resource's `tenantId` may hold for this tenant
pub fn tenant_id_values(tenant: &Document) -> Vec<Value> {
    let mut values: Vec<Value> = tenant.id_ref().map(|id| id.representations()).unwrap_or_default();
    for field in ["_id", "lojaId"] {
        if let Some(id) = tenant.get(field).and_then(IdRef::from_value) {
            for value in id.representations() {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
    }
    values
}

pub struct QuotaEnforcer {
    store: SharedStore,
    catalog: Arc<PlanCatalog>,
}

impl QuotaEnforcer {
    pub fn new(store: SharedStore, catalog: Arc<PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Plan in force for a tenant, read fresh from its owner's record
    pub async fn plan_for(&self, tenant: &Document) -> Result<ResolvedPlan, StoreError> {
        let principal = self.owner_principal(tenant).await?;
        Ok(self.catalog.resolve_plan(principal.as_ref(), tenant))
    }

    pub async fn policy_for(&self, tenant: &Document) -> Result<QuotaPolicy, StoreError> {
        Ok(self.plan_for(tenant).await?.policy)
    }

    pub async fn authorize(
        &self,
        tenant: &Document,
        resource: Option<&Document>,
        mutation: &Mutation,
    ) -> Result<QuotaDecision, StoreError> {
        if !mutation.consumes_quota() {
            return Ok(QuotaDecision::Authorized);
        }
        let policy = self.policy_for(tenant).await?;
        self.authorize_with(&policy, tenant, resource, mutation).await
    }

    /// Decide against an explicit policy. Usage is always counted from the
    /// documents themselves, never from a cached counter.
    pub async fn authorize_with(
        &self,
        policy: &QuotaPolicy,
        tenant: &Document,
        resource: Option<&Document>,
        mutation: &Mutation,
    ) -> Result<QuotaDecision, StoreError> {
        let (limit, current) = match mutation {
            Mutation::AddImage { url } => {
                let images = resource.map(|r| r.string_list("images")).unwrap_or_default();
                if images.iter().any(|existing| existing == url) {
                    // re-adding an attached image does not grow the list
                    return Ok(QuotaDecision::Authorized);
                }
                (policy.max_images_per_resource, images.len() as u64)
            }
            Mutation::AddResource { .. } => {
                let limit = policy.max_resources_per_tenant;
                if limit == Limit::Unlimited {
                    return Ok(QuotaDecision::Authorized);
                }
                (limit, self.resource_count(tenant).await?)
            }
            Mutation::RemoveImage { .. } | Mutation::UpdateTenant { .. } => return Ok(QuotaDecision::Authorized),
        };

        Ok(Self::decide(mutation, limit, current))
    }

    fn decide(mutation: &Mutation, limit: Limit, current: u64) -> QuotaDecision {
        match limit {
            Limit::Unlimited => QuotaDecision::Authorized,
            Limit::AtMost(n) if limit.allows(current) => {
                debug!("{} authorized: {}/{}", mutation.name(), current, n);
                QuotaDecision::Authorized
            }
            Limit::AtMost(n) => {
                info!("{} rejected: quota of {} reached", mutation.name(), n);
                QuotaDecision::QuotaExceeded { limit: n }
            }
        }
    }

    pub async fn resource_count(&self, tenant: &Document) -> Result<u64, StoreError> {
        let ids = tenant_id_values(tenant);
        if ids.is_empty() {
            return Ok(0);
        }
        self.store
            .count(Collection::Resources, &json!({ "tenantId": { "$in": ids } }))
            .await
    }

    async fn owner_principal(&self, tenant: &Document) -> Result<Option<Document>, StoreError> {
        let owner = OwnerRef::from_document(tenant);
        let Some(owner) = owner.collapsed() else {
            return Ok(None);
        };
        let ids = owner.representations();
        let predicate = json!({ "$or": [{ "id": { "$in": ids } }, { "_id": { "$in": ids } }] });
        match self.store.find_one(Collection::Principals, &predicate).await {
            Ok(principal) => Ok(principal),
            Err(StoreError::InvalidPredicate(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
