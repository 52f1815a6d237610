//! Identity facade: resolve, verify, authorize, apply.
//!
//! Every write flow runs resolve → verify → authorize → apply as one unit and
//! re-runs the whole unit after a write conflict, so each retry decides
//! against fresh documents.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::{self, BlobStorage};
use crate::config::IdentityConfig;
use crate::database::document::{Document, IdRef};
use crate::database::store::StoreError;
use crate::filter::Filter;
use crate::identity::error::{IdentityError, Outcome};
use crate::identity::gateway::{Applied, MutationGateway};
use crate::identity::normalizer::normalize_name;
use crate::identity::ownership::{OwnerRef, OwnershipVerifier, LEGACY_OWNER_FIELDS, OWNER_FIELD};
use crate::identity::plans::{Limit, PlanCatalog, ResolvedPlan};
use crate::identity::quota::{tenant_id_values, QuotaEnforcer};
use crate::identity::resolver::{EntityResolver, Resolution, Resolved};
use crate::identity::SharedStore;
use crate::types::{Collection, EntityKind, Mutation, QuotaDecision};

/// Tenant fields no caller may write directly
pub const IMMUTABLE_TENANT_FIELDS: &[&str] = &[
    "id", "_id", "lojaId", "slug", "normalizedName", "ownerRef", "usuarioId", "userId", "createdAt", "updatedAt",
    "plan",
];

const FALLBACK_SLUG: &str = "loja";

/// The principal a request acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub admin: bool,
}

impl Actor {
    pub fn principal(id: impl Into<String>) -> Self {
        Self { id: id.into(), admin: false }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self { id: id.into(), admin: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTenant {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub colors: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewResource {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stock: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub tenants: u64,
    pub resources: u64,
}

pub struct IdentityService {
    store: SharedStore,
    resolver: EntityResolver,
    verifier: OwnershipVerifier,
    quota: QuotaEnforcer,
    gateway: MutationGateway,
    config: IdentityConfig,
}

impl IdentityService {
    pub fn new(store: SharedStore, catalog: Arc<PlanCatalog>, config: IdentityConfig) -> Self {
        Self {
            resolver: EntityResolver::new(store.clone(), config.ambiguity_probe_limit),
            verifier: OwnershipVerifier,
            quota: QuotaEnforcer::new(store.clone(), catalog),
            gateway: MutationGateway::new(store.clone(), config.compare_and_swap),
            store,
            config,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        self.quota.catalog()
    }

    // ========================================
    // Core operations
    // ========================================

    pub async fn resolve_tenant(&self, raw: &str) -> Result<Resolution, IdentityError> {
        Ok(self.resolver.resolve_raw(EntityKind::Tenant, raw).await?)
    }

    pub async fn resolve_resource(&self, raw: &str) -> Result<Resolution, IdentityError> {
        Ok(self.resolver.resolve_raw(EntityKind::Resource, raw).await?)
    }

    pub fn verify_ownership(&self, tenant: &Document, principal_id: &str) -> bool {
        self.verifier.verifies(tenant, principal_id)
    }

    pub async fn authorize_mutation(
        &self,
        tenant: &Document,
        resource: Option<&Document>,
        mutation: &Mutation,
    ) -> Result<QuotaDecision, IdentityError> {
        Ok(self.quota.authorize(tenant, resource, mutation).await?)
    }

    pub async fn apply_mutation(&self, entity: &Resolved, mutation: &Mutation) -> Result<Applied, IdentityError> {
        let image_limit = match mutation {
            Mutation::AddImage { .. } => match self.tenant_of(&entity.document).await? {
                Some(tenant) => self.quota.policy_for(&tenant.document).await?.max_images_per_resource,
                None => self.catalog().default_policy().max_images_per_resource,
            },
            _ => Limit::Unlimited,
        };
        self.gateway.apply(entity, mutation, image_limit).await
    }

    pub async fn plan_for_tenant(&self, tenant: &Document) -> Result<ResolvedPlan, IdentityError> {
        Ok(self.quota.plan_for(tenant).await?)
    }

    // ========================================
    // Tenant lifecycle
    // ========================================

    pub async fn create_tenant(&self, actor: &Actor, input: NewTenant) -> Result<Document, IdentityError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(IdentityError::InvalidInput("tenant name is required".to_string()));
        }
        let Some(principal) = IdRef::parse(&actor.id) else {
            return Err(IdentityError::InvalidInput("principal id is required".to_string()));
        };
        if self.owns_active_tenant(actor).await? {
            return Err(IdentityError::AlreadyOwnsTenant);
        }

        let id = Uuid::new_v4();
        let normalized = normalize_name(name);
        let explicit = match input.slug.as_deref() {
            Some(requested) => {
                let slug = normalize_name(requested);
                if slug.is_empty() {
                    return Err(IdentityError::InvalidInput(format!("'{}' is not a usable slug", requested)));
                }
                if self.key_taken(&slug, None).await? {
                    return Err(IdentityError::SlugTaken(slug));
                }
                Some(slug)
            }
            None => None,
        };

        // Slugs lost to a concurrent create, skipped on the next attempt
        let mut raced: Vec<String> = Vec::new();
        loop {
            let slug = match &explicit {
                Some(slug) => slug.clone(),
                None => self.derive_slug(&normalized, id, &raced).await?,
            };
            let normalized_name = self.unique_normalized_name(&normalized, &slug, None).await?;

            let mut document = Document::new();
            document
                .set_id(id)
                .set("name", name)
                .set("normalizedName", normalized_name)
                .set("slug", slug.as_str())
                .set(OWNER_FIELD, OwnerRef::to_value(&principal))
                .set("active", true)
                .stamp_created();
            if let Some(logo) = &input.logo {
                document.set("logo", logo.as_str());
            }
            if let Some(banner) = &input.banner {
                document.set("banner", banner.as_str());
            }
            if let Some(colors) = &input.colors {
                document.set("colors", colors.clone());
            }

            match self.store.insert_one(Collection::Tenants, &document).await {
                Ok(()) => {
                    document.commit();
                    info!("Created tenant {} with slug {}", id, slug);
                    return Ok(document);
                }
                Err(StoreError::Duplicate(reason)) => {
                    if explicit.is_some() {
                        return Err(IdentityError::SlugTaken(slug));
                    }
                    if raced.len() >= self.config.slug_max_attempts as usize {
                        return Err(IdentityError::SlugUnavailable(slug));
                    }
                    debug!("Slug {} taken by a concurrent create ({}), retrying", slug, reason);
                    raced.push(slug);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Replace writable tenant fields. A new name recomputes `normalizedName`;
    /// the slug never changes.
    pub async fn update_tenant(
        &self,
        actor: &Actor,
        raw: &str,
        fields: Map<String, Value>,
    ) -> Result<Outcome<Document>, IdentityError> {
        if fields.is_empty() {
            return Err(IdentityError::InvalidInput("no fields to update".to_string()));
        }
        if let Some(key) = fields.keys().find(|k| IMMUTABLE_TENANT_FIELDS.contains(&k.as_str())) {
            return Err(IdentityError::InvalidInput(format!("field '{}' cannot be changed", key)));
        }

        let mut fields = fields;
        let mut renamed = None;
        if let Some(name) = fields.get("name") {
            let name = name
                .as_str()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| IdentityError::InvalidInput("name must be a non-empty string".to_string()))?
                .to_string();
            renamed = Some(normalize_name(&name));
            fields.insert("name".to_string(), Value::String(name));
        }

        self.modify_tenant(actor, raw, fields, renamed).await
    }

    /// Soft delete: the tenant stays resolvable with `active = false`
    pub async fn deactivate_tenant(&self, actor: &Actor, raw: &str) -> Result<Outcome<Document>, IdentityError> {
        let mut fields = Map::new();
        fields.insert("active".to_string(), Value::Bool(false));
        self.modify_tenant(actor, raw, fields, None).await
    }

    /// Hard delete of a tenant and every resource it owns (admin only)
    pub async fn purge_tenant(&self, actor: &Actor, raw: &str) -> Result<Outcome<PurgeReport>, IdentityError> {
        if !actor.admin {
            info!("Purge of {} refused for non-admin principal", raw);
            return Ok(Outcome::Unauthorized);
        }
        let Some(tenant) = self.resolve_tenant(raw).await?.found() else {
            return Ok(Outcome::NotFound);
        };

        let ids = tenant_id_values(&tenant.document);
        let resources = if ids.is_empty() {
            0
        } else {
            self.store
                .delete_many(Collection::Resources, &json!({ "tenantId": { "$in": ids } }))
                .await?
        };
        let tenants = self.store.delete_many(Collection::Tenants, &tenant.primary).await?;
        warn!("Purged tenant {} ({} resources) by admin {}", raw, resources, actor.id);
        Ok(Outcome::Applied(PurgeReport { tenants, resources }))
    }

    /// `renamed` carries the normalized form of a new name; it is checked
    /// against the other tenants on every attempt.
    async fn modify_tenant(
        &self,
        actor: &Actor,
        raw: &str,
        fields: Map<String, Value>,
        renamed: Option<String>,
    ) -> Result<Outcome<Document>, IdentityError> {
        let mut attempt = 0;
        loop {
            let Some(tenant) = self.resolve_tenant(raw).await?.found() else {
                return Ok(Outcome::NotFound);
            };
            if !self.authorized(actor, &tenant.document) {
                return Ok(Outcome::Unauthorized);
            }

            let mut fields = fields.clone();
            if let Some(normalized) = &renamed {
                let slug = tenant.document.str_field("slug").unwrap_or_default();
                let name = self.unique_normalized_name(normalized, slug, tenant.id().as_ref()).await?;
                fields.insert("normalizedName".to_string(), Value::String(name));
            }
            let mutation = Mutation::UpdateTenant { fields };
            match self.gateway.apply(&tenant, &mutation, Limit::Unlimited).await {
                Ok(_) => return Ok(self.reload(&tenant).await?.map_or(Outcome::NotFound, Outcome::Applied)),
                Err(e) if e.is_retryable() && attempt < self.config.write_retries => {
                    attempt += 1;
                    debug!("Retrying {} on tenant {} ({})", mutation.name(), raw, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn owns_active_tenant(&self, actor: &Actor) -> Result<bool, IdentityError> {
        let Some(principal) = IdRef::parse(&actor.id) else {
            return Ok(false);
        };
        let ids = principal.representations();
        let branches: Vec<Value> = std::iter::once(OWNER_FIELD)
            .chain(LEGACY_OWNER_FIELDS.iter().copied())
            .map(|field| json!({ field: { "$in": ids } }))
            .collect();
        let filter = Filter::parse(Collection::Tenants, &json!({ "$or": branches })).map_err(StoreError::from)?;

        let candidates = self.store.find(&filter).await?;
        Ok(candidates
            .iter()
            .any(|t| t.is_active() && self.verifier.verifies(t, &actor.id)))
    }

    /// Whether a tenant other than `own` answers to `candidate` as its slug
    /// or normalized name. Canonical-id shaped candidates are always taken.
    async fn key_taken(&self, candidate: &str, own: Option<&IdRef>) -> Result<bool, IdentityError> {
        if Uuid::parse_str(candidate).is_ok() {
            return Ok(true);
        }
        let predicate = json!({ "$or": [{ "slug": candidate }, { "normalizedName": candidate }] });
        let mut filter = Filter::parse(Collection::Tenants, &predicate).map_err(StoreError::from)?;
        filter.limit(Some(2), None);

        let holders = self.store.find(&filter).await?;
        Ok(holders.iter().any(|holder| match (own, holder.id_ref()) {
            (Some(own), Some(id)) => !own.matches(&id),
            _ => true,
        }))
    }

    /// The tenant's `normalizedName`: its normalized name when no other
    /// tenant answers to it, otherwise its own slug, so every key resolves
    /// to a single tenant.
    async fn unique_normalized_name(
        &self,
        normalized: &str,
        slug: &str,
        own: Option<&IdRef>,
    ) -> Result<String, IdentityError> {
        if !normalized.is_empty() && (normalized == slug || !self.key_taken(normalized, own).await?) {
            return Ok(normalized.to_string());
        }
        if slug.is_empty() {
            return Err(IdentityError::InvalidInput(format!("name '{}' is already in use", normalized)));
        }
        debug!("Normalized name {} taken, using slug {}", normalized, slug);
        Ok(slug.to_string())
    }

    /// The normalized name, or on collision the name plus a short suffix
    /// hashed from the new tenant id. Candidates in `skip` are never used.
    async fn derive_slug(&self, normalized: &str, id: Uuid, skip: &[String]) -> Result<String, IdentityError> {
        let base = if normalized.is_empty() { FALLBACK_SLUG } else { normalized };
        let usable = |candidate: &str| !skip.iter().any(|s| s == candidate);
        if usable(base) && !self.key_taken(base, None).await? {
            return Ok(base.to_string());
        }
        for attempt in 0..self.config.slug_max_attempts {
            let candidate = format!("{}-{}", base, slug_suffix(base, id, attempt));
            if usable(&candidate) && !self.key_taken(&candidate, None).await? {
                debug!("Slug {} taken, derived {}", base, candidate);
                return Ok(candidate);
            }
        }
        Err(IdentityError::SlugUnavailable(base.to_string()))
    }

    // ========================================
    // Resource lifecycle
    // ========================================

    pub async fn get_tenant(&self, raw: &str) -> Result<Outcome<Document>, IdentityError> {
        Ok(match self.resolve_tenant(raw).await? {
            Resolution::Found(tenant) => Outcome::Applied(tenant.document),
            Resolution::NotFound => Outcome::NotFound,
        })
    }

    pub async fn get_resource(&self, raw: &str) -> Result<Outcome<Document>, IdentityError> {
        Ok(match self.resolve_resource(raw).await? {
            Resolution::Found(resource) => Outcome::Applied(resource.document),
            Resolution::NotFound => Outcome::NotFound,
        })
    }

    pub async fn create_resource(
        &self,
        actor: &Actor,
        tenant_raw: &str,
        input: NewResource,
    ) -> Result<Outcome<Document>, IdentityError> {
        let mut document = Map::new();
        if let Some(sku) = input.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if self.resolve_resource(sku).await?.is_found() {
                return Err(IdentityError::InvalidInput(format!("sku '{}' is already in use", sku)));
            }
            document.insert("sku".to_string(), Value::String(sku.to_string()));
        }
        if let Some(category) = input.category {
            document.insert("category".to_string(), Value::String(category));
        }
        if let Some(price) = input.price {
            if price.is_sign_negative() {
                return Err(IdentityError::InvalidInput("price cannot be negative".to_string()));
            }
            document.insert("price".to_string(), Value::String(price.normalize().to_string()));
        }
        if let Some(stock) = input.stock {
            if stock < 0 {
                return Err(IdentityError::InvalidInput("stock cannot be negative".to_string()));
            }
            document.insert("stock".to_string(), Value::from(stock));
        }

        let Some(tenant) = self.resolve_tenant(tenant_raw).await?.found() else {
            return Ok(Outcome::NotFound);
        };
        if !self.authorized(actor, &tenant.document) {
            return Ok(Outcome::Unauthorized);
        }

        let mutation = Mutation::AddResource { document };
        if let QuotaDecision::QuotaExceeded { limit } = self.authorize_mutation(&tenant.document, None, &mutation).await? {
            return Ok(Outcome::QuotaExceeded { limit });
        }
        match self.gateway.apply(&tenant, &mutation, Limit::Unlimited).await? {
            Applied::Created(resource) => Ok(Outcome::Applied(resource)),
            other => Err(IdentityError::InvalidInput(format!("unexpected insert result {:?}", other))),
        }
    }

    pub async fn attach_image(&self, actor: &Actor, resource_raw: &str, url: &str) -> Result<Outcome<Applied>, IdentityError> {
        let url = validate_image_url(url)?;
        self.modify_resource(actor, resource_raw, Mutation::AddImage { url }).await
    }

    pub async fn detach_image(&self, actor: &Actor, resource_raw: &str, url: &str) -> Result<Outcome<Applied>, IdentityError> {
        let url = validate_image_url(url)?;
        self.modify_resource(actor, resource_raw, Mutation::RemoveImage { url }).await
    }

    pub async fn delete_resource(&self, actor: &Actor, resource_raw: &str) -> Result<Outcome<u64>, IdentityError> {
        let Some((resource, tenant)) = self.resource_with_tenant(resource_raw).await? else {
            return Ok(Outcome::NotFound);
        };
        if !self.authorized_for_resource(actor, tenant.as_ref()) {
            return Ok(Outcome::Unauthorized);
        }
        let deleted = self.store.delete_many(Collection::Resources, &resource.primary).await?;
        Ok(Outcome::Applied(deleted))
    }

    /// Store the bytes under a name scoped to the tenant and resource, then
    /// attach the URL. The blob is removed again when the attach does not go
    /// through.
    pub async fn upload_image(
        &self,
        actor: &Actor,
        resource_raw: &str,
        blobs: &dyn BlobStorage,
        name: &str,
        bytes: &[u8],
    ) -> Result<Outcome<String>, IdentityError> {
        let Some((resource, tenant)) = self.resource_with_tenant(resource_raw).await? else {
            return Ok(Outcome::NotFound);
        };
        if !self.authorized_for_resource(actor, tenant.as_ref()) {
            return Ok(Outcome::Unauthorized);
        }
        let next_image = Mutation::AddImage { url: String::new() };
        if let Some(limit) = self.image_quota_exceeded(tenant.as_ref(), &resource.document, &next_image).await? {
            return Ok(Outcome::QuotaExceeded { limit });
        }

        let scope = |entity: Option<&Resolved>| entity.and_then(Resolved::id).map(|id| id.to_string());
        let tenant_scope = scope(tenant.as_ref()).unwrap_or_else(|| "orphan".to_string());
        let resource_scope = scope(Some(&resource)).unwrap_or_default();
        let stored = blob::scoped_name(&tenant_scope, &resource_scope, name)?;

        let url = blobs.put(&stored, bytes).await?;
        let attached = self.attach_image(actor, resource_raw, &url).await;
        match attached {
            Ok(Outcome::Applied(_)) => Ok(Outcome::Applied(url)),
            other => {
                if let Err(e) = blobs.delete(&stored).await {
                    warn!("Failed to remove orphaned blob {}: {}", stored, e);
                }
                other.map(|outcome| outcome.map(|_| url))
            }
        }
    }

    async fn modify_resource(&self, actor: &Actor, raw: &str, mutation: Mutation) -> Result<Outcome<Applied>, IdentityError> {
        let mut attempt = 0;
        loop {
            let Some((resource, tenant)) = self.resource_with_tenant(raw).await? else {
                return Ok(Outcome::NotFound);
            };
            if !self.authorized_for_resource(actor, tenant.as_ref()) {
                return Ok(Outcome::Unauthorized);
            }

            let policy = match &tenant {
                Some(t) => self.quota.policy_for(&t.document).await?,
                None => self.catalog().default_policy(),
            };
            let tenant_doc = tenant.map(|t| t.document).unwrap_or_default();
            let decision = self
                .quota
                .authorize_with(&policy, &tenant_doc, Some(&resource.document), &mutation)
                .await?;
            if let QuotaDecision::QuotaExceeded { limit } = decision {
                return Ok(Outcome::QuotaExceeded { limit });
            }

            match self.gateway.apply(&resource, &mutation, policy.max_images_per_resource).await {
                Ok(applied) => return Ok(Outcome::Applied(applied)),
                Err(e) if e.is_retryable() && attempt < self.config.write_retries => {
                    attempt += 1;
                    debug!("Retrying {} on resource {} ({})", mutation.name(), raw, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn image_quota_exceeded(
        &self,
        tenant: Option<&Resolved>,
        resource: &Document,
        mutation: &Mutation,
    ) -> Result<Option<u32>, IdentityError> {
        let policy = match tenant {
            Some(t) => self.quota.policy_for(&t.document).await?,
            None => self.catalog().default_policy(),
        };
        let empty = Document::new();
        let tenant_doc = tenant.map(|t| &t.document).unwrap_or(&empty);
        Ok(match self.quota.authorize_with(&policy, tenant_doc, Some(resource), mutation).await? {
            QuotaDecision::QuotaExceeded { limit } => Some(limit),
            QuotaDecision::Authorized => None,
        })
    }

    async fn resource_with_tenant(&self, raw: &str) -> Result<Option<(Resolved, Option<Resolved>)>, IdentityError> {
        let Some(resource) = self.resolve_resource(raw).await?.found() else {
            return Ok(None);
        };
        let tenant = self.tenant_of(&resource.document).await?;
        Ok(Some((resource, tenant)))
    }

    async fn tenant_of(&self, resource: &Document) -> Result<Option<Resolved>, IdentityError> {
        let Some(tenant_id) = resource.get("tenantId").and_then(IdRef::from_value) else {
            warn!("Resource {} has no tenantId", resource.id_ref().map(|i| i.to_string()).unwrap_or_default());
            return Ok(None);
        };
        Ok(self.resolve_tenant(tenant_id.raw()).await?.found())
    }

    fn authorized(&self, actor: &Actor, tenant: &Document) -> bool {
        if actor.admin || self.verifier.verifies(tenant, &actor.id) {
            return true;
        }
        info!("Principal denied access to tenant");
        false
    }

    /// Orphaned resources are reachable by admins only
    fn authorized_for_resource(&self, actor: &Actor, tenant: Option<&Resolved>) -> bool {
        match tenant {
            Some(tenant) => self.authorized(actor, &tenant.document),
            None => actor.admin,
        }
    }

    async fn reload(&self, entity: &Resolved) -> Result<Option<Document>, IdentityError> {
        Ok(self.store.find_one(entity.collection(), &entity.primary).await?)
    }
}

fn validate_image_url(url: &str) -> Result<String, IdentityError> {
    let url = url.trim();
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidInput("image url must be a non-empty string without spaces".to_string()));
    }
    Ok(url.to_string())
}

/// First 6 hex chars of SHA-256(base ‖ id ‖ attempt)
fn slug_suffix(base: &str, id: Uuid, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    hasher.update(id.as_bytes());
    hasher.update(attempt.to_be_bytes());
    hasher.finalize().iter().take(3).map(|b| format!("{:02x}", b)).collect()
}
