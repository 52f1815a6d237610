//! Resolves candidate keys to exactly one stored document.

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::database::document::{Document, IdRef};
use crate::database::store::StoreError;
use crate::filter::Filter;
use crate::identity::normalizer::{normalize, CandidateKeys};
use crate::identity::SharedStore;
use crate::types::{Collection, EntityKind};

/// Fields each entity kind can be looked up by, beyond the canonical `id`
struct LookupFields {
    /// Matched by raw equality (and id equality when the raw value parses)
    legacy_ids: &'static [&'static str],
    /// Slug-like fields matched against the slug and normalized candidates
    keys: &'static [&'static str],
}

fn lookup_fields(kind: EntityKind) -> LookupFields {
    match kind {
        EntityKind::Tenant => LookupFields {
            legacy_ids: &["_id", "lojaId"],
            keys: &["slug", "normalizedName"],
        },
        EntityKind::Resource => LookupFields {
            legacy_ids: &["_id"],
            keys: &["sku"],
        },
        EntityKind::Principal => LookupFields {
            legacy_ids: &["_id"],
            keys: &[],
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    CanonicalId,
    Fallback,
}

/// More than one stored document answered to the same identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageInconsistency {
    pub collection: Collection,
    pub candidates: usize,
    pub chosen: Option<String>,
}

/// A successfully resolved entity and the predicates that address it
#[derive(Debug, Clone)]
pub struct Resolved {
    pub kind: EntityKind,
    pub document: Document,
    pub matched_by: MatchedBy,
    /// Equality on the document's stored id value, exactly as stored
    pub primary: Value,
    /// The `$or` lookup the resolver falls back to
    pub fallback: Option<Value>,
    pub inconsistency: Option<StorageInconsistency>,
}

impl Resolved {
    pub fn collection(&self) -> Collection {
        self.kind.collection()
    }

    pub fn id(&self) -> Option<IdRef> {
        self.document.id_ref()
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Found(Resolved),
    NotFound,
}

impl Resolution {
    pub fn found(self) -> Option<Resolved> {
        match self {
            Resolution::Found(resolved) => Some(resolved),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

pub struct EntityResolver {
    store: SharedStore,
    probe_limit: usize,
}

impl EntityResolver {
    pub fn new(store: SharedStore, probe_limit: usize) -> Self {
        Self {
            store,
            probe_limit: probe_limit.max(1),
        }
    }

    pub async fn resolve_raw(&self, kind: EntityKind, raw: &str) -> Result<Resolution, StoreError> {
        self.resolve(kind, &normalize(raw)).await
    }

    /// Exact canonical-id match first; on a rejected predicate or no match,
    /// one `$or` query across every remaining lookup field.
    pub async fn resolve(&self, kind: EntityKind, candidates: &CandidateKeys) -> Result<Resolution, StoreError> {
        if candidates.is_empty() {
            return Ok(Resolution::NotFound);
        }
        let collection = kind.collection();
        let fallback = Self::fallback_predicate(kind, candidates);

        if let Some(primary) = Self::canonical_predicate(candidates) {
            match self.probe(collection, &primary).await {
                Ok(found) if !found.is_empty() => {
                    return Ok(self.finish(kind, found, MatchedBy::CanonicalId, fallback));
                }
                Ok(_) => debug!("No {} matched canonical id {}", kind, candidates.raw()),
                Err(StoreError::InvalidPredicate(reason)) => {
                    debug!("Canonical lookup for {} rejected ({}), falling back", candidates.raw(), reason);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(predicate) = fallback.clone() else {
            return Ok(Resolution::NotFound);
        };
        match self.probe(collection, &predicate).await {
            Ok(found) if !found.is_empty() => {
                let found = Self::rank_exact_first(kind, candidates, found);
                Ok(self.finish(kind, found, MatchedBy::Fallback, fallback))
            }
            Ok(_) => {
                debug!("No {} matched {}", kind, candidates.raw());
                Ok(Resolution::NotFound)
            }
            Err(StoreError::InvalidPredicate(reason)) => {
                warn!("Fallback lookup for {} {} rejected: {}", kind, candidates.raw(), reason);
                Ok(Resolution::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    /// `{"id": {"$in": [...]}}` over every stored shape of the canonical id
    pub fn canonical_predicate(candidates: &CandidateKeys) -> Option<Value> {
        let id = candidates.canonical_id()?;
        let representations = IdRef::parse(candidates.raw())
            .filter(|r| r.canonical() == Some(id))
            .map(|r| r.representations())
            .unwrap_or_default();
        Some(json!({ "id": { "$in": representations } }))
    }

    pub fn fallback_predicate(kind: EntityKind, candidates: &CandidateKeys) -> Option<Value> {
        let fields = lookup_fields(kind);
        let mut branches = Vec::new();

        let mut keys: Vec<&str> = Vec::new();
        for key in [candidates.slug(), candidates.normalized_name()].into_iter().flatten() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        for field in fields.keys {
            if !keys.is_empty() {
                branches.push(json!({ *field: { "$in": keys } }));
            }
        }

        if let Some(id) = IdRef::parse(candidates.raw()) {
            let representations = id.representations();
            for field in std::iter::once(&"id").chain(fields.legacy_ids.iter()) {
                branches.push(json!({ *field: { "$in": representations } }));
            }
        }

        match branches.len() {
            0 => None,
            1 => branches.pop(),
            _ => Some(json!({ "$or": branches })),
        }
    }

    /// Documents whose primary key field (`slug`, `sku`) equals a candidate
    /// move ahead of name matches, so a slug is never shadowed by another
    /// tenant's normalized name. Natural order holds within each group.
    fn rank_exact_first(kind: EntityKind, candidates: &CandidateKeys, mut found: Vec<Document>) -> Vec<Document> {
        let Some(field) = lookup_fields(kind).keys.first().copied() else {
            return found;
        };
        let exact = |doc: &Document| {
            doc.str_field(field)
                .is_some_and(|v| Some(v) == candidates.slug() || Some(v) == candidates.normalized_name())
        };
        found.sort_by_key(|doc| !exact(doc));
        found
    }

    async fn probe(&self, collection: Collection, predicate: &Value) -> Result<Vec<Document>, StoreError> {
        let mut filter = Filter::parse(collection, predicate)?;
        filter.limit(Some(self.probe_limit), None);
        self.store.find(&filter).await
    }

    fn finish(&self, kind: EntityKind, mut found: Vec<Document>, matched_by: MatchedBy, fallback: Option<Value>) -> Resolution {
        let candidates = found.len();
        let document = found.swap_remove(0);
        let chosen = document.id_ref().map(|id| id.to_string());

        let inconsistency = (candidates > 1).then(|| {
            warn!(
                collection = %kind.collection(),
                candidates,
                chosen = chosen.as_deref().unwrap_or("<none>"),
                "Storage inconsistency: identifier matched multiple documents, using first"
            );
            StorageInconsistency {
                collection: kind.collection(),
                candidates,
                chosen: chosen.clone(),
            }
        });

        let primary = match document.id_field() {
            Some((field, value)) => {
                let mut map = Map::new();
                map.insert(field.to_string(), value.clone());
                Value::Object(map)
            }
            None => fallback.clone().unwrap_or_else(|| json!({})),
        };

        Resolution::Found(Resolved {
            kind,
            document,
            matched_by,
            primary,
            fallback,
            inconsistency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use std::sync::Arc;

    async fn resolver_with(collection: Collection, docs: Vec<Value>) -> EntityResolver {
        let store = MemoryStore::new();
        store.seed(collection, docs).await;
        EntityResolver::new(Arc::new(store), 5)
    }

    #[tokio::test]
    async fn test_resolves_by_each_key() {
        let id = uuid::Uuid::new_v4();
        let resolver = resolver_with(Collection::Tenants, vec![
            json!({ "id": id.to_string(), "slug": "minha-loja", "normalizedName": "loja-x" }),
        ]).await;

        for raw in [id.to_string(), "minha-loja".to_string(), "loja-x".to_string(), "LOJA-X".to_string()] {
            let resolved = resolver.resolve_raw(EntityKind::Tenant, &raw).await.unwrap().found().unwrap();
            assert_eq!(resolved.id().unwrap().canonical(), Some(id), "raw {}", raw);
        }
    }

    #[tokio::test]
    async fn test_canonical_hit_uses_stored_shape_for_primary() {
        let id = uuid::Uuid::new_v4();
        let resolver = resolver_with(Collection::Tenants, vec![
            json!({ "id": { "$uuid": id.to_string() }, "slug": "typed" }),
        ]).await;

        let resolved = resolver.resolve_raw(EntityKind::Tenant, &id.to_string()).await.unwrap().found().unwrap();
        assert_eq!(resolved.matched_by, MatchedBy::CanonicalId);
        assert_eq!(resolved.primary, json!({ "id": { "$uuid": id.to_string() } }));
    }

    #[tokio::test]
    async fn test_legacy_id_fields_resolve() {
        let resolver = resolver_with(Collection::Tenants, vec![
            json!({ "lojaId": "legacy-42", "name": "Old" }),
        ]).await;

        let resolved = resolver.resolve_raw(EntityKind::Tenant, "legacy-42").await.unwrap().found().unwrap();
        assert_eq!(resolved.matched_by, MatchedBy::Fallback);
        assert_eq!(Some(resolved.primary.clone()), resolved.fallback);
    }

    #[tokio::test]
    async fn test_duplicates_resolve_to_first_and_are_flagged() {
        let resolver = resolver_with(Collection::Tenants, vec![
            json!({ "id": "a", "slug": "dup" }),
            json!({ "id": "b", "normalizedName": "dup" }),
        ]).await;

        let resolved = resolver.resolve_raw(EntityKind::Tenant, "dup").await.unwrap().found().unwrap();
        assert_eq!(resolved.id().unwrap().raw(), "a");
        let inconsistency = resolved.inconsistency.unwrap();
        assert_eq!(inconsistency.candidates, 2);
        assert_eq!(inconsistency.chosen.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_slug_match_ranks_ahead_of_name_match() {
        let resolver = resolver_with(Collection::Tenants, vec![
            json!({ "id": "renamed", "slug": "outra", "normalizedName": "loja-x" }),
            json!({ "id": "owner", "slug": "loja-x", "normalizedName": "loja-x-2" }),
        ]).await;

        let resolved = resolver.resolve_raw(EntityKind::Tenant, "loja-x").await.unwrap().found().unwrap();
        assert_eq!(resolved.id().unwrap().raw(), "owner");
        assert_eq!(resolved.inconsistency.unwrap().chosen.as_deref(), Some("owner"));

        let resolved = resolver.resolve_raw(EntityKind::Tenant, "outra").await.unwrap().found().unwrap();
        assert_eq!(resolved.id().unwrap().raw(), "renamed");
    }

    #[tokio::test]
    async fn test_upper_case_typed_id_resolves_canonically() {
        let id = uuid::Uuid::new_v4();
        let resolver = resolver_with(Collection::Tenants, vec![
            json!({ "id": { "$uuid": id.to_string().to_uppercase() }, "slug": "legada" }),
        ]).await;

        let resolved = resolver.resolve_raw(EntityKind::Tenant, &id.to_string()).await.unwrap().found().unwrap();
        assert_eq!(resolved.matched_by, MatchedBy::CanonicalId);
        assert_eq!(resolved.primary, json!({ "id": { "$uuid": id.to_string().to_uppercase() } }));
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_not_found() {
        let resolver = resolver_with(Collection::Resources, vec![json!({ "id": "r1", "sku": "A-1" })]).await;
        assert!(!resolver.resolve_raw(EntityKind::Resource, "nope").await.unwrap().is_found());
        assert!(!resolver.resolve_raw(EntityKind::Resource, "").await.unwrap().is_found());
    }

    #[test]
    fn test_fallback_predicate_shape() {
        let predicate = EntityResolver::fallback_predicate(EntityKind::Resource, &normalize("A-1")).unwrap();
        assert_eq!(
            predicate,
            json!({ "$or": [
                { "sku": { "$in": ["A-1", "a-1"] } },
                { "id": { "$in": ["A-1"] } },
                { "_id": { "$in": ["A-1"] } },
            ] })
        );
    }
}
