//! Persists mutations against a resolved entity.
//!
//! Writes are whole-field replacements computed from the resolved snapshot.
//! The primary predicate addresses the document by its stored id; if the
//! store rejects it or it misses, the resolver's fallback `$or` is tried
//! once. An atomic array operator is used only when the replacement itself
//! is rejected for its shape.

use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::document::Document;
use crate::database::store::{StoreError, Update, UpdateResult};
use crate::identity::error::IdentityError;
use crate::identity::plans::Limit;
use crate::identity::resolver::Resolved;
use crate::identity::SharedStore;
use crate::types::{Collection, Mutation};

pub const IMAGES_FIELD: &str = "images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePath {
    Primary,
    Fallback,
    Atomic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Modified { path: WritePath },
    /// The document already reflected the mutation
    Unchanged,
    Created(Document),
}

enum Attempt {
    Written,
    Missed,
    Rejected,
    ShapeRejected,
}

pub struct MutationGateway {
    store: SharedStore,
    compare_and_swap: bool,
}

impl MutationGateway {
    pub fn new(store: SharedStore, compare_and_swap: bool) -> Self {
        Self { store, compare_and_swap }
    }

    /// Apply `mutation` to `entity`. `image_limit` bounds the atomic append.
    pub async fn apply(&self, entity: &Resolved, mutation: &Mutation, image_limit: Limit) -> Result<Applied, IdentityError> {
        match mutation {
            Mutation::AddImage { url } | Mutation::RemoveImage { url } => {
                self.replace_images(entity, mutation, url, image_limit).await
            }
            Mutation::UpdateTenant { fields } => self.update_fields(entity, fields).await,
            Mutation::AddResource { document } => self.insert_resource(entity, document).await,
        }
    }

    async fn replace_images(
        &self,
        entity: &Resolved,
        mutation: &Mutation,
        url: &str,
        image_limit: Limit,
    ) -> Result<Applied, IdentityError> {
        let current = entity.document.string_list(IMAGES_FIELD);
        let adding = matches!(mutation, Mutation::AddImage { .. });

        let next: Vec<String> = if adding {
            if current.iter().any(|u| u == url) {
                return Ok(Applied::Unchanged);
            }
            current.iter().cloned().chain(std::iter::once(url.to_string())).collect()
        } else {
            if !current.iter().any(|u| u == url) {
                return Ok(Applied::Unchanged);
            }
            current.iter().filter(|u| *u != url).cloned().collect()
        };

        let mut document = entity.document.clone();
        document.set(IMAGES_FIELD, next).touch_updated_at();
        let update = document.pending_update();
        let guard = self
            .compare_and_swap
            .then(|| json!({ IMAGES_FIELD: entity.document.list_snapshot(IMAGES_FIELD) }));

        match self.replace(entity, &update, guard.as_ref()).await? {
            Some(path) => Ok(Applied::Modified { path }),
            None => {
                warn!("{} on {}: replacement shape rejected, using atomic operator", mutation.name(), entity.collection());
                self.atomic_images(entity, adding, url, image_limit).await
            }
        }
    }

    async fn update_fields(&self, entity: &Resolved, fields: &Map<String, Value>) -> Result<Applied, IdentityError> {
        let mut document = entity.document.clone();
        for (key, value) in fields {
            document.set(key.clone(), value.clone());
        }
        if !document.has_changes() {
            return Ok(Applied::Unchanged);
        }
        document.touch_updated_at();
        let update = document.pending_update();

        match self.replace(entity, &update, None).await? {
            Some(path) => Ok(Applied::Modified { path }),
            None => Err(IdentityError::WriteConflict(format!(
                "{} rejected field replacement",
                entity.collection()
            ))),
        }
    }

    async fn insert_resource(&self, tenant: &Resolved, fields: &Map<String, Value>) -> Result<Applied, IdentityError> {
        let tenant_id = tenant
            .document
            .id_field()
            .map(|(_, value)| value.clone())
            .or_else(|| tenant.document.get("lojaId").cloned())
            .ok_or_else(|| IdentityError::InvalidInput("tenant has no id to own resources".to_string()))?;

        let mut document = Document::from_json(Value::Object(fields.clone()))?;
        document
            .set_id(Uuid::new_v4())
            .set("tenantId", tenant_id)
            .stamp_created();
        if document.get(IMAGES_FIELD).is_none() {
            document.set(IMAGES_FIELD, Vec::<String>::new());
        }

        self.store.insert_one(Collection::Resources, &document).await?;
        document.commit();
        Ok(Applied::Created(document))
    }

    /// Primary then fallback. `Ok(None)` means the shape was rejected.
    async fn replace(&self, entity: &Resolved, update: &Update, guard: Option<&Value>) -> Result<Option<WritePath>, IdentityError> {
        let collection = entity.collection();

        match self.try_update(collection, &entity.primary, update, guard).await? {
            Attempt::Written => return Ok(Some(WritePath::Primary)),
            Attempt::ShapeRejected => return Ok(None),
            Attempt::Missed | Attempt::Rejected => {}
        }

        let fallback = entity.fallback.as_ref().filter(|f| **f != entity.primary);
        let Some(fallback) = fallback else {
            return Err(IdentityError::WriteConflict(format!("primary predicate missed on {}", collection)));
        };
        debug!("Primary write on {} missed, retrying with fallback predicate", collection);

        match self.try_update(collection, fallback, update, guard).await? {
            Attempt::Written => Ok(Some(WritePath::Fallback)),
            Attempt::ShapeRejected => Ok(None),
            Attempt::Missed | Attempt::Rejected => Err(IdentityError::WriteConflict(format!(
                "primary and fallback predicates missed on {}",
                collection
            ))),
        }
    }

    async fn try_update(
        &self,
        collection: Collection,
        predicate: &Value,
        update: &Update,
        guard: Option<&Value>,
    ) -> Result<Attempt, StoreError> {
        let predicate = guarded(predicate, guard);
        match self.store.update_one(collection, &predicate, update).await {
            Ok(UpdateResult { matched: 0, .. }) => Ok(Attempt::Missed),
            Ok(_) => Ok(Attempt::Written),
            Err(StoreError::InvalidPredicate(reason)) => {
                debug!("Write predicate rejected on {}: {}", collection, reason);
                Ok(Attempt::Rejected)
            }
            Err(StoreError::ShapeMismatch(reason)) => {
                debug!("Write shape rejected on {}: {}", collection, reason);
                Ok(Attempt::ShapeRejected)
            }
            Err(e) => Err(e),
        }
    }

    async fn atomic_images(&self, entity: &Resolved, adding: bool, url: &str, image_limit: Limit) -> Result<Applied, IdentityError> {
        let collection = entity.collection();
        let url = Value::String(url.to_string());
        let result = if adding {
            let max_len = image_limit.value().map(|n| n as usize);
            self.store
                .push_to_array(collection, &entity.primary, IMAGES_FIELD, url, max_len)
                .await?
        } else {
            self.store
                .pull_from_array(collection, &entity.primary, IMAGES_FIELD, &url)
                .await?
        };

        if result.matched == 0 {
            return Err(IdentityError::WriteConflict(format!(
                "atomic {} on {} did not match",
                if adding { "append" } else { "remove" },
                collection
            )));
        }
        Ok(Applied::Modified { path: WritePath::Atomic })
    }
}

fn guarded(predicate: &Value, guard: Option<&Value>) -> Value {
    match guard {
        Some(guard) => json!({ "$and": [predicate, guard] }),
        None => predicate.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::store::DocumentStore;
    use crate::identity::resolver::EntityResolver;
    use crate::types::EntityKind;
    use std::sync::Arc;

    async fn setup(docs: Vec<Value>) -> (Arc<MemoryStore>, EntityResolver, MutationGateway) {
        let store = Arc::new(MemoryStore::new());
        store.seed(Collection::Resources, docs).await;
        let resolver = EntityResolver::new(store.clone(), 5);
        let gateway = MutationGateway::new(store.clone(), true);
        (store, resolver, gateway)
    }

    fn add(url: &str) -> Mutation {
        Mutation::AddImage { url: url.to_string() }
    }

    #[tokio::test]
    async fn test_append_replaces_whole_list() {
        let (store, resolver, gateway) = setup(vec![json!({ "id": "r1", "images": ["a.png"] })]).await;
        let entity = resolver.resolve_raw(EntityKind::Resource, "r1").await.unwrap().found().unwrap();

        let applied = gateway.apply(&entity, &add("b.png"), Limit::AtMost(2)).await.unwrap();
        assert_eq!(applied, Applied::Modified { path: WritePath::Primary });

        let doc = store.find_one(Collection::Resources, &json!({ "id": "r1" })).await.unwrap().unwrap();
        assert_eq!(doc.string_list("images"), vec!["a.png", "b.png"]);
        assert!(doc.updated_at().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_append_is_unchanged() {
        let (_, resolver, gateway) = setup(vec![json!({ "id": "r1", "images": ["a.png"] })]).await;
        let entity = resolver.resolve_raw(EntityKind::Resource, "r1").await.unwrap().found().unwrap();
        assert_eq!(gateway.apply(&entity, &add("a.png"), Limit::Unlimited).await.unwrap(), Applied::Unchanged);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_a_conflict() {
        let (store, resolver, gateway) = setup(vec![json!({ "id": "r1", "images": ["a.png"] })]).await;
        let entity = resolver.resolve_raw(EntityKind::Resource, "r1").await.unwrap().found().unwrap();

        // a concurrent writer lands first
        store
            .update_one(Collection::Resources, &json!({ "id": "r1" }), &Update::default().set("images", json!(["a.png", "z.png"])))
            .await
            .unwrap();

        let err = gateway.apply(&entity, &add("b.png"), Limit::Unlimited).await.unwrap_err();
        assert!(err.is_retryable());
        let doc = store.find_one(Collection::Resources, &json!({ "id": "r1" })).await.unwrap().unwrap();
        assert_eq!(doc.string_list("images"), vec!["a.png", "z.png"]);
    }

    #[tokio::test]
    async fn test_legacy_scalar_images_are_normalized() {
        let (store, resolver, gateway) = setup(vec![json!({ "_id": "r1", "images": "a.png" })]).await;
        let entity = resolver.resolve_raw(EntityKind::Resource, "r1").await.unwrap().found().unwrap();

        gateway.apply(&entity, &add("b.png"), Limit::Unlimited).await.unwrap();
        let doc = store.find_one(Collection::Resources, &json!({ "_id": "r1" })).await.unwrap().unwrap();
        assert_eq!(doc.get("images"), Some(&json!(["a.png", "b.png"])));
    }

    #[tokio::test]
    async fn test_remove_image() {
        let (store, resolver, gateway) = setup(vec![json!({ "id": "r1", "images": ["a.png", "b.png"] })]).await;
        let entity = resolver.resolve_raw(EntityKind::Resource, "r1").await.unwrap().found().unwrap();

        let removed = Mutation::RemoveImage { url: "a.png".to_string() };
        gateway.apply(&entity, &removed, Limit::Unlimited).await.unwrap();
        let doc = store.find_one(Collection::Resources, &json!({ "id": "r1" })).await.unwrap().unwrap();
        assert_eq!(doc.string_list("images"), vec!["b.png"]);
    }
}
