//! In-process document store.
//! Natural order is insertion order; every operation holds the collection
//! lock for its full duration, so array operators are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::database::document::{Document, IdRef, ID_FIELDS};
use crate::database::store::{DocumentStore, StoreError, Update, UpdateResult};
use crate::filter::Filter;
use crate::types::Collection;

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Map<String, Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load raw documents as-is, bypassing duplicate checks (legacy fixtures)
    pub async fn seed(&self, collection: Collection, documents: impl IntoIterator<Item = Value>) {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        for value in documents {
            if let Value::Object(map) = value {
                docs.push(map);
            }
        }
    }

    pub async fn all(&self, collection: Collection) -> Vec<Document> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .map(|docs| docs.iter().cloned().map(Document::from_stored).collect())
            .unwrap_or_default()
    }

    fn first_match(docs: &[Map<String, Value>], filter: &Filter) -> Option<usize> {
        docs.iter().position(|d| filter.matches(d))
    }

    fn same_id(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
        let id_of = |m: &Map<String, Value>| ID_FIELDS.iter().find_map(|f| m.get(*f).and_then(IdRef::from_value));
        match (id_of(a), id_of(b)) {
            (Some(x), Some(y)) => x.matches(&y),
            _ => false,
        }
    }

    /// Tenant slugs are unique, matching the partial index on Postgres
    fn same_slug(collection: Collection, a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
        if collection != Collection::Tenants {
            return false;
        }
        match (a.get("slug").and_then(Value::as_str), b.get("slug").and_then(Value::as_str)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&filter.collection()) else {
            return Ok(vec![]);
        };
        let matched = docs
            .iter()
            .filter(|d| filter.matches(d))
            .skip(filter.offset_value().unwrap_or(0))
            .take(filter.limit_value().unwrap_or(usize::MAX))
            .cloned()
            .map(Document::from_stored)
            .collect();
        Ok(matched)
    }

    async fn count(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError> {
        let filter = Filter::parse(collection, predicate)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert_one(&self, collection: Collection, document: &Document) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        let incoming = document.as_map();
        if docs.iter().any(|existing| Self::same_id(existing, incoming)) {
            return Err(StoreError::Duplicate(format!(
                "{} already contains id {}",
                collection,
                document.id_ref().map(|i| i.to_string()).unwrap_or_default()
            )));
        }
        if docs.iter().any(|existing| Self::same_slug(collection, existing, incoming)) {
            return Err(StoreError::Duplicate(format!(
                "{} already contains slug {}",
                collection,
                incoming.get("slug").and_then(Value::as_str).unwrap_or_default()
            )));
        }
        docs.push(incoming.clone());
        Ok(())
    }

    async fn update_one(
        &self,
        collection: Collection,
        predicate: &Value,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        let filter = Filter::parse(collection, predicate)?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(UpdateResult::none());
        };
        let Some(index) = Self::first_match(docs, &filter) else {
            return Ok(UpdateResult::none());
        };

        let doc = &mut docs[index];
        let before = doc.clone();
        for key in &update.unset {
            doc.remove(key);
        }
        for (key, value) in &update.set {
            doc.insert(key.clone(), value.clone());
        }
        Ok(UpdateResult::one(*doc != before))
    }

    async fn push_to_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: Value,
        max_len: Option<usize>,
    ) -> Result<UpdateResult, StoreError> {
        let filter = Filter::parse(collection, predicate)?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(UpdateResult::none());
        };
        let Some(index) = Self::first_match(docs, &filter) else {
            return Ok(UpdateResult::none());
        };

        let slot = docs[index].entry(field.to_string()).or_insert(Value::Null);
        if slot.is_null() {
            *slot = Value::Array(vec![]);
        }
        let Value::Array(items) = slot else {
            return Err(StoreError::ShapeMismatch(format!("field '{}' is not an array", field)));
        };
        if max_len.is_some_and(|max| items.len() >= max) {
            return Ok(UpdateResult::none());
        }
        items.push(value);
        Ok(UpdateResult::one(true))
    }

    async fn pull_from_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: &Value,
    ) -> Result<UpdateResult, StoreError> {
        let filter = Filter::parse(collection, predicate)?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(UpdateResult::none());
        };
        let Some(index) = Self::first_match(docs, &filter) else {
            return Ok(UpdateResult::none());
        };

        match docs[index].get_mut(field) {
            None | Some(Value::Null) => Ok(UpdateResult::one(false)),
            Some(Value::Array(items)) => {
                let before = items.len();
                items.retain(|item| item != value);
                Ok(UpdateResult::one(items.len() != before))
            }
            Some(_) => Err(StoreError::ShapeMismatch(format!("field '{}' is not an array", field))),
        }
    }

    async fn delete_many(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError> {
        let filter = Filter::parse(collection, predicate)?;
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn find_returns_natural_order() {
        let store = MemoryStore::new();
        store.seed(Collection::Tenants, vec![
            json!({ "id": "a", "name": "X" }),
            json!({ "id": "b", "name": "X" }),
        ]).await;

        let filter = Filter::parse(Collection::Tenants, &json!({ "name": "X" })).unwrap();
        let docs = store.find(&filter).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id_ref().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let store = MemoryStore::new();
        let mut doc = Document::new();
        doc.set_system_field("id", "t1");
        store.insert_one(Collection::Tenants, &doc).await.unwrap();
        let err = store.insert_one(Collection::Tenants, &doc).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_tenant_slugs() {
        let store = MemoryStore::new();
        for (id, collection) in [("t1", Collection::Tenants), ("r1", Collection::Resources), ("r2", Collection::Resources)] {
            let mut doc = Document::new();
            doc.set_system_field("id", id);
            doc.set("slug", "loja-x");
            store.insert_one(collection, &doc).await.unwrap();
        }

        let mut doc = Document::new();
        doc.set_system_field("id", "t2");
        doc.set("slug", "loja-x");
        let err = store.insert_one(Collection::Tenants, &doc).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn guarded_push_stops_at_max_len() {
        let store = MemoryStore::new();
        store.seed(Collection::Resources, vec![json!({ "id": "r1", "images": ["a.png"] })]).await;
        let pred = json!({ "id": "r1" });

        let first = store.push_to_array(Collection::Resources, &pred, "images", json!("b.png"), Some(2)).await.unwrap();
        assert_eq!(first.matched, 1);
        let second = store.push_to_array(Collection::Resources, &pred, "images", json!("c.png"), Some(2)).await.unwrap();
        assert_eq!(second.matched, 0);

        let doc = store.find_one(Collection::Resources, &pred).await.unwrap().unwrap();
        assert_eq!(doc.string_list("images"), vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn array_operators_reject_scalar_fields() {
        let store = MemoryStore::new();
        store.seed(Collection::Resources, vec![json!({ "id": "r1", "images": "a.png" })]).await;
        let pred = json!({ "id": "r1" });
        let err = store.push_to_array(Collection::Resources, &pred, "images", json!("b.png"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch(_)));
    }

    #[tokio::test]
    async fn update_one_touches_first_match_only() {
        let store = MemoryStore::new();
        store.seed(Collection::Tenants, vec![
            json!({ "id": "a", "slug": "x" }),
            json!({ "id": "b", "slug": "x" }),
        ]).await;
        let update = Update::default().set("active", false).unset("slug");
        let result = store.update_one(Collection::Tenants, &json!({ "slug": "x" }), &update).await.unwrap();
        assert_eq!(result, UpdateResult::one(true));

        let docs = store.all(Collection::Tenants).await;
        assert_eq!(docs[0].get("active"), Some(&json!(false)));
        assert!(docs[0].get("slug").is_none());
        assert_eq!(docs[1].get("slug"), Some(&json!("x")));
    }
}
