use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::database::document::Document;
use crate::filter::{Filter, FilterError};
use crate::types::Collection;

/// Errors from a document store backend
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store rejected the match criteria (malformed id, type mismatch)
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// The store rejected the shape of a write (e.g. array operation on a scalar)
    #[error("Write shape rejected: {0}")]
    ShapeMismatch(String),

    #[error("Duplicate document: {0}")]
    Duplicate(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Storage connection error: {0}")]
    Connection(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Failures that say nothing about the data and must propagate
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Backend(_) | StoreError::ConfigMissing(_)
        )
    }
}

impl From<FilterError> for StoreError {
    fn from(err: FilterError) -> Self {
        StoreError::InvalidPredicate(err.to_string())
    }
}

/// Whole-field replacement: `set` overwrites top-level fields, `unset` drops them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Map<String, Value>,
    pub unset: Vec<String>,
}

impl Update {
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

impl UpdateResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn one(modified: bool) -> Self {
        Self { matched: 1, modified: u64::from(modified) }
    }
}

/// Collection-scoped document storage.
///
/// Predicates use the `filter` where-clause language. Results come back in
/// the store's natural order; single-document operations act on the first
/// match in that order.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    async fn find_one(&self, collection: Collection, predicate: &Value) -> Result<Option<Document>, StoreError> {
        let mut filter = Filter::parse(collection, predicate)?;
        filter.limit(Some(1), None);
        Ok(self.find(&filter).await?.into_iter().next())
    }

    async fn count(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError>;

    async fn insert_one(&self, collection: Collection, document: &Document) -> Result<(), StoreError>;

    async fn update_one(
        &self,
        collection: Collection,
        predicate: &Value,
        update: &Update,
    ) -> Result<UpdateResult, StoreError>;

    /// Atomically append `value` to the array at `field`, only while its
    /// length is below `max_len`. A guard miss reports zero matches.
    async fn push_to_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: Value,
        max_len: Option<usize>,
    ) -> Result<UpdateResult, StoreError>;

    /// Atomically remove every element equal to `value` from the array at `field`
    async fn pull_from_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: &Value,
    ) -> Result<UpdateResult, StoreError>;

    async fn delete_many(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError>;

    /// Liveness probe used by `/health`
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
