#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use encarte_api::auth::{Claims, Role};
use encarte_api::config::IdentityConfig;
use encarte_api::database::{Document, DocumentStore, MemoryStore, StoreError, Update, UpdateResult};
use encarte_api::filter::Filter;
use encarte_api::identity::{IdentityService, PlanCatalog, SharedStore};
use encarte_api::types::Collection;

pub const JWT_SECRET: &str = "test-secret";

pub const OWNER: &str = "u1";
pub const STRANGER: &str = "u2";
pub const ADMIN: &str = "root";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// One legacy tenant per ownership shape, on the `start` plan, with one resource
pub async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(Collection::Tenants, vec![json!({
            "id": "t1",
            "name": "Loja X",
            "slug": "loja-x",
            "normalizedName": "loja-x",
            "plan": "start",
            "usuarioId": OWNER,
            "active": true
        })])
        .await;
    store
        .seed(Collection::Resources, vec![json!({
            "id": "r1",
            "tenantId": "t1",
            "sku": "camiseta-azul",
            "images": ["a.png"]
        })])
        .await;
    store
}

pub fn service(store: SharedStore) -> IdentityService {
    IdentityService::new(store, Arc::new(PlanCatalog::builtin()), IdentityConfig::default())
}

pub fn service_with(store: SharedStore, config: IdentityConfig) -> IdentityService {
    IdentityService::new(store, Arc::new(PlanCatalog::builtin()), config)
}

pub async fn tenant(store: &MemoryStore, predicate: Value) -> Document {
    store
        .find_one(Collection::Tenants, &predicate)
        .await
        .expect("tenant lookup")
        .expect("tenant exists")
}

pub async fn resource(store: &MemoryStore, predicate: Value) -> Document {
    store
        .find_one(Collection::Resources, &predicate)
        .await
        .expect("resource lookup")
        .expect("resource exists")
}

pub fn token(sub: &str, role: Role) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: sub.to_string(),
        role,
        exp: now + 3600,
        iat: now,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).expect("encode token")
}

pub fn bearer(sub: &str, role: Role) -> String {
    format!("Bearer {}", token(sub, role))
}

/// Wraps a `MemoryStore` and injects the failures a backend with typed
/// columns produces, plus concurrent writers.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    reject_finds: AtomicUsize,
    reject_updates_matching: Mutex<Option<String>>,
    shape_reject_updates: AtomicUsize,
    before_update: Mutex<Vec<(Collection, Value, Update)>>,
    before_insert: Mutex<Vec<(Collection, Value)>>,
    pub updates_seen: Mutex<Vec<Value>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            reject_finds: AtomicUsize::new(0),
            reject_updates_matching: Mutex::new(None),
            shape_reject_updates: AtomicUsize::new(0),
            before_update: Mutex::new(Vec::new()),
            before_insert: Mutex::new(Vec::new()),
            updates_seen: Mutex::new(Vec::new()),
        })
    }

    /// The next `n` finds fail with `InvalidPredicate`
    pub fn reject_next_finds(&self, n: usize) {
        self.reject_finds.store(n, Ordering::SeqCst);
    }

    /// Updates whose predicate serializes to text containing `needle` are rejected
    pub fn reject_updates_containing(&self, needle: &str) {
        *self.reject_updates_matching.lock().unwrap() = Some(needle.to_string());
    }

    /// The next `n` updates fail with `ShapeMismatch`
    pub fn shape_reject_next_updates(&self, n: usize) {
        self.shape_reject_updates.store(n, Ordering::SeqCst);
    }

    /// Apply `update` directly to the inner store right before the next update
    pub fn race_next_update(&self, collection: Collection, predicate: Value, update: Update) {
        self.before_update.lock().unwrap().push((collection, predicate, update));
    }

    /// Seed `document` into the inner store right before the next insert,
    /// as a concurrent writer would between a check and its insert
    pub fn race_next_insert(&self, collection: Collection, document: Value) {
        self.before_insert.lock().unwrap().push((collection, document));
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        if Self::take(&self.reject_finds) {
            return Err(StoreError::InvalidPredicate("invalid input syntax for type uuid".to_string()));
        }
        self.inner.find(filter).await
    }

    async fn count(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError> {
        self.inner.count(collection, predicate).await
    }

    async fn insert_one(&self, collection: Collection, document: &Document) -> Result<(), StoreError> {
        let racing: Vec<_> = self.before_insert.lock().unwrap().drain(..).collect();
        for (c, doc) in racing {
            self.inner.seed(c, vec![doc]).await;
        }
        self.inner.insert_one(collection, document).await
    }

    async fn update_one(&self, collection: Collection, predicate: &Value, update: &Update) -> Result<UpdateResult, StoreError> {
        self.updates_seen.lock().unwrap().push(predicate.clone());

        let racing: Vec<_> = self.before_update.lock().unwrap().drain(..).collect();
        for (c, p, u) in racing {
            self.inner.update_one(c, &p, &u).await?;
        }

        let needle = self.reject_updates_matching.lock().unwrap().clone();
        if let Some(needle) = needle {
            if predicate.to_string().contains(&needle) {
                return Err(StoreError::InvalidPredicate(format!("rejected predicate {}", predicate)));
            }
        }
        if Self::take(&self.shape_reject_updates) {
            return Err(StoreError::ShapeMismatch("cannot replace array column".to_string()));
        }
        self.inner.update_one(collection, predicate, update).await
    }

    async fn push_to_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: Value,
        max_len: Option<usize>,
    ) -> Result<UpdateResult, StoreError> {
        self.inner.push_to_array(collection, predicate, field, value, max_len).await
    }

    async fn pull_from_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: &Value,
    ) -> Result<UpdateResult, StoreError> {
        self.inner.pull_from_array(collection, predicate, field, value).await
    }

    async fn delete_many(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError> {
        self.inner.delete_many(collection, predicate).await
    }
}
