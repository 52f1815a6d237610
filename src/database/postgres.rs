//! Postgres-backed document store.
//! All collections share one `documents` table; `seq` provides natural order.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::database::document::Document;
use crate::database::store::{DocumentStore, StoreError, Update, UpdateResult};
use crate::filter::{Filter, DOCUMENTS_TABLE};
use crate::types::Collection;

pub struct PgDocumentStore {
    pool: PgPool,
    log_queries: bool,
    slow_query_threshold: Option<Duration>,
}

impl PgDocumentStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config.url.as_deref().ok_or(StoreError::ConfigMissing("DATABASE_URL"))?;
        url::Url::parse(url).map_err(|e| StoreError::Connection(format!("invalid database url: {}", e)))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await
            .map_err(classify)?;
        info!("Connected document store pool (max_connections={})", config.max_connections);

        let store = Self::from_pool(pool, config);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool, config: &DatabaseConfig) -> Self {
        Self {
            pool,
            log_queries: config.enable_query_logging,
            slow_query_threshold: config
                .enable_slow_query_warning
                .then(|| Duration::from_millis(config.slow_query_threshold_ms)),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (\
                 \"seq\" BIGSERIAL PRIMARY KEY, \
                 \"collection\" TEXT NOT NULL, \
                 \"data\" JSONB NOT NULL)",
                DOCUMENTS_TABLE
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS \"{t}_collection_idx\" ON \"{t}\" (\"collection\")",
                t = DOCUMENTS_TABLE
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"{t}_collection_id_idx\" ON \"{t}\" \
                 (\"collection\", (\"data\" ->> 'id')) WHERE \"data\" ? 'id'",
                t = DOCUMENTS_TABLE
            ),
            Self::tenant_slug_index_sql(),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await.map_err(classify)?;
        }
        Ok(())
    }

    /// Concurrent tenant creates race between the slug check and the insert;
    /// the loser gets 23505 and retries with the next suffix.
    fn tenant_slug_index_sql() -> String {
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{t}_tenant_slug_idx\" ON \"{t}\" ((\"data\" ->> 'slug')) \
             WHERE \"collection\" = '{c}' AND \"data\" ? 'slug'",
            t = DOCUMENTS_TABLE,
            c = Collection::Tenants.as_str(),
        )
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(classify)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed document store pool");
    }

    fn observe(&self, sql: &str, started: Instant) {
        let elapsed = started.elapsed();
        if self.log_queries {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "query: {}", sql);
        }
        if let Some(threshold) = self.slow_query_threshold {
            if elapsed > threshold {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "slow query: {}", sql);
            }
        }
    }

    /// Subquery selecting the first matching row in natural order
    fn first_match_sql(where_sql: &str) -> String {
        format!(
            "SELECT \"seq\" FROM \"{}\" WHERE \"collection\" = $1 AND ({}) ORDER BY \"seq\" ASC LIMIT 1",
            DOCUMENTS_TABLE, where_sql
        )
    }

    async fn execute_update(&self, sql: &str, query: Query<'_, Postgres, PgArguments>) -> Result<UpdateResult, StoreError> {
        let started = Instant::now();
        let result = query.execute(&self.pool).await.map_err(classify);
        self.observe(sql, started);
        let affected = result?.rows_affected();
        Ok(UpdateResult { matched: affected, modified: affected })
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = query.bind(p.clone());
    }
    query
}

/// Map driver errors onto the store taxonomy
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // invalid_text_representation, datatype_mismatch, undefined_function
            Some("22P02") | Some("42804") | Some("42883") => StoreError::InvalidPredicate(db.message().to_string()),
            // invalid_parameter_value: e.g. array length of a scalar
            Some("22023") => StoreError::ShapeMismatch(db.message().to_string()),
            Some("23505") => StoreError::Duplicate(db.message().to_string()),
            _ => StoreError::Backend(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let sql = filter.to_sql()?;
        let query = bind_params(sqlx::query(&sql.query).bind(filter.collection().as_str()), &sql.params);

        let started = Instant::now();
        let rows = query.fetch_all(&self.pool).await.map_err(classify);
        self.observe(&sql.query, started);

        rows?
            .into_iter()
            .map(|row| {
                let data: Value = row.try_get("data").map_err(classify)?;
                match data {
                    Value::Object(map) => Ok(Document::from_stored(map)),
                    other => Err(StoreError::Backend(format!("stored document is not an object: {}", other))),
                }
            })
            .collect()
    }

    async fn count(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError> {
        let sql = Filter::parse(collection, predicate)?.to_count_sql()?;
        let query = bind_params(sqlx::query(&sql.query).bind(collection.as_str()), &sql.params);

        let started = Instant::now();
        let row = query.fetch_one(&self.pool).await.map_err(classify);
        self.observe(&sql.query, started);

        let count: i64 = row?.try_get("count").map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    async fn insert_one(&self, collection: Collection, document: &Document) -> Result<(), StoreError> {
        let sql = format!("INSERT INTO \"{}\" (\"collection\", \"data\") VALUES ($1, $2)", DOCUMENTS_TABLE);
        let query = sqlx::query(&sql).bind(collection.as_str()).bind(document.to_json());
        self.execute_update(&sql, query).await?;
        Ok(())
    }

    async fn update_one(
        &self,
        collection: Collection,
        predicate: &Value,
        update: &Update,
    ) -> Result<UpdateResult, StoreError> {
        let where_sql = Filter::parse(collection, predicate)?.to_where_sql(3)?;
        let sql = format!(
            "UPDATE \"{t}\" SET \"data\" = (\"data\" - $2::text[]) || $3::jsonb WHERE \"seq\" = ({sub})",
            t = DOCUMENTS_TABLE,
            sub = Self::first_match_sql(&where_sql.query),
        );
        let query = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(update.unset.clone())
            .bind(Value::Object(update.set.clone()));
        self.execute_update(&sql, bind_params(query, &where_sql.params)).await
    }

    async fn push_to_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: Value,
        max_len: Option<usize>,
    ) -> Result<UpdateResult, StoreError> {
        let where_sql = Filter::parse(collection, predicate)?.to_where_sql(4)?;
        // The length guard also raises 22023 on scalar fields.
        let guarded = format!(
            "{} AND jsonb_array_length(COALESCE(NULLIF(\"data\" -> $2::text, 'null'::jsonb), '[]'::jsonb)) < $4",
            where_sql.query
        );
        let sql = format!(
            "UPDATE \"{t}\" SET \"data\" = jsonb_set(\"data\", ARRAY[$2::text], \
             COALESCE(NULLIF(\"data\" -> $2::text, 'null'::jsonb), '[]'::jsonb) || jsonb_build_array($3::jsonb), true) \
             WHERE \"seq\" = ({sub})",
            t = DOCUMENTS_TABLE,
            sub = Self::first_match_sql(&guarded),
        );
        let limit = max_len.map(|m| m.min(i64::MAX as usize) as i64).unwrap_or(i64::MAX);
        let query = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(field.to_string())
            .bind(value)
            .bind(limit);
        self.execute_update(&sql, bind_params(query, &where_sql.params)).await
    }

    async fn pull_from_array(
        &self,
        collection: Collection,
        predicate: &Value,
        field: &str,
        value: &Value,
    ) -> Result<UpdateResult, StoreError> {
        let where_sql = Filter::parse(collection, predicate)?.to_where_sql(3)?;
        let sql = format!(
            "UPDATE \"{t}\" SET \"data\" = jsonb_set(\"data\", ARRAY[$2::text], \
             COALESCE((SELECT jsonb_agg(e) FROM jsonb_array_elements(COALESCE(NULLIF(\"data\" -> $2::text, 'null'::jsonb), '[]'::jsonb)) e \
             WHERE e <> $3::jsonb), '[]'::jsonb), true) \
             WHERE \"seq\" = ({sub})",
            t = DOCUMENTS_TABLE,
            sub = Self::first_match_sql(&where_sql.query),
        );
        let query = sqlx::query(&sql)
            .bind(collection.as_str())
            .bind(field.to_string())
            .bind(value.clone());
        self.execute_update(&sql, bind_params(query, &where_sql.params)).await
    }

    async fn delete_many(&self, collection: Collection, predicate: &Value) -> Result<u64, StoreError> {
        let where_sql = Filter::parse(collection, predicate)?.to_where_sql(1)?;
        let sql = format!(
            "DELETE FROM \"{}\" WHERE \"collection\" = $1 AND ({})",
            DOCUMENTS_TABLE, where_sql.query
        );
        let query = bind_params(sqlx::query(&sql).bind(collection.as_str()), &where_sql.params);
        Ok(self.execute_update(&sql, query).await?.matched)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_subquery_orders_by_seq() {
        let sql = PgDocumentStore::first_match_sql("TRUE");
        assert_eq!(
            sql,
            "SELECT \"seq\" FROM \"documents\" WHERE \"collection\" = $1 AND (TRUE) ORDER BY \"seq\" ASC LIMIT 1"
        );
    }

    #[test]
    fn tenant_slugs_have_a_partial_unique_index() {
        let sql = PgDocumentStore::tenant_slug_index_sql();
        assert!(sql.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS \"documents_tenant_slug_idx\""));
        assert!(sql.ends_with("WHERE \"collection\" = 'tenants' AND \"data\" ? 'slug'"));
    }

    #[test]
    fn connection_failures_are_hard() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_hard_failure());
        assert!(classify(sqlx::Error::RowNotFound).is_hard_failure());
    }
}
