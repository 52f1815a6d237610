use serde_json::{Map, Value};

use crate::types::Collection;

use super::error::FilterError;
use super::filter_where::FilterWhere;
use super::types::{Condition, SqlResult};

/// Table holding every collection's documents in the Postgres store
pub const DOCUMENTS_TABLE: &str = "documents";

/// A where clause scoped to one collection, with an optional window.
///
/// SQL output reserves `$1` for the collection name; where-clause parameters
/// start at `$2` and are bound as `jsonb`.
#[derive(Debug, Clone)]
pub struct Filter {
    collection: Collection,
    condition: Condition,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Filter {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            condition: Condition::all(),
            limit: None,
            offset: None,
        }
    }

    /// Shorthand for `Filter::new(collection).where_clause(predicate)`
    pub fn parse(collection: Collection, predicate: &Value) -> Result<Self, FilterError> {
        let mut filter = Self::new(collection);
        filter.where_clause(predicate)?;
        Ok(filter)
    }

    pub fn where_clause(&mut self, conditions: &Value) -> Result<&mut Self, FilterError> {
        self.condition = FilterWhere::parse(conditions)?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: Option<usize>, offset: Option<usize>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        FilterWhere::matches(&self.condition, document)
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let where_result = self.to_where_sql(1)?;
        let query = [
            format!("SELECT \"seq\", \"data\" FROM \"{}\"", DOCUMENTS_TABLE),
            format!("WHERE \"collection\" = $1 AND ({})", where_result.query),
            "ORDER BY \"seq\" ASC".to_string(),
            self.build_limit_clause(),
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        Ok(SqlResult { query, params: where_result.params })
    }

    /// Where clause only, placeholders numbered after `starting_param_index`
    pub fn to_where_sql(&self, starting_param_index: usize) -> Result<SqlResult, FilterError> {
        let (query, params) = FilterWhere::generate(&self.condition, starting_param_index)?;
        Ok(SqlResult { query, params })
    }

    pub fn to_count_sql(&self) -> Result<SqlResult, FilterError> {
        let where_result = self.to_where_sql(1)?;
        let query = format!(
            "SELECT COUNT(*) AS count FROM \"{}\" WHERE \"collection\" = $1 AND ({})",
            DOCUMENTS_TABLE, where_result.query
        );
        Ok(SqlResult { query, params: where_result.params })
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}
