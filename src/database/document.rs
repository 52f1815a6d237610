use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::store::Update;
use crate::filter::filter_where::lookup_path;

/// Fields that can only be set by the data layer, not by API input
pub const SYSTEM_FIELDS: &[&str] = &["id", "_id", "createdAt", "updatedAt"];

/// Fields that may carry a document's canonical id, in priority order
pub const ID_FIELDS: &[&str] = &["id", "_id"];

/// Key of the typed canonical-id form, e.g. `{"$uuid": "…"}`
pub const TYPED_ID_KEY: &str = "$uuid";

/// Errors that can occur while building documents from input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error("System field '{0}' cannot be set via API input")]
    SystemFieldNotAllowed(String),
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),
    #[error("Invalid value for field '{field}': {value}")]
    InvalidValue { field: String, value: String },
}

/// An identifier as found in a stored document, in either its raw string
/// form or the typed `{"$uuid": …}` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRef {
    raw: String,
    canonical: Option<Uuid>,
}

impl IdRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            canonical: Uuid::parse_str(raw).ok(),
        })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => Self::parse(&n.to_string()),
            Value::Object(obj) => obj.get(TYPED_ID_KEY).and_then(Value::as_str).and_then(Self::parse),
            _ => None,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn canonical(&self) -> Option<Uuid> {
        self.canonical
    }

    /// Raw equality, or canonical-id equality when both sides parse as ids
    pub fn matches(&self, other: &IdRef) -> bool {
        if self.raw == other.raw {
            return true;
        }
        matches!((self.canonical, other.canonical), (Some(a), Some(b)) if a == b)
    }

    /// Every stored shape this id may appear as, for `$in` predicates.
    /// Canonical ids expand to lower and upper case hyphenated text, both
    /// plain and typed, plus the typed form of the raw text.
    pub fn representations(&self) -> Vec<Value> {
        let mut out = vec![Value::String(self.raw.clone())];
        if let Some(id) = self.canonical {
            let lower = id.hyphenated().to_string();
            let upper = lower.to_uppercase();
            let texts = [lower, upper, self.raw.clone()];
            for text in &texts[..2] {
                out.push(Value::String(text.clone()));
            }
            for text in &texts {
                out.push(typed_text(text));
            }
        }
        let mut unique = Vec::with_capacity(out.len());
        for value in out {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        unique
    }
}

impl std::fmt::Display for IdRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Typed canonical-id value as written by legacy integrations
pub fn typed_id(id: Uuid) -> Value {
    typed_text(&id.to_string())
}

fn typed_text(text: &str) -> Value {
    let mut map = Map::new();
    map.insert(TYPED_ID_KEY.to_string(), Value::String(text.to_string()));
    Value::Object(map)
}

/// A loosely typed stored document with change tracking.
///
/// Tracks which top-level fields were set or removed since it was loaded so
/// writes can be expressed as whole-field replacements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    original: Option<Map<String, Value>>,
    fields: Map<String, Value>,
    modified_fields: HashSet<String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document from API input JSON, rejecting system fields
    pub fn from_json(json: Value) -> Result<Self, DocumentError> {
        match json {
            Value::Object(map) => {
                if let Some(key) = map.keys().find(|k| SYSTEM_FIELDS.contains(&k.as_str())) {
                    return Err(DocumentError::SystemFieldNotAllowed(key.clone()));
                }
                Ok(Self { fields: map, ..Self::default() })
            }
            _ => Err(DocumentError::InvalidJson("Expected JSON object".to_string())),
        }
    }

    /// Create a document as loaded from storage (system fields allowed)
    pub fn from_stored(map: Map<String, Value>) -> Self {
        Self {
            original: Some(map.clone()),
            fields: map,
            modified_fields: HashSet::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a nested value by dotted path, e.g. `billing.plan`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.fields, path)
    }

    /// Set field value with automatic change tracking
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if SYSTEM_FIELDS.contains(&key.as_str()) {
            tracing::warn!("Attempted to set system field '{}' - ignoring", key);
            return self;
        }
        self.set_system_field(key, value)
    }

    /// Set a system field (data layer only)
    pub fn set_system_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        self.modified_fields.insert(key.clone());
        self.fields.insert(key, value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.modified_fields.insert(key.to_string());
        self.fields.remove(key)
    }

    // ========================================
    // Standard field accessors
    // ========================================

    /// Canonical id, from the first populated id field
    pub fn id_ref(&self) -> Option<IdRef> {
        ID_FIELDS.iter().find_map(|f| self.get(f).and_then(IdRef::from_value))
    }

    /// The stored id field and its exact stored value
    pub fn id_field(&self) -> Option<(&'static str, &Value)> {
        ID_FIELDS.iter().find_map(|&f| {
            self.get(f)
                .filter(|v| IdRef::from_value(v).is_some())
                .map(|v| (f, v))
        })
    }

    pub fn set_id(&mut self, id: Uuid) -> &mut Self {
        self.set_system_field("id", Value::String(id.to_string()))
    }

    /// Non-empty trimmed string value
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get_path(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// String list tolerant of legacy shapes: a bare string is one element,
    /// null or missing is empty, non-string entries are skipped.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => vec![],
        }
    }

    /// Raw stored value of a list field, for snapshot guards
    pub fn list_snapshot(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Active flag; documents predating the flag are active
    pub fn is_active(&self) -> bool {
        self.get("active").and_then(Value::as_bool).unwrap_or(true)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp("createdAt")
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp("updatedAt")
    }

    fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn touch_updated_at(&mut self) -> &mut Self {
        self.set_system_field("updatedAt", Value::String(Utc::now().to_rfc3339()))
    }

    /// Stamp both timestamps for a new document
    pub fn stamp_created(&mut self) -> &mut Self {
        let now = Value::String(Utc::now().to_rfc3339());
        self.set_system_field("createdAt", now.clone());
        self.set_system_field("updatedAt", now)
    }

    // ========================================
    // Change tracking
    // ========================================

    pub fn changed(&self, key: &str) -> bool {
        match &self.original {
            Some(original) => original.get(key) != self.fields.get(key),
            None => self.fields.contains_key(key),
        }
    }

    pub fn has_changes(&self) -> bool {
        self.modified_fields.iter().any(|k| self.changed(k))
    }

    pub fn original(&self) -> Option<&Map<String, Value>> {
        self.original.as_ref()
    }

    /// Whole-field replacements for every field changed since load
    pub fn pending_update(&self) -> Update {
        let mut update = Update::default();
        let mut keys: Vec<&String> = self.modified_fields.iter().filter(|k| self.changed(k)).collect();
        keys.sort();
        for key in keys {
            match self.fields.get(key.as_str()) {
                Some(value) => {
                    update.set.insert(key.clone(), value.clone());
                }
                None => update.unset.push(key.clone()),
            }
        }
        update
    }

    /// Treat the current state as persisted
    pub fn commit(&mut self) -> &mut Self {
        self.original = Some(self.fields.clone());
        self.modified_fields.clear();
        self
    }

    // ========================================
    // Serialization
    // ========================================

    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Validate that required fields are present and not null
    pub fn validate_required_fields(&self, fields: &[&str]) -> Result<(), DocumentError> {
        for &field in fields {
            match self.get(field) {
                None | Some(Value::Null) => {
                    return Err(DocumentError::MissingRequiredField(field.to_string()))
                }
                Some(_) => continue,
            }
        }
        Ok(())
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self::from_stored(map)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        Value::Object(document.fields)
    }
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Document(id: {}, fields: {}, changed: {})",
            self.id_ref().map(|i| i.to_string()).unwrap_or_else(|| "-".to_string()),
            self.fields.len(),
            self.has_changes()
        )
    }
}
