use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::error::FilterError;
use super::types::{Condition, FilterOp, FilterWhereInfo};

/// Parses JSON where clauses and turns them into SQL over a `jsonb` column
/// or evaluates them directly against a document.
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    /// Compile a condition; placeholders start at `starting_param_index + 1`.
    pub fn generate(condition: &Condition, starting_param_index: usize) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        let sql = filter_where.build_sql(condition)?;
        Ok((sql, filter_where.param_values))
    }

    pub fn parse(where_data: &Value) -> Result<Condition, FilterError> {
        match where_data {
            Value::Null => Ok(Condition::all()),
            Value::Object(obj) => Self::parse_object(obj),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn parse_object(obj: &Map<String, Value>) -> Result<Condition, FilterError> {
        let mut conditions = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            if key.starts_with('$') {
                conditions.push(Self::parse_logical_operator(key, value)?);
            } else {
                Self::validate_path(key)?;
                conditions.extend(Self::parse_field_condition(key, value)?);
            }
        }
        if conditions.len() == 1 {
            return Ok(conditions.remove(0));
        }
        Ok(Condition::And(conditions))
    }

    fn parse_logical_operator(op: &str, value: &Value) -> Result<Condition, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let parts = arr.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                Ok(if op == "$and" { Condition::And(parts) } else { Condition::Or(parts) })
            }
            "$not" => Ok(Condition::Not(Box::new(Self::parse(value)?))),
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<Condition>, FilterError> {
        // An object is an operator map only when every key is an operator;
        // typed values such as {"$uuid": "..."} are compared literally.
        if let Value::Object(obj) = value {
            if !obj.is_empty() && obj.keys().all(|k| FilterOp::from_key(k).is_some()) {
                let mut out = Vec::with_capacity(obj.len());
                for (op_key, op_val) in obj {
                    let operator = FilterOp::from_key(op_key)
                        .ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                    Self::validate_operator_data(operator, op_val)?;
                    out.push(Condition::Field(FilterWhereInfo {
                        column: field.to_string(),
                        operator,
                        data: op_val.clone(),
                    }));
                }
                return Ok(out);
            }
        }
        // Implicit equality: { field: value }
        Ok(vec![Condition::Field(FilterWhereInfo {
            column: field.to_string(),
            operator: FilterOp::Eq,
            data: value.clone(),
        })])
    }

    fn validate_operator_data(operator: FilterOp, data: &Value) -> Result<(), FilterError> {
        match operator {
            FilterOp::In | FilterOp::NIn if !data.is_array() => {
                Err(FilterError::InvalidOperatorData("$in/$nin require an array".to_string()))
            }
            FilterOp::Exists if !data.is_boolean() => {
                Err(FilterError::InvalidOperatorData("$exists requires a boolean".to_string()))
            }
            FilterOp::Size if data.as_u64().is_none() => {
                Err(FilterError::InvalidOperatorData("$size requires a non-negative integer".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Field paths are dotted identifiers, e.g. `billing.plan` or `_id`.
    pub fn validate_path(path: &str) -> Result<(), FilterError> {
        if path.is_empty() {
            return Err(FilterError::InvalidField("Field path cannot be empty".to_string()));
        }
        for segment in path.split('.') {
            let mut chars = segment.chars();
            let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
            if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(FilterError::InvalidField(format!("Invalid field path format: {}", path)));
            }
        }
        Ok(())
    }

    // ========================================
    // In-memory evaluation
    // ========================================

    pub fn matches(condition: &Condition, document: &Map<String, Value>) -> bool {
        match condition {
            Condition::And(parts) => parts.iter().all(|c| Self::matches(c, document)),
            Condition::Or(parts) => parts.iter().any(|c| Self::matches(c, document)),
            Condition::Not(inner) => !Self::matches(inner, document),
            Condition::Field(info) => Self::matches_field(info, lookup_path(document, &info.column)),
        }
    }

    fn matches_field(info: &FilterWhereInfo, actual: Option<&Value>) -> bool {
        let present = actual.filter(|v| !v.is_null());
        match info.operator {
            FilterOp::Eq => Self::json_eq(present, &info.data),
            FilterOp::Ne => !Self::json_eq(present, &info.data),
            FilterOp::Gt => Self::compare(present, &info.data) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(Self::compare(present, &info.data), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Lt => Self::compare(present, &info.data) == Some(Ordering::Less),
            FilterOp::Lte => matches!(Self::compare(present, &info.data), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::In => Self::in_list(present, &info.data),
            FilterOp::NIn => !Self::in_list(present, &info.data),
            FilterOp::Exists => present.is_some() == info.data.as_bool().unwrap_or(true),
            FilterOp::Size => match (present, info.data.as_u64()) {
                (Some(Value::Array(items)), Some(size)) => items.len() as u64 == size,
                _ => false,
            },
        }
    }

    fn json_eq(actual: Option<&Value>, expected: &Value) -> bool {
        match actual {
            None => expected.is_null(),
            Some(value) => value == expected,
        }
    }

    fn in_list(actual: Option<&Value>, list: &Value) -> bool {
        list.as_array()
            .map(|items| items.iter().any(|item| Self::json_eq(actual, item)))
            .unwrap_or(false)
    }

    fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
        match (actual?, expected) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    // ========================================
    // SQL generation
    // ========================================

    fn build_sql(&mut self, condition: &Condition) -> Result<String, FilterError> {
        match condition {
            Condition::And(parts) => self.join_parts(parts, " AND ", "TRUE"),
            Condition::Or(parts) => self.join_parts(parts, " OR ", "FALSE"),
            Condition::Not(inner) => Ok(format!("NOT ({})", self.build_sql(inner)?)),
            Condition::Field(info) => self.build_sql_condition(info),
        }
    }

    fn join_parts(&mut self, parts: &[Condition], joiner: &str, empty: &str) -> Result<String, FilterError> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let mut sql_parts = Vec::with_capacity(parts.len());
        for part in parts {
            sql_parts.push(format!("({})", self.build_sql(part)?));
        }
        Ok(sql_parts.join(joiner))
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        Self::validate_path(&condition.column)?;
        let column = json_path_sql(&condition.column);
        let is_missing = format!("({c} IS NULL OR {c} = 'null'::jsonb)", c = column);
        let is_present = format!("({c} IS NOT NULL AND {c} <> 'null'::jsonb)", c = column);

        match condition.operator {
            FilterOp::Eq => {
                if condition.data.is_null() { Ok(is_missing) }
                else { Ok(format!("{} = {}", column, self.param(condition.data.clone()))) }
            }
            FilterOp::Ne => {
                if condition.data.is_null() { Ok(is_present) }
                else { Ok(format!("({} IS NULL OR {} <> {})", column, column, self.param(condition.data.clone()))) }
            }
            FilterOp::Gt => Ok(format!("{} > {}", column, self.param(condition.data.clone()))),
            FilterOp::Gte => Ok(format!("{} >= {}", column, self.param(condition.data.clone()))),
            FilterOp::Lt => Ok(format!("{} < {}", column, self.param(condition.data.clone()))),
            FilterOp::Lte => Ok(format!("{} <= {}", column, self.param(condition.data.clone()))),
            FilterOp::In | FilterOp::NIn => {
                let values = condition.data.as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData("$in/$nin require an array".to_string()))?;
                let in_sql = self.in_sql(&column, &is_missing, values);
                if condition.operator == FilterOp::In { Ok(in_sql) }
                else { Ok(format!("NOT ({})", in_sql)) }
            }
            FilterOp::Exists => {
                if condition.data.as_bool().unwrap_or(true) { Ok(is_present) } else { Ok(is_missing) }
            }
            FilterOp::Size => {
                let size = condition.data.as_u64()
                    .ok_or_else(|| FilterError::InvalidOperatorData("$size requires a non-negative integer".to_string()))?;
                Ok(format!("(jsonb_typeof({c}) = 'array' AND jsonb_array_length({c}) = {s})", c = column, s = size))
            }
        }
    }

    fn in_sql(&mut self, column: &str, is_missing: &str, values: &[Value]) -> String {
        let (nulls, concrete): (Vec<&Value>, Vec<&Value>) = values.iter().partition(|v| v.is_null());
        let mut alternatives = Vec::new();
        if !concrete.is_empty() {
            let params: Vec<String> = concrete.into_iter().map(|v| self.param(v.clone())).collect();
            alternatives.push(format!("{} IN ({})", column, params.join(", ")));
        }
        if !nulls.is_empty() {
            alternatives.push(is_missing.to_string());
        }
        match alternatives.len() {
            0 => "FALSE".to_string(),
            1 => alternatives.remove(0),
            _ => format!("({})", alternatives.join(" OR ")),
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

/// Resolve a dotted path against a document
pub fn lookup_path<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// `jsonb` accessor for a validated dotted path
fn json_path_sql(path: &str) -> String {
    if path.contains('.') {
        format!("\"data\" #> '{{{}}}'", path.replace('.', ","))
    } else {
        format!("\"data\" -> '{}'", path)
    }
}
