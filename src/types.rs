use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Values that can be bound as statement parameters or read back from a result column.
///
/// These are exactly the engine's storage classes:
/// ```rust
/// use sqlite_access::Value;
///
/// let params = vec![
///     Value::Int(1),
///     Value::Text("alice".into()),
///     Value::Null,
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self.as_int() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// One result row: column names (shared by every row of the same statement) plus values.
///
/// Duplicate column names resolve to their first occurrence, both in [`get`](Row::get) and
/// in [`into_map`](Row::into_map).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    column_names: Arc<Vec<String>>,
    values: Vec<Value>,
    #[serde(skip)]
    column_index: Arc<HashMap<String, usize>>,
}

impl Row {
    /// Create a row; `values[i]` belongs to `column_names[i]`.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        let column_index = Arc::new(index_columns(&column_names));
        Self::with_index(column_names, column_index, values)
    }

    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        column_index: Arc<HashMap<String, usize>>,
        values: Vec<Value>,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        let idx = match self.column_index.get(column_name) {
            Some(&idx) => idx,
            // deserialized rows carry no index
            None => self.column_names.iter().position(|col| col == column_name)?,
        };
        self.values.get(idx)
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Consume the row into a column name → value map.
    #[must_use]
    pub fn into_map(self) -> HashMap<String, Value> {
        let mut map = HashMap::with_capacity(self.values.len());
        for (name, value) in self.column_names.iter().zip(self.values) {
            map.entry(name.clone()).or_insert(value);
        }
        map
    }
}

// The name index is a lookup cache and is not serialized.
impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.column_names == other.column_names && self.values == other.values
    }
}

pub(crate) fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        // First occurrence wins for duplicated names, matching `SELECT a, a`.
        index.entry(name.clone()).or_insert(i);
    }
    index
}
