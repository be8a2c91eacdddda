pub mod buffer;

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// FieldType classifies the values a column holds.
///
/// A column's type is fixed the first time the column is seen and never
/// changes afterward, with one exception: a textual value that parses as a
/// finite number registers the column as `Number` (see `buffer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    #[serde(rename = "string")]
    Text,
    Time,
}

impl FieldType {
    /// Returns the canonical wire/log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Text => "string",
            Self::Time => "time",
        }
    }

    /// Parse from a wire label.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "number" => Some(Self::Number),
            "string" => Some(Self::Text),
            "time" => Some(Self::Time),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single scalar cell value.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Time(i64),
}

impl Value {
    /// Returns the numeric reading of this value, if it has one.
    ///
    /// Text parses leniently but only finite numbers count.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Self::Time(_) => None,
        }
    }

    /// The field type this value would establish for a fresh column.
    pub fn inferred_type(&self) -> FieldType {
        match self {
            Self::Number(_) => FieldType::Number,
            Self::Text(s) => {
                if s.trim().parse::<f64>().map(f64::is_finite).unwrap_or(false) {
                    FieldType::Number
                } else {
                    FieldType::Text
                }
            }
            Self::Time(_) => FieldType::Time,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Time(ms) => write!(f, "{ms}"),
        }
    }
}

/// A column definition: name plus the type established at first sight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// One row of a frame: column name to value.
///
/// A row holds only the values it was appended with; columns added to the
/// frame later are simply absent here.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    values: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over (name, value) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One named columnar field of a tick's query result: the declared type and
/// every value the query returned for it this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldColumn {
    pub name: String,
    pub field_type: FieldType,
    pub values: Vec<Value>,
}

impl FieldColumn {
    pub fn new(name: impl Into<String>, field_type: FieldType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            field_type,
            values,
        }
    }
}

/// The read-only view of a buffer handed downstream: ordered column
/// definitions plus rows oldest-to-newest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl Frame {
    /// Converts a columnar result verbatim into a frame: columns in input
    /// order, one row per value index.
    pub fn from_columns(fields: &[FieldColumn]) -> Self {
        let columns = fields
            .iter()
            .map(|f| Column {
                name: f.name.clone(),
                field_type: f.field_type,
            })
            .collect();

        let row_count = fields.iter().map(|f| f.values.len()).max().unwrap_or(0);
        let mut rows = Vec::with_capacity(row_count);

        for i in 0..row_count {
            let mut row = Row::new();
            for field in fields {
                if let Some(value) = field.values.get(i) {
                    row.set(field.name.clone(), value.clone());
                }
            }
            rows.push(row);
        }

        Self { columns, rows }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
