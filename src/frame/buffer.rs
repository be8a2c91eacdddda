use std::collections::VecDeque;

use anyhow::{bail, Result};
use tracing::debug;

use super::{Column, FieldType, Frame, Row, Value};

/// Capacity-bounded row history with lazily-discovered columns.
///
/// Rows append at the tail; once `capacity` is reached every append evicts
/// the oldest row at the head. Columns are registered on first sight and
/// never removed, but historical rows are not backfilled when the schema
/// grows.
#[derive(Debug)]
pub struct SampleBuffer {
    capacity: usize,
    columns: Vec<Column>,
    rows: VecDeque<Row>,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` rows.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            bail!("buffer capacity must be > 0");
        }

        Ok(Self {
            capacity,
            columns: Vec::new(),
            rows: VecDeque::with_capacity(capacity.min(1024)),
        })
    }

    /// Registers a column if absent. Idempotent: a second registration under
    /// the same name is a no-op regardless of the type it declares.
    pub fn add_field(&mut self, name: &str, field_type: FieldType) {
        if self.columns.iter().any(|c| c.name == name) {
            return;
        }

        debug!(field = name, %field_type, "registering column");
        self.columns.push(Column {
            name: name.to_string(),
            field_type,
        });
    }

    /// Returns the established type of a column, if registered.
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.field_type)
    }

    /// Appends a row, registering unseen columns first.
    ///
    /// A textual value that parses as a finite number establishes its column
    /// as numeric and is stored as a number; the same coercion applies to
    /// textual values landing in an already-numeric column. Evicts the
    /// oldest row when the append exceeds capacity.
    pub fn append_row(&mut self, row: Row) {
        let mut stored = Row::new();

        for (name, value) in row.iter() {
            let column_type = match self.field_type(name) {
                Some(t) => t,
                None => {
                    let inferred = value.inferred_type();
                    self.add_field(name, inferred);
                    inferred
                }
            };

            let value = match (column_type, value) {
                (FieldType::Number, Value::Text(_)) => match value.as_number() {
                    Some(n) => Value::Number(n),
                    None => value.clone(),
                },
                _ => value.clone(),
            };

            stored.set(name.clone(), value);
        }

        self.rows.push_back(stored);

        while self.rows.len() > self.capacity {
            self.rows.pop_front();
        }
    }

    /// Number of rows currently held.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The current columns and rows, insertion order, oldest first.
    pub fn snapshot(&self) -> Frame {
        Frame {
            columns: self.columns.clone(),
            rows: self.rows.iter().cloned().collect(),
        }
    }
}
