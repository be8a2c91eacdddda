use anyhow::Result;

use crate::frame::buffer::SampleBuffer;
use crate::frame::{now_ms, FieldColumn, FieldType, Frame, Row, Value};

/// Name of the synthetic timestamp column.
pub const TIME_FIELD: &str = "time";

/// Converts a freshly-fetched query result into one buffer row per tick.
///
/// The buffer carries a synthetic `time` column stamped at update time; an
/// upstream field of the same name is dropped so the frame keeps a single
/// unambiguous time axis.
pub struct TimeSeriesAggregator {
    subscription_id: String,
    buffer: SampleBuffer,
}

impl TimeSeriesAggregator {
    /// Create an aggregator for one subscription.
    pub fn new(subscription_id: &str, capacity: usize) -> Result<Self> {
        let mut buffer = SampleBuffer::new(capacity)?;
        buffer.add_field(TIME_FIELD, FieldType::Time);

        Ok(Self {
            subscription_id: subscription_id.to_string(),
            buffer,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Folds one tick's fields into the buffer and returns the updated frame.
    ///
    /// Only the last value of each field represents "now"; earlier values in
    /// the same tick are discarded. When two fields share a name the last
    /// occurrence wins. An empty field list still appends the timestamp row.
    pub fn update(&mut self, fields: &[FieldColumn]) -> Frame {
        let mut row = Row::new();
        row.set(TIME_FIELD, Value::Time(now_ms()));

        for field in fields {
            if field.name == TIME_FIELD {
                continue;
            }

            let Some(value) = field.values.last() else {
                // A field that returned no values this tick still registers
                // its column.
                self.buffer.add_field(&field.name, field.field_type);
                continue;
            };

            let field_type = match field.field_type {
                FieldType::Text if value.as_number().is_some() => FieldType::Number,
                declared => declared,
            };
            self.buffer.add_field(&field.name, field_type);

            row.set(field.name.clone(), value.clone());
        }

        self.buffer.append_row(row);
        self.buffer.snapshot()
    }
}
