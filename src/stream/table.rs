use crate::frame::Frame;
use crate::query::QueryResult;

/// Hands back the latest full tabular result unmodified.
///
/// No history, no synthetic time column, no eviction: each tick replaces the
/// displayed table wholesale.
pub struct TableAggregator {
    subscription_id: String,
}

impl TableAggregator {
    pub fn new(subscription_id: &str) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Returns the tick's result verbatim as a frame.
    pub fn update(&self, result: &QueryResult) -> Frame {
        Frame::from_columns(&result.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FieldColumn, FieldType, Value};

    fn table(name: &str, values: &[f64]) -> QueryResult {
        QueryResult::new(vec![FieldColumn::new(
            name,
            FieldType::Number,
            values.iter().map(|v| Value::Number(*v)).collect(),
        )])
    }

    #[test]
    fn test_update_passes_result_through() {
        let agg = TableAggregator::new("A");
        let result = table("x", &[1.0, 2.0, 3.0]);

        let frame = agg.update(&result);

        assert_eq!(frame.columns.len(), 1);
        assert_eq!(frame.columns[0].name, "x");
        assert_eq!(frame.rows.len(), 3);
        assert_eq!(frame.rows[2].get("x"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn test_update_keeps_no_residue() {
        let agg = TableAggregator::new("A");

        let first = agg.update(&table("a", &[1.0, 2.0]));
        assert_eq!(first.rows.len(), 2);

        // The second update replaces the table wholesale.
        let second = agg.update(&table("b", &[9.0]));
        assert_eq!(second.columns.len(), 1);
        assert_eq!(second.columns[0].name, "b");
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.rows[0].get("a"), None);
        assert_eq!(second, agg.update(&table("b", &[9.0])));
    }

    #[test]
    fn test_update_with_empty_result() {
        let agg = TableAggregator::new("A");
        let frame = agg.update(&QueryResult::default());
        assert!(frame.columns.is_empty());
        assert!(frame.rows.is_empty());
    }

    #[test]
    fn test_no_synthetic_time_column() {
        let agg = TableAggregator::new("A");
        let frame = agg.update(&table("x", &[1.0]));
        assert!(!frame.columns.iter().any(|c| c.name == "time"));
    }
}
