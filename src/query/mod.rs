pub mod http;

use std::collections::HashMap;

use anyhow::Result;

use crate::config::Subscription;
use crate::frame::FieldColumn;

/// One batch of subscriptions served by a single underlying fetch.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub subscriptions: Vec<Subscription>,
}

impl QueryRequest {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self { subscriptions }
    }

    /// Whether any subscription in the batch asked for streaming.
    pub fn is_streaming(&self) -> bool {
        self.subscriptions.iter().any(|s| s.streaming)
    }
}

/// The columnar result of one subscription's query for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub fields: Vec<FieldColumn>,
}

impl QueryResult {
    pub fn new(fields: Vec<FieldColumn>) -> Self {
        Self { fields }
    }
}

/// Per-tick result set, keyed by subscription identifier.
pub type ResultSet = HashMap<String, QueryResult>;

/// Query execution collaborator: issues the batch's queries and returns a
/// structured result per subscription.
pub trait QueryExecutor: Send + Sync {
    /// Execute every query in the request once and return the results keyed
    /// by subscription identifier.
    fn execute(
        &self,
        request: &QueryRequest,
    ) -> impl std::future::Future<Output = Result<ResultSet>> + Send;
}
