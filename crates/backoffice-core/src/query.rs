//! Database seam exposed to operation scripts as `query(sql, ...params)`

use serde_json::Value;

/// Failure reported by a query backend; surfaces in the script as an `Error`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct QueryError(pub String);

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        QueryError(message.into())
    }
}

/// Trait for database backends so the executor doesn't care about implementation
///
/// Shared between concurrent executions, so implementations must be safe to
/// query from several threads at once.
pub trait QueryBackend: Send + Sync {
    /// Rows come back as ordered column values. Binary columns are text.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, QueryError>;
}
