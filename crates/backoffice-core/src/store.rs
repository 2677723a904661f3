//! Operation storage
//!
//! The store owns the canonical records and hands out shared read-only
//! handles. Adding an operation under an existing name replaces it.

use crate::operation::Operation;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation not found")]
    NotFound(String),

    #[error("invalid operation name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("failed to {action} operation {name}: {source}")]
    Io {
        name: String,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to {action} operation {name}: {source}")]
    Decode {
        name: String,
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("operation store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for operation stores so the executor doesn't care about implementation
pub trait OperationStore: Send + Sync {
    fn get_operation(&self, name: &str) -> Result<Arc<Operation>>;

    fn add_operation(&self, operation: Operation) -> Result<()>;

    /// Stored names, sorted
    fn list_operations(&self) -> Result<Vec<String>>;
}

/// Operation names double as directory names, so they must be a single
/// plain path component
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(StoreError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("name is longer than 255 bytes");
    }
    if name == "." || name == ".." {
        return invalid("name is a relative path");
    }
    if name.starts_with('.') {
        return invalid("name starts with a dot");
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return invalid("name contains a path separator or control character");
    }
    Ok(())
}

/// Process-local store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<String, Arc<Operation>>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationStore for InMemoryOperationStore {
    fn get_operation(&self, name: &str) -> Result<Arc<Operation>> {
        let operations = self.operations.read().map_err(|_| StoreError::Poisoned)?;
        operations
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn add_operation(&self, operation: Operation) -> Result<()> {
        validate_name(&operation.name)?;
        let mut operations = self.operations.write().map_err(|_| StoreError::Poisoned)?;
        debug!(operation = %operation.name, "storing operation in memory");
        operations.insert(operation.name.clone(), Arc::new(operation));
        Ok(())
    }

    fn list_operations(&self) -> Result<Vec<String>> {
        let operations = self.operations.read().map_err(|_| StoreError::Poisoned)?;
        let mut names: Vec<String> = operations.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
