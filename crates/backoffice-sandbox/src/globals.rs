//! Host globals - the capabilities a script is allowed to call
//!
//! A script gets nothing from the host unless it is registered here.
//! Arguments and return values cross the boundary as JSON values.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Error returned by a host function; rethrown inside the script as an `Error`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// A host function callable from the script
pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, HostError> + Send + Sync>;

/// The set of host functions installed as globals in a script runtime
#[derive(Clone, Default)]
pub struct HostGlobals {
    functions: BTreeMap<String, HostFunction>,
}

impl HostGlobals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under a global name, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Builder form of [`HostGlobals::register`]
    pub fn with<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        self.register(name, function);
        self
    }

    /// Check if a global is registered
    pub fn has(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostFunction)> {
        self.functions.iter().map(|(name, f)| (name.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for HostGlobals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_call() {
        let globals = HostGlobals::new().with("double", |args| {
            let n = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });

        assert!(globals.has("double"));
        assert!(!globals.has("query"));

        let double = globals.get("double").unwrap();
        assert_eq!(double(&[json!(21)]).unwrap(), json!(42));
    }

    #[test]
    fn test_register_replaces() {
        let mut globals = HostGlobals::new();
        globals.register("f", |_| Ok(json!(1)));
        globals.register("f", |_| Err(HostError::new("nope")));

        assert_eq!(globals.len(), 1);
        let f = globals.get("f").unwrap();
        assert_eq!(f(&[]).unwrap_err().to_string(), "nope");
    }

    #[test]
    fn test_iter_is_sorted() {
        let globals = HostGlobals::new()
            .with("query", |_| Ok(Value::Null))
            .with("banana", |_| Ok(Value::Null));

        let names: Vec<&str> = globals.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["banana", "query"]);
    }
}
