//! Operation executor - look up, check arguments, run, check the result
//!
//! Every call is terminal on the first failure. Side effects a script made
//! before failing (database writes through `query`) are not rolled back.

use crate::query::QueryBackend;
use crate::store::{OperationStore, StoreError};
use backoffice_sandbox::{HostError, HostGlobals, SandboxConfig, SandboxError, ScriptArgs, ScriptSandbox};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("argument not provided: {0}")]
    MissingArgument(String),

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error(transparent)]
    Script(#[from] SandboxError),

    #[error("invalid result: {0}")]
    InvalidResult(String),
}

/// Coarse classification for callers that map errors onto statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadInput,
    Execution,
}

impl ExecuteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecuteError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            ExecuteError::Store(StoreError::InvalidName { .. }) => ErrorKind::BadInput,
            ExecuteError::MissingArgument(_) | ExecuteError::InvalidArgument { .. } => ErrorKind::BadInput,
            ExecuteError::Store(_) | ExecuteError::Script(_) | ExecuteError::InvalidResult(_) => {
                ErrorKind::Execution
            }
        }
    }
}

/// Wire form of an execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Result<Value, ExecuteError>> for ExecuteResponse {
    fn from(outcome: &Result<Value, ExecuteError>) -> Self {
        match outcome {
            Ok(result) => ExecuteResponse {
                success: true,
                result: Some(result.clone()),
                message: None,
            },
            Err(err) => ExecuteResponse {
                success: false,
                result: None,
                message: Some(err.to_string()),
            },
        }
    }
}

pub struct OperationExecutor {
    store: Arc<dyn OperationStore>,
    database: Arc<dyn QueryBackend>,
    sandbox: ScriptSandbox,
}

impl OperationExecutor {
    pub fn new(store: Arc<dyn OperationStore>, database: Arc<dyn QueryBackend>) -> Self {
        Self::with_config(store, database, SandboxConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn OperationStore>,
        database: Arc<dyn QueryBackend>,
        config: SandboxConfig,
    ) -> Self {
        Self {
            store,
            database,
            sandbox: ScriptSandbox::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Run an operation by name with named arguments
    pub fn execute(&self, name: &str, arguments: &Map<String, Value>) -> Result<Value, ExecuteError> {
        let operation = self.store.get_operation(name)?;

        for (parameter, schema) in &operation.parameters {
            let Some(argument) = arguments.get(parameter) else {
                return Err(ExecuteError::MissingArgument(parameter.clone()));
            };
            if let Err(message) = schema.validate(argument).into_result() {
                return Err(ExecuteError::InvalidArgument {
                    name: parameter.clone(),
                    message,
                });
            }
        }

        let globals = self.globals();
        let started = Instant::now();
        info!(operation = %operation.name, arguments = arguments.len(), "executing operation");

        let result: Value = self
            .sandbox
            .execute_script(
                &operation.name,
                &operation.javascript_code,
                &ScriptArgs::Named(arguments.clone()),
                &globals,
            )
            .map_err(|err| {
                warn!(operation = %operation.name, error = %err, "operation script failed");
                err
            })?;

        operation
            .return_schema
            .validate(&result)
            .into_result()
            .map_err(ExecuteError::InvalidResult)?;

        debug!(
            operation = %operation.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "operation finished"
        );
        Ok(result)
    }

    fn globals(&self) -> HostGlobals {
        let database = Arc::clone(&self.database);
        HostGlobals::new().with("query", move |args| {
            let Some((sql, params)) = args.split_first() else {
                return Err(HostError::new("query expects a SQL string"));
            };
            let Some(sql) = sql.as_str() else {
                return Err(HostError::new("query expects a SQL string"));
            };

            let rows = database.query(sql, params).map_err(HostError::new)?;
            Ok(Value::Array(rows.into_iter().map(Value::Array).collect()))
        })
    }
}
