//! Backoffice Core - typed operations over sandboxed scripts
//!
//! Schemas describe what goes in and out of an operation, stores keep the
//! operation records, and the executor ties them to the script sandbox.

pub mod executor;
pub mod fs_store;
pub mod operation;
pub mod query;
pub mod schema;
pub mod store;

pub use executor::{ErrorKind, ExecuteError, ExecuteResponse, OperationExecutor};
pub use fs_store::FsOperationStore;
pub use operation::Operation;
pub use query::{QueryBackend, QueryError};
pub use schema::{ArraySpec, BooleanSpec, NumberSpec, ObjectSpec, StringSpec, Type, ValidationResult, ValueSchema};
pub use store::{InMemoryOperationStore, OperationStore, StoreError};
