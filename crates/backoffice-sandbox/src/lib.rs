//! Backoffice Sandbox - JavaScript operation isolation
//!
//! Every operation script runs in its own QuickJS runtime.
//! No filesystem access. No network access. The only way out is through
//! the host globals the caller hands in.

mod globals;
mod marshal;
mod runtime;

pub use globals::{HostError, HostFunction, HostGlobals};
pub use marshal::{FromScript, Structured};
pub use runtime::{SandboxConfig, ScriptArgs, ScriptSandbox};

/// Errors from sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Script engine failure: {0}")]
    Engine(String),

    #[error("javascript {0} does not declare a function run()")]
    MissingRun(String),

    /// A native `Error` instance was thrown or used as a rejection reason
    #[error("{class}: {message}\n{stack}")]
    Exception {
        class: String,
        message: String,
        stack: String,
    },

    #[error("script threw a non-error value: {0}")]
    Thrown(String),

    #[error("promise rejected with a non-error value: {0}")]
    Rejected(String),

    #[error("promise returned by {0} never settled")]
    Unsettled(String),

    #[error("invalid cast: {0}")]
    InvalidCast(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// The engine raised an exception that is still pending in the context.
    /// The runtime swaps it for the thrown value before returning.
    #[error("script raised an exception")]
    PendingException,
}

impl From<rquickjs::Error> for SandboxError {
    fn from(err: rquickjs::Error) -> Self {
        match err {
            rquickjs::Error::Exception => SandboxError::PendingException,
            other => SandboxError::Engine(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
