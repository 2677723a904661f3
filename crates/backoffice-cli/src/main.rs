//! Backoffice CLI - typed, sandboxed operations for generated admin panels
//!
//! Usage:
//!   backoffice operation add <file>   - Store an operation record
//!   backoffice operation show <name>  - Print a stored operation
//!   backoffice operation list         - List stored operations
//!   backoffice execute <name>         - Run an operation once
//!   backoffice serve                  - Start the HTTP execute endpoint

mod config;
mod http;

use anyhow::Context;
use backoffice_core::{ExecuteResponse, FsOperationStore, Operation, OperationExecutor, OperationStore};
use backoffice_db::SqliteDatabase;
use clap::{Parser, Subcommand};
use config::AppConfig;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "backoffice")]
#[command(version)]
#[command(about = "Schema-typed, sandboxed operation runtime", long_about = None)]
struct Cli {
    /// Config file (default: ~/.backoffice/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored operations
    Operation {
        #[command(subcommand)]
        action: OperationAction,
    },

    /// Run an operation once and print the response
    Execute {
        /// Name of the operation
        name: String,

        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },

    /// Start the HTTP execute endpoint
    Serve {
        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,
    },
}

#[derive(Subcommand)]
enum OperationAction {
    /// Store an operation from a JSON record
    Add {
        /// Path to the record ({"name", "javascriptCode", "parameters", "return"})
        file: PathBuf,
    },

    /// Print a stored operation as JSON
    Show {
        /// Name of the operation
        name: String,
    },

    /// List stored operations
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let store = Arc::new(FsOperationStore::new(&config.operations_dir));

    match cli.command {
        Commands::Operation { action } => match action {
            OperationAction::Add { file } => {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let operation: Operation = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid operation record {}", file.display()))?;
                let name = operation.name.clone();
                store.add_operation(operation)?;
                println!("Stored operation {name}");
            }
            OperationAction::Show { name } => {
                let operation = store.get_operation(&name)?;
                println!("{}", serde_json::to_string_pretty(operation.as_ref())?);
            }
            OperationAction::List => {
                let names = store.list_operations()?;
                if names.is_empty() {
                    println!("No operations stored in {}", store.root().display());
                }
                for name in names {
                    println!("{name}");
                }
            }
        },

        Commands::Execute { name, args } => {
            let arguments = parse_arguments(args.as_deref())?;
            let executor = executor(&config, store)?;

            let outcome = tokio::task::spawn_blocking(move || executor.execute(&name, &arguments)).await?;
            let response = ExecuteResponse::from(&outcome);
            println!("{}", serde_json::to_string_pretty(&response)?);
            if outcome.is_err() {
                std::process::exit(1);
            }
        }

        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            let executor = executor(&config, store)?;
            http::serve(&listen, Arc::new(executor)).await?;
        }
    }

    Ok(())
}

fn executor(config: &AppConfig, store: Arc<FsOperationStore>) -> anyhow::Result<OperationExecutor> {
    let database = SqliteDatabase::open(&config.database, config.pool_size)
        .with_context(|| format!("Failed to open database {}", config.database.display()))?;
    Ok(OperationExecutor::with_config(store, Arc::new(database), config.sandbox()))
}

fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--args must be JSON")? {
        Value::Object(arguments) => Ok(arguments),
        other => anyhow::bail!("--args must be a JSON object, got {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        assert!(parse_arguments(None).unwrap().is_empty());

        let arguments = parse_arguments(Some(r#"{"a": 2, "b": 3}"#)).unwrap();
        assert_eq!(arguments.get("a"), Some(&Value::from(2)));

        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{")).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["backoffice", "--config", "/tmp/c.json", "execute", "sum", "--args", "{}"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        assert!(matches!(cli.command, Commands::Execute { ref name, .. } if name == "sum"));

        let cli = Cli::try_parse_from(["backoffice", "operation", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::Operation { action: OperationAction::List }));
    }
}
