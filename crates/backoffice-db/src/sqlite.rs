//! SQLite query backend with an r2d2 connection pool

use backoffice_core::{QueryBackend, QueryError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DEFAULT_POOL_SIZE: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to create database dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<DatabaseError> for QueryError {
    fn from(err: DatabaseError) -> Self {
        QueryError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// SQLite-backed query backend
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDatabase {
    /// Open or create the database file
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatabaseError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // WAL lets readers proceed while a script writes
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
        });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        info!(path = %path.display(), pool_size, "database opened");
        Ok(Self { pool })
    }

    /// Open using the default path (~/.backoffice/backoffice.db)
    pub fn open_default() -> Result<Self> {
        let path = dirs::home_dir()
            .ok_or(DatabaseError::NoHomeDir)?
            .join(".backoffice")
            .join("backoffice.db");
        Self::open(path, DEFAULT_POOL_SIZE)
    }

    /// Run one statement, returning every row as ordered column values
    pub fn rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();

        let bound: Vec<SqlValue> = params.iter().map(bind_value).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(bound.iter()))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for index in 0..columns {
                values.push(column_value(row.get_ref(index)?));
            }
            results.push(values);
        }

        debug!(rows = results.len(), params = params.len(), "query finished");
        Ok(results)
    }
}

impl QueryBackend for SqliteDatabase {
    fn query(&self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Vec<Value>>, QueryError> {
        Ok(self.rows(sql, params)?)
    }
}

fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        // Structured values are stored as their JSON text
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::from(integer),
        ValueRef::Real(real) => Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::{InMemoryOperationStore, Operation, OperationExecutor, OperationStore, ValueSchema};
    use serde_json::{json, Map};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn database() -> (TempDir, SqliteDatabase) {
        let tmp = TempDir::new().unwrap();
        let db = SqliteDatabase::open(tmp.path().join("test.db"), 4).unwrap();
        db.rows(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, avatar BLOB)",
            &[],
        )
        .unwrap();
        (tmp, db)
    }

    #[test]
    fn test_insert_and_select_with_params() {
        let (_tmp, db) = database();

        db.rows(
            "INSERT INTO users (name, score) VALUES (?1, ?2), (?3, ?4)",
            &[json!("ana"), json!(9.5), json!("bia"), json!(7)],
        )
        .unwrap();

        let rows = db
            .rows("SELECT id, name, score FROM users WHERE score > ? ORDER BY id", &[json!(5)])
            .unwrap();
        assert_eq!(rows, vec![vec![json!(1), json!("ana"), json!(9.5)], vec![json!(2), json!("bia"), json!(7.0)]]);
    }

    #[test]
    fn test_blobs_become_text() {
        let (_tmp, db) = database();
        db.rows("INSERT INTO users (name, avatar) VALUES ('ana', X'F09F90B7')", &[]).unwrap();

        let rows = db.rows("SELECT avatar, score FROM users", &[]).unwrap();
        assert_eq!(rows, vec![vec![json!("🐷"), Value::Null]]);
    }

    #[test]
    fn test_bind_values() {
        assert_eq!(bind_value(&json!(true)), SqlValue::Integer(1));
        assert_eq!(bind_value(&json!(null)), SqlValue::Null);
        assert_eq!(bind_value(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(bind_value(&json!(["a"])), SqlValue::Text(r#"["a"]"#.to_string()));
    }

    #[test]
    fn test_errors_surface_as_query_errors() {
        let (_tmp, db) = database();
        let err = QueryBackend::query(&db, "SELECT * FROM missing", &[]).unwrap_err();
        assert!(err.to_string().contains("no such table: missing"));
    }

    #[test]
    fn test_concurrent_queries() {
        let (_tmp, db) = database();
        db.rows("INSERT INTO users (name) VALUES ('ana')", &[]).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.rows("SELECT name FROM users", &[]).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![vec![json!("ana")]]);
        }
    }

    #[test]
    fn test_operation_queries_database() {
        let (_tmp, db) = database();
        db.rows("INSERT INTO users (name, score) VALUES ('ana', 9), ('bia', 3)", &[]).unwrap();

        let store = InMemoryOperationStore::new();
        store
            .add_operation(
                Operation::new(
                    "top-users",
                    "function run({ min }) {
                        return query('SELECT name FROM users WHERE score >= ? ORDER BY name', min).map(([name]) => name)
                    }",
                    ValueSchema::array(ValueSchema::string()),
                )
                .with_parameter("min", ValueSchema::number()),
            )
            .unwrap();

        let executor = OperationExecutor::new(Arc::new(store), Arc::new(db));
        let mut arguments = Map::new();
        arguments.insert("min".to_string(), json!(5));

        assert_eq!(executor.execute("top-users", &arguments).unwrap(), json!(["ana"]));
    }
}
