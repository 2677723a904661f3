//! File-backed operation store
//!
//! Layout, one directory per operation:
//!
//! ```text
//! <root>/<name>/operation.json   the whole record, source included
//! ```
//!
//! A record is written to a temp file in the same directory and renamed into
//! place, so a reader in any process sees either the old or the new record.
//! Within a process writers hold the store lock exclusively, readers share it.

use crate::operation::Operation;
use crate::store::{validate_name, OperationStore, Result, StoreError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const RECORD_FILE: &str = "operation.json";

#[derive(Debug)]
pub struct FsOperationStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FsOperationStore {
    /// The root directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    /// Open using the default path (~/.backoffice/operations)
    pub fn open_default() -> Option<Self> {
        let root = dirs::home_dir()?.join(".backoffice").join("operations");
        Some(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_record(&self, name: &str) -> Result<String> {
        let path = self.root.join(name).join(RECORD_FILE);
        fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io {
                    name: name.to_string(),
                    action: "read",
                    source,
                }
            }
        })
    }
}

impl OperationStore for FsOperationStore {
    fn get_operation(&self, name: &str) -> Result<Arc<Operation>> {
        validate_name(name)?;
        let _guard = self.lock.read().map_err(|_| StoreError::Poisoned)?;

        let record = self.read_record(name)?;
        let mut operation: Operation = serde_json::from_str(&record).map_err(|source| StoreError::Decode {
            name: name.to_string(),
            action: "decode",
            source,
        })?;
        // The directory name wins over whatever the record says
        operation.name = name.to_string();

        Ok(Arc::new(operation))
    }

    fn add_operation(&self, operation: Operation) -> Result<()> {
        validate_name(&operation.name)?;
        let _guard = self.lock.write().map_err(|_| StoreError::Poisoned)?;

        let name = operation.name.clone();
        let io_error = |action: &'static str| {
            let name = name.clone();
            move |source: io::Error| StoreError::Io { name, action, source }
        };

        let dir = self.root.join(&name);
        fs::create_dir_all(&dir).map_err(io_error("create directory for"))?;

        let record = serde_json::to_vec_pretty(&operation).map_err(|source| StoreError::Decode {
            name: name.clone(),
            action: "encode",
            source,
        })?;
        write_atomic(&dir, RECORD_FILE, &record).map_err(io_error("write"))?;

        info!(operation = %name, dir = %dir.display(), "operation saved");
        Ok(())
    }

    fn list_operations(&self) -> Result<Vec<String>> {
        let _guard = self.lock.read().map_err(|_| StoreError::Poisoned)?;

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    name: self.root.display().to_string(),
                    action: "list",
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_name(&name).is_err() || !entry.path().join(RECORD_FILE).is_file() {
                debug!(entry = %name, "skipping non-operation entry");
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

fn write_atomic(dir: &Path, file: &str, contents: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(file)).map_err(|err| err.error)?;
    Ok(())
}
