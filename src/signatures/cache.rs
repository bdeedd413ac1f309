//! On-disk cache of the two signature tables.
//!
//! Each table is a standalone bincode file. Writes go through a `.tmp`
//! sibling that is renamed into place, so a reader never sees a partially
//! written cache under its final name.

use std::fs;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use tracing::{debug, warn};

use crate::config::SignatureConfig;
use crate::error::{LibIdentError, Result};
use crate::signatures::{EntryTable, FunctionTable, SignatureStore};

/// True when both cache files exist.
pub fn is_present(config: &SignatureConfig) -> bool {
    config.function_cache_path().is_file() && config.entry_cache_path().is_file()
}

/// Read both tables from the cache.
pub fn read(config: &SignatureConfig) -> Result<SignatureStore> {
    let functions: FunctionTable = read_table(&config.function_cache_path())?;
    let entries: EntryTable = read_table(&config.entry_cache_path())?;
    debug!(
        functions = functions.len(),
        entries = entries.len(),
        "signature cache loaded"
    );
    Ok(SignatureStore::from_tables(functions, entries))
}

/// Write both tables and wait for completion.
pub fn write(store: &SignatureStore, config: &SignatureConfig) -> Result<()> {
    write_table(&config.function_cache_path(), store.functions())?;
    write_table(&config.entry_cache_path(), store.entries())?;
    Ok(())
}

/// Write both tables on the rayon pool without waiting.
///
/// The two writes are independent tasks. Failures are logged and otherwise
/// unobserved: a missing or unreadable cache only means the next load
/// rebuilds from source.
pub fn persist_in_background(store: &SignatureStore, config: &SignatureConfig) {
    let functions = store.functions().clone();
    let function_path = config.function_cache_path();
    rayon::spawn(move || {
        if let Err(e) = write_table(&function_path, &functions) {
            warn!(path = %function_path.display(), error = %e, "function cache write failed");
        }
    });

    let entries = store.entries().clone();
    let entry_path = config.entry_cache_path();
    rayon::spawn(move || {
        if let Err(e) = write_table(&entry_path, &entries) {
            warn!(path = %entry_path.display(), error = %e, "entry cache write failed");
        }
    });
}

fn read_table<T: Decode<()>>(path: &Path) -> Result<T> {
    let data = fs::read(path)?;
    let cfg = bincode::config::standard();
    let (table, _): (T, _) = bincode::decode_from_slice(&data, cfg)
        .map_err(|e| LibIdentError::Serialization(format!("{}: {}", path.display(), e)))?;
    Ok(table)
}

fn write_table<T: Encode>(path: &Path, table: &T) -> Result<()> {
    let cfg = bincode::config::standard();
    let bytes = bincode::encode_to_vec(table, cfg)
        .map_err(|e| LibIdentError::Serialization(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "cache table written");
    Ok(())
}

/// `<file>.tmp` next to `path`; the full file name is kept so distinct
/// tables never share a temporary file.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
