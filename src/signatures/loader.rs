//! Loading signatures from the cache or from a signature directory.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::SignatureConfig;
use crate::error::{LibIdentError, Result};
use crate::signatures::{cache, parser, SignatureStore};

/// zstd frame magic number (little-endian 0xFD2FB528).
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Where a store's contents came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Cache,
    Source,
}

/// Outcome of a load, beyond the store itself.
#[derive(Debug)]
pub struct LoadReport {
    pub source: LoadSource,
    /// Signature files parsed to completion.
    pub files_parsed: usize,
    /// Files whose parse was abandoned, with the reason.
    pub failures: Vec<(PathBuf, LibIdentError)>,
}

impl LoadReport {
    fn from_cache() -> Self {
        Self {
            source: LoadSource::Cache,
            files_parsed: 0,
            failures: Vec::new(),
        }
    }
}

/// Load signatures, preferring the cache.
///
/// When both cache files are present they are read directly. Otherwise (or
/// when the cache cannot be decoded) the source directory is parsed and the
/// cache is rewritten in the background.
pub fn load(config: &SignatureConfig) -> Result<(SignatureStore, LoadReport)> {
    if cache::is_present(config) {
        match cache::read(config) {
            Ok(store) => return Ok((store, LoadReport::from_cache())),
            Err(e) => warn!(error = %e, "signature cache unreadable, rebuilding from source"),
        }
    } else {
        debug!("signature cache missing, parsing sources");
    }
    refresh(config)
}

/// Re-parse the source directory and overwrite the cache, ignoring any
/// existing cache.
pub fn refresh(config: &SignatureConfig) -> Result<(SignatureStore, LoadReport)> {
    let (store, report) = load_directory(&config.source_dir, &config.extension)?;
    cache::persist_in_background(&store, config);
    Ok((store, report))
}

/// Parse every `*.<extension>` file under `dir`, recursively.
///
/// A malformed file is recorded in the report and does not stop the others.
/// Only a missing or unreadable root directory is an error.
pub fn load_directory(dir: &Path, extension: &str) -> Result<(SignatureStore, LoadReport)> {
    if !dir.is_dir() {
        return Err(LibIdentError::InvalidInput(format!(
            "signature directory {} does not exist",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(dir, extension, &mut files)?;
    files.sort();

    let mut store = SignatureStore::new();
    let mut report = LoadReport {
        source: LoadSource::Source,
        files_parsed: 0,
        failures: Vec::new(),
    };

    for path in files {
        match load_file(&path, &mut store) {
            Ok(n) => {
                debug!(path = %path.display(), signatures = n, "signature file parsed");
                report.files_parsed += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "signature file rejected");
                report.failures.push((path, e));
            }
        }
    }

    info!(
        functions = store.len_functions(),
        entries = store.len_entries(),
        files = report.files_parsed,
        failed = report.failures.len(),
        "signatures parsed"
    );
    Ok((store, report))
}

fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if let Err(e) = collect_files(&path, extension, out) {
                debug!(dir = %path.display(), error = %e, "skipping unreadable directory");
            }
        } else if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            out.push(path);
        }
    }
    Ok(())
}

fn load_file(path: &Path, store: &mut SignatureStore) -> Result<usize> {
    let raw = fs::read(path)?;
    let text = decode_source(raw)?;
    parser::parse_source(path, &text, store)
}

/// Decompress (when zstd-framed) and validate a signature file's contents.
pub fn decode_source(raw: Vec<u8>) -> Result<String> {
    let bytes = if raw.starts_with(&ZSTD_MAGIC) {
        zstd::stream::decode_all(raw.as_slice())?
    } else {
        raw
    };
    String::from_utf8(bytes)
        .map_err(|e| LibIdentError::InvalidInput(format!("signature file is not UTF-8: {}", e)))
}
