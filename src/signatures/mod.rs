//! Signature database: record types, source parsing, loading and caching.
//!
//! A `SignatureStore` holds two tables keyed by fingerprint hex string:
//! library function signatures and entry signatures (startup routines that
//! call the user's main function). Stores are built once, by parsing a
//! signature directory or by reading the on-disk cache, and are read-only
//! while scanning.

pub mod cache;
pub mod loader;
pub mod parser;

pub use loader::{load, load_directory, refresh, LoadReport, LoadSource};
pub use parser::{parse_line, SignatureLine};

use std::collections::HashMap;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A known library function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct FunctionSignature {
    /// Label applied to matching functions.
    pub name: String,
    /// Branch instructions in the reference function.
    pub branches: u32,
}

/// A startup routine whose fixed body contains the call to the user's main.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct EntrySignature {
    /// Label applied to the call target.
    pub name: String,
    /// Offset of the call instruction from the start of the routine.
    pub from_function: u64,
    /// Offset of the call instruction from the process entry point.
    pub from_entry: i64,
}

/// Function signatures keyed by fingerprint hex.
pub type FunctionTable = HashMap<String, FunctionSignature>;
/// Entry signatures keyed by fingerprint hex.
pub type EntryTable = HashMap<String, EntrySignature>;

/// In-memory signature database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureStore {
    functions: FunctionTable,
    entries: EntryTable,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already-populated tables.
    pub fn from_tables(functions: FunctionTable, entries: EntryTable) -> Self {
        Self { functions, entries }
    }

    /// Parse signature source text directly, without touching the filesystem.
    pub fn from_source_str(text: &str) -> crate::error::Result<Self> {
        let mut store = Self::new();
        parser::parse_source(std::path::Path::new("<memory>"), text, &mut store)?;
        Ok(store)
    }

    pub(crate) fn insert(&mut self, line: SignatureLine) {
        match line {
            SignatureLine::Function { key, signature } => {
                self.functions.insert(key, signature);
            }
            SignatureLine::Entry { key, signature } => {
                self.entries.insert(key, signature);
            }
        }
    }

    pub fn function(&self, key: &str) -> Option<&FunctionSignature> {
        self.functions.get(key)
    }

    pub fn entry(&self, key: &str) -> Option<&EntrySignature> {
        self.entries.get(key)
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn entries(&self) -> &EntryTable {
        &self.entries
    }

    /// Function signatures in ascending key order.
    pub fn functions_sorted(&self) -> Vec<(&str, &FunctionSignature)> {
        let mut v: Vec<_> = self
            .functions
            .iter()
            .map(|(k, s)| (k.as_str(), s))
            .collect();
        v.sort_unstable_by(|a, b| a.0.cmp(b.0));
        v
    }

    /// Entry signatures in ascending key order.
    pub fn entries_sorted(&self) -> Vec<(&str, &EntrySignature)> {
        let mut v: Vec<_> = self.entries.iter().map(|(k, s)| (k.as_str(), s)).collect();
        v.sort_unstable_by(|a, b| a.0.cmp(b.0));
        v
    }

    pub fn len_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn len_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.entries.is_empty()
    }
}
