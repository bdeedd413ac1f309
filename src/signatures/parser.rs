//! Signature source line grammar.
//!
//! Each non-blank line is `<key> <label>`. The key selects the table:
//!
//! - `<hex>_<from_function>!<from_entry>`: entry signature
//! - `<hex>+<branches>`: function signature with a branch count
//! - `<hex>`: function signature, branch count 0
//!
//! A `_` key without `!` carries no usable offsets and is skipped.

use std::path::Path;

use crate::error::{LibIdentError, Result};
use crate::signatures::{EntrySignature, FunctionSignature, SignatureStore};

/// One parsed source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureLine {
    Function {
        key: String,
        signature: FunctionSignature,
    },
    Entry {
        key: String,
        signature: EntrySignature,
    },
}

/// Parse a single line.
///
/// `Ok(None)` means the line contributes nothing (blank, or an entry key
/// without offsets). `Err` carries a message describing why the line is
/// malformed.
pub fn parse_line(line: &str) -> std::result::Result<Option<SignatureLine>, String> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() != 2 {
        return Err(format!("expected 2 fields, found {}", fields.len()));
    }
    let (token, name) = (fields[0], fields[1].to_string());

    if let Some((key, offsets)) = token.split_once('_') {
        let Some((from_function, from_entry)) = offsets.split_once('!') else {
            return Ok(None);
        };
        let from_function = from_function
            .parse::<u64>()
            .map_err(|e| format!("bad function offset {:?}: {}", from_function, e))?;
        let from_entry = from_entry
            .parse::<i64>()
            .map_err(|e| format!("bad entry-point offset {:?}: {}", from_entry, e))?;
        return Ok(Some(SignatureLine::Entry {
            key: key.to_string(),
            signature: EntrySignature {
                name,
                from_function,
                from_entry,
            },
        }));
    }

    if let Some((key, branches)) = token.split_once('+') {
        let branches = branches
            .parse::<u32>()
            .map_err(|e| format!("bad branch count {:?}: {}", branches, e))?;
        return Ok(Some(SignatureLine::Function {
            key: key.to_string(),
            signature: FunctionSignature { name, branches },
        }));
    }

    Ok(Some(SignatureLine::Function {
        key: token.to_string(),
        signature: FunctionSignature { name, branches: 0 },
    }))
}

/// Parse a whole source file into `store`.
///
/// Parsing stops at the first malformed line. Lines before it stay in the
/// store; the error names the file and the 1-based line number.
pub fn parse_source(path: &Path, text: &str, store: &mut SignatureStore) -> Result<usize> {
    let mut inserted = 0usize;
    for (idx, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(sig)) => {
                store.insert(sig);
                inserted += 1;
            }
            Ok(None) => {}
            Err(message) => {
                return Err(LibIdentError::ParseError {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    message,
                })
            }
        }
    }
    Ok(inserted)
}
