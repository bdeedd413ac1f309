//! Error types for the libident signature engine.
//!
//! Only failures that abort a whole operation are modelled here. Conditions
//! that merely skip a candidate (a decode failure at a probe address, a
//! filter rejection) are expressed as `Option::None` at the call site.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for libident operations.
#[derive(Debug, Error)]
pub enum LibIdentError {
    /// Invalid input data or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A signature source line could not be parsed
    #[error("Parse error in {path}:{line}: {message}")]
    ParseError {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Decoder mode not supported by the backend
    #[error("Unsupported bitness: {0}")]
    UnsupportedBitness(u32),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The host could not provide the module's memory
    #[error("Couldn't read module memory at {base:#x}: {message}")]
    ModuleRead { base: u64, message: String },

    /// The host could not enumerate functions
    #[error("Failed to get list of functions: {0}")]
    FunctionList(String),

    /// A working buffer could not be reserved
    #[error("Allocation of {requested} bytes failed")]
    Allocation { requested: usize },

    /// An executable image could not be mapped
    #[error("Image error: {0}")]
    Image(String),
}

/// Result type alias for libident operations
pub type Result<T> = std::result::Result<T, LibIdentError>;
