//! Library function identification by opcode fingerprints.
//!
//! Functions in a module are reduced to the sequence of their primary opcode
//! bytes and looked up in a signature database, exactly or by opcode-set
//! similarity. Startup-code signatures additionally locate the call to the
//! program's main function.
//!
//! ```no_run
//! use libident::{signatures, ImageModule, LabelMap, ScanConfig, Scanner};
//!
//! # fn main() -> libident::Result<()> {
//! let config = ScanConfig::default();
//! let (store, _report) = signatures::load(&config.signatures)?;
//! let module = ImageModule::open("target.exe")?;
//! let scanner = Scanner::new(&store, config)?;
//! let mut labels = LabelMap::new();
//! let summary = scanner.scan_exact(&module, &mut labels)?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

/// Scan and signature configuration
pub mod config;
/// Instruction decoding
pub mod disasm;
/// Error types
pub mod error;
/// Opcode fingerprints
pub mod fingerprint;
/// Tracing subscriber setup
pub mod logging;
/// Exact, entry and similarity matchers
pub mod matcher;
/// Module access and label sinks
pub mod module;
/// Scan orchestration
pub mod scan;
/// Signature database
pub mod signatures;

pub use config::{ScanConfig, SignatureConfig, SimilarityConfig};
pub use error::{LibIdentError, Result};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use matcher::{EntryMatch, EntryPhase};
pub use module::{
    FunctionRange, ImageModule, InMemoryModule, LabelMap, LabelSink, ModuleSource, ScanContext,
};
pub use scan::{ScanMode, ScanSummary, Scanner};
pub use signatures::{EntrySignature, FunctionSignature, SignatureStore};
