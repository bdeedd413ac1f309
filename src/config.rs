//! Configuration for signature loading and scanning.
//!
//! Every tunable policy value of the engine lives here with the defaults the
//! signature database was built against. Configurations can be loaded from
//! JSON; missing fields fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LibIdentError, Result};

/// Default lower bound on analysed function size, in bytes.
pub const DEFAULT_MIN_FUNCTION_SIZE: u64 = 0x20;
/// Default window size for fingerprinting, in bytes.
pub const DEFAULT_MAX_FUNCTION_SIZE: u64 = 0x100;
/// Default file extension of signature source files.
pub const DEFAULT_SIGNATURE_EXTENSION: &str = "sig";

/// Master configuration for a scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Decoder mode (16, 32 or 64).
    pub bitness: u32,
    /// Functions smaller than this are not fingerprinted.
    pub min_function_size: u64,
    /// Fingerprint window cap; larger functions are truncated.
    pub max_function_size: u64,
    /// Fuzzy matching policy.
    pub similarity: SimilarityConfig,
    /// Where signatures and their cache live.
    pub signatures: SignatureConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            bitness: 64,
            min_function_size: DEFAULT_MIN_FUNCTION_SIZE,
            max_function_size: DEFAULT_MAX_FUNCTION_SIZE,
            similarity: SimilarityConfig::default(),
            signatures: SignatureConfig::default(),
        }
    }
}

impl ScanConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self =
            serde_json::from_str(s).map_err(|e| LibIdentError::Serialization(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to a pretty-printed JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LibIdentError::Serialization(e.to_string()))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.bitness, 16 | 32 | 64) {
            return Err(LibIdentError::UnsupportedBitness(self.bitness));
        }
        if self.max_function_size == 0 {
            return Err(LibIdentError::InvalidInput(
                "max_function_size must be greater than zero".into(),
            ));
        }
        if self.min_function_size > self.max_function_size {
            return Err(LibIdentError::InvalidInput(format!(
                "min_function_size ({:#x}) exceeds max_function_size ({:#x})",
                self.min_function_size, self.max_function_size
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity.threshold) {
            return Err(LibIdentError::InvalidInput(format!(
                "similarity threshold {} outside [0, 1]",
                self.similarity.threshold
            )));
        }
        if self.signatures.function_cache_path() == self.signatures.entry_cache_path() {
            return Err(LibIdentError::InvalidInput(format!(
                "function and entry caches share the file {}",
                self.signatures.function_cache_path().display()
            )));
        }
        Ok(())
    }
}

/// Tolerances for similarity matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Minimum Jaccard coefficient for a label to be applied.
    pub threshold: f32,
    /// Largest accepted difference in branch counts.
    pub max_branch_delta: u32,
    /// Largest accepted difference in fingerprint length, in hex characters.
    pub max_length_delta: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            max_branch_delta: 2,
            max_length_delta: 5,
        }
    }
}

/// Signature source and cache locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Directory scanned recursively for signature files.
    pub source_dir: PathBuf,
    /// Directory holding the two cache files. Defaults to `source_dir`.
    pub cache_dir: Option<PathBuf>,
    /// Extension (without dot) identifying signature files.
    pub extension: String,
    pub function_cache_file: String,
    pub entry_cache_file: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("SymEx"),
            cache_dir: None,
            extension: DEFAULT_SIGNATURE_EXTENSION.to_string(),
            function_cache_file: "functions.cache".to_string(),
            entry_cache_file: "entries.cache".to_string(),
        }
    }
}

impl SignatureConfig {
    /// Configuration rooted at `source_dir` with default file names.
    pub fn with_source_dir<P: Into<PathBuf>>(source_dir: P) -> Self {
        Self {
            source_dir: source_dir.into(),
            ..Self::default()
        }
    }

    fn cache_root(&self) -> &Path {
        self.cache_dir.as_deref().unwrap_or(&self.source_dir)
    }

    /// Path of the function-signature cache file.
    pub fn function_cache_path(&self) -> PathBuf {
        self.cache_root().join(&self.function_cache_file)
    }

    /// Path of the entry-signature cache file.
    pub fn entry_cache_path(&self) -> PathBuf {
        self.cache_root().join(&self.entry_cache_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.bitness, 64);
        assert_eq!(cfg.min_function_size, 0x20);
        assert_eq!(cfg.max_function_size, 0x100);
        assert_eq!(cfg.similarity.threshold, 0.9);
        assert_eq!(cfg.similarity.max_branch_delta, 2);
        assert_eq!(cfg.similarity.max_length_delta, 5);
        assert_eq!(cfg.signatures.extension, "sig");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = ScanConfig::from_json_str(
            r#"{ "bitness": 32, "similarity": { "threshold": 0.75 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.bitness, 32);
        assert_eq!(cfg.similarity.threshold, 0.75);
        assert_eq!(cfg.similarity.max_length_delta, 5);
        assert_eq!(cfg.max_function_size, DEFAULT_MAX_FUNCTION_SIZE);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = ScanConfig::default();
        cfg.bitness = 8;
        assert!(matches!(
            cfg.validate(),
            Err(LibIdentError::UnsupportedBitness(8))
        ));

        let mut cfg = ScanConfig::default();
        cfg.min_function_size = 0x200;
        assert!(cfg.validate().is_err());

        let mut cfg = ScanConfig::default();
        cfg.similarity.threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ScanConfig::default();
        cfg.signatures.entry_cache_file = cfg.signatures.function_cache_file.clone();
        assert!(matches!(cfg.validate(), Err(LibIdentError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_accepts_all_decoder_modes() {
        for bitness in [16, 32, 64] {
            let cfg = ScanConfig {
                bitness,
                ..ScanConfig::default()
            };
            assert!(cfg.validate().is_ok());
        }
    }

    #[test]
    fn test_cache_paths() {
        let mut sigs = SignatureConfig::with_source_dir("/opt/sigs");
        assert_eq!(
            sigs.function_cache_path(),
            PathBuf::from("/opt/sigs/functions.cache")
        );
        sigs.cache_dir = Some(PathBuf::from("/tmp/cache"));
        assert_eq!(
            sigs.entry_cache_path(),
            PathBuf::from("/tmp/cache/entries.cache")
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = ScanConfig::default();
        let json = cfg.to_json_string().unwrap();
        assert_eq!(ScanConfig::from_json_str(&json).unwrap(), cfg);
    }
}
