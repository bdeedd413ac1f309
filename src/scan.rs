//! Scan orchestration.
//!
//! A `Scanner` walks every function a module reports, fingerprints it and
//! runs the matchers against a loaded `SignatureStore`. The two outward scan
//! operations differ only in whether functions without an exact match get a
//! similarity pass; both always resolve main.

use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::config::ScanConfig;
use crate::disasm::IcedDecoder;
use crate::error::Result;
use crate::fingerprint::Fingerprinter;
use crate::matcher::{EntryMatch, EntryResolver, ExactMatcher, SimilarityMatcher};
use crate::module::{LabelSink, ModuleSource, ScanContext};
use crate::signatures::SignatureStore;

/// Which matchers a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Exact fingerprint lookup plus main resolution.
    Exact,
    /// Exact, then Jaccard similarity for functions left unmatched.
    Similarity,
}

/// Counts reported by one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub mode: ScanMode,
    /// Functions reported by the module.
    pub functions_total: usize,
    /// Functions that produced a non-empty fingerprint.
    pub functions_scanned: usize,
    /// Functions below the size floor, empty after decoding, or whose
    /// fingerprint could not be built.
    pub functions_skipped: usize,
    pub exact_matches: usize,
    pub similarity_matches: usize,
    /// The resolved call to main, if any.
    pub entry: Option<EntryMatch>,
}

impl ScanSummary {
    fn new(mode: ScanMode, functions_total: usize) -> Self {
        Self {
            mode,
            functions_total,
            functions_scanned: 0,
            functions_skipped: 0,
            exact_matches: 0,
            similarity_matches: 0,
            entry: None,
        }
    }

    /// Labels applied, main included.
    pub fn total(&self) -> usize {
        self.exact_matches + self.similarity_matches + usize::from(self.entry.is_some())
    }
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Applied labels to {} function(s)", self.total())
    }
}

/// Drives fingerprinting and matching over a module.
#[derive(Debug)]
pub struct Scanner<'s> {
    store: &'s SignatureStore,
    config: ScanConfig,
    fingerprinter: Fingerprinter<IcedDecoder>,
}

impl<'s> Scanner<'s> {
    pub fn new(store: &'s SignatureStore, config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let fingerprinter = Fingerprinter::new(IcedDecoder::new(config.bitness)?);
        Ok(Self {
            store,
            config,
            fingerprinter,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// "scan exact": exact matching and main resolution.
    pub fn scan_exact<M, L>(&self, module: &M, labels: &mut L) -> Result<ScanSummary>
    where
        M: ModuleSource + ?Sized,
        L: LabelSink + ?Sized,
    {
        let ctx = ScanContext::capture(module)?;
        Ok(self.scan_context(&ctx, ScanMode::Exact, labels))
    }

    /// "scan similarity": as `scan_exact`, plus a similarity pass over
    /// functions without an exact match.
    pub fn scan_similarity<M, L>(&self, module: &M, labels: &mut L) -> Result<ScanSummary>
    where
        M: ModuleSource + ?Sized,
        L: LabelSink + ?Sized,
    {
        let ctx = ScanContext::capture(module)?;
        Ok(self.scan_context(&ctx, ScanMode::Similarity, labels))
    }

    /// Scan an already captured module.
    pub fn scan_context<L>(&self, ctx: &ScanContext, mode: ScanMode, labels: &mut L) -> ScanSummary
    where
        L: LabelSink + ?Sized,
    {
        let window = self.window();
        let exact = ExactMatcher::new(self.store);
        let mut resolver = EntryResolver::new(self.store, window);
        let similarity = match mode {
            ScanMode::Similarity => Some(SimilarityMatcher::new(
                self.store,
                self.config.similarity.clone(),
            )),
            ScanMode::Exact => None,
        };

        let mut summary = ScanSummary::new(mode, ctx.functions().len());
        for func in ctx.functions() {
            let size = func.size();
            if size < self.config.min_function_size {
                summary.functions_skipped += 1;
                continue;
            }
            let len = size.min(self.config.max_function_size) as usize;
            let start = func.rva_start;
            let Some(code) = ctx.bytes_at(start) else {
                trace!(rva = start, "function outside module image");
                summary.functions_skipped += 1;
                continue;
            };

            let fp = match self.fingerprinter.fingerprint(code, start, len, false) {
                Ok(fp) if !fp.is_empty() => fp,
                Ok(_) => {
                    summary.functions_skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(rva = start, error = %e, "fingerprint failed");
                    summary.functions_skipped += 1;
                    continue;
                }
            };
            summary.functions_scanned += 1;

            let address = ctx.base().wrapping_add(start);
            let hit = exact.apply(&fp, address, labels);
            summary.exact_matches += hit;

            resolver.observe(&self.fingerprinter, ctx, start, &fp, labels);

            if hit > 0 {
                continue;
            }
            if let Some(similarity) = &similarity {
                match self.fingerprinter.fingerprint(code, start, len, true) {
                    Ok(branchy) => {
                        summary.similarity_matches += similarity.apply(&branchy, address, labels);
                    }
                    Err(e) => warn!(rva = start, error = %e, "fingerprint failed"),
                }
            }
        }

        if !resolver.is_resolved() {
            debug!("no startup routine matched, backtracking from entry point");
            resolver.backtrack(&self.fingerprinter, ctx, labels);
        }
        summary.entry = resolver.into_resolved();

        info!(
            exact = summary.exact_matches,
            entry = summary.entry.is_some(),
            similarity = summary.similarity_matches,
            total = summary.total(),
            "Applied labels to {} function(s)",
            summary.total()
        );
        summary
    }

    fn window(&self) -> usize {
        usize::try_from(self.config.max_function_size).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LibIdentError;
    use crate::module::{FunctionRange, InMemoryModule, LabelMap};

    const BASE: u64 = 0x140000000;

    fn config() -> ScanConfig {
        ScanConfig {
            min_function_size: 1,
            ..ScanConfig::default()
        }
    }

    // 0x100: push rbp; mov rbp, rsp; xor eax, eax; pop rbp; ret
    // 0x200: push rbp; mov rbp, rsp; xor eax, eax; xor ecx, ecx; pop rbp; ret
    fn module() -> InMemoryModule {
        let mut memory = vec![0xCCu8; 0x300];
        memory[0x100..0x108].copy_from_slice(&[0x55, 0x48, 0x89, 0xE5, 0x31, 0xC0, 0x5D, 0xC3]);
        memory[0x200..0x20A]
            .copy_from_slice(&[0x55, 0x48, 0x89, 0xE5, 0x31, 0xC0, 0x31, 0xC9, 0x5D, 0xC3]);
        InMemoryModule {
            base: BASE,
            memory,
            functions: vec![FunctionRange::new(0x100, 0x107), FunctionRange::new(0x200, 0x209)],
            entry_point: BASE + 0x100,
        }
    }

    #[test]
    fn exact_scan_counts_hits_only() {
        let store = SignatureStore::from_source_str("5589315dc3+1 strlen\n").unwrap();
        let scanner = Scanner::new(&store, config()).unwrap();
        let mut labels = LabelMap::new();
        let summary = scanner.scan_exact(&module(), &mut labels).unwrap();
        assert_eq!(summary.exact_matches, 1);
        assert_eq!(summary.similarity_matches, 0);
        assert_eq!(summary.functions_scanned, 2);
        assert_eq!(summary.total(), 1);
        assert_eq!(labels.get(BASE + 0x100), Some("strlen"));
        assert_eq!(labels.get(BASE + 0x200), None);
    }

    #[test]
    fn similarity_scan_labels_variant() {
        let store = SignatureStore::from_source_str("5589315dc3+1 strlen\n").unwrap();
        let scanner = Scanner::new(&store, config()).unwrap();
        let mut labels = LabelMap::new();
        let summary = scanner.scan_similarity(&module(), &mut labels).unwrap();
        assert_eq!(summary.exact_matches, 1);
        assert_eq!(summary.similarity_matches, 1);
        assert_eq!(labels.get(BASE + 0x200), Some("strlen"));
        assert_eq!(summary.to_string(), "Applied labels to 2 function(s)");
    }

    #[test]
    fn size_floor_skips_small_functions() {
        let store = SignatureStore::from_source_str("5589315dc3+1 strlen\n").unwrap();
        let scanner = Scanner::new(&store, ScanConfig::default()).unwrap();
        let mut labels = LabelMap::new();
        let summary = scanner.scan_exact(&module(), &mut labels).unwrap();
        assert_eq!(summary.functions_skipped, 2);
        assert_eq!(summary.functions_scanned, 0);
        assert!(labels.is_empty());
    }

    #[test]
    fn window_truncates_long_functions() {
        let store = SignatureStore::from_source_str("5589 prologue\n").unwrap();
        let cfg = ScanConfig {
            min_function_size: 1,
            max_function_size: 4,
            ..ScanConfig::default()
        };
        let scanner = Scanner::new(&store, cfg).unwrap();
        let mut labels = LabelMap::new();
        let summary = scanner.scan_exact(&module(), &mut labels).unwrap();
        assert_eq!(summary.exact_matches, 2);
    }

    #[test]
    fn functions_outside_image_are_skipped() {
        let store = SignatureStore::new();
        let scanner = Scanner::new(&store, config()).unwrap();
        let mut m = module();
        m.functions.push(FunctionRange::new(0x1000, 0x1010));
        let summary = scanner.scan_exact(&m, &mut LabelMap::new()).unwrap();
        assert_eq!(summary.functions_total, 3);
        assert_eq!(summary.functions_skipped, 1);
    }

    #[test]
    fn rejects_invalid_config() {
        let store = SignatureStore::new();
        let cfg = ScanConfig {
            bitness: 8,
            ..ScanConfig::default()
        };
        assert!(matches!(
            Scanner::new(&store, cfg),
            Err(LibIdentError::UnsupportedBitness(8))
        ));
    }
}
