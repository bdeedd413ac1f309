//! Fuzzy matching by opcode palette.
//!
//! Recompiled or lightly patched library code often keeps the same set of
//! instructions while their order and count shift. Functions without an
//! exact match are therefore compared by the Jaccard coefficient of the
//! *sets* of opcode values they contain. Two cheap filters (branch count and
//! fingerprint length) run first so the bitmap comparison only happens for
//! plausible candidates.

use tracing::{debug, trace};

use crate::config::SimilarityConfig;
use crate::fingerprint::Fingerprint;
use crate::module::LabelSink;
use crate::signatures::{FunctionSignature, SignatureStore};

/// Presence bitmap over the 256 possible opcode values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpcodeSet([u64; 4]);

impl OpcodeSet {
    pub fn from_opcodes(opcodes: &[u8]) -> Self {
        let mut set = Self::default();
        for &b in opcodes {
            set.insert(b);
        }
        set
    }

    pub fn insert(&mut self, value: u8) {
        self.0[(value >> 6) as usize] |= 1u64 << (value & 63);
    }

    pub fn contains(&self, value: u8) -> bool {
        self.0[(value >> 6) as usize] & (1u64 << (value & 63)) != 0
    }

    pub fn len(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    pub fn intersection_len(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a & b).count_ones())
            .sum()
    }

    pub fn union_len(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a | b).count_ones())
            .sum()
    }
}

/// Jaccard coefficient |A ∩ B| / |A ∪ B|; 0.0 when both sets are empty.
pub fn jaccard(a: &OpcodeSet, b: &OpcodeSet) -> f32 {
    let union = a.union_len(b);
    if union == 0 {
        return 0.0;
    }
    a.intersection_len(b) as f32 / union as f32
}

/// Why a candidate was not labelled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Branch counts differ by more than the tolerance.
    BranchDelta(u32),
    /// Hex lengths differ by more than the tolerance.
    LengthDelta(usize),
    /// Compared, but scored below the threshold.
    BelowThreshold(f32),
}

/// Cheap pre-filters; `Ok` means the pair deserves a bitmap comparison.
pub fn prefilter(
    config: &SimilarityConfig,
    function: &Fingerprint,
    key_hex_len: usize,
    signature_branches: u32,
) -> Result<(), Rejection> {
    let branch_delta = signature_branches.abs_diff(function.branches());
    if branch_delta > config.max_branch_delta {
        return Err(Rejection::BranchDelta(branch_delta));
    }
    let length_delta = key_hex_len.abs_diff(function.hex_len());
    if length_delta > config.max_length_delta {
        return Err(Rejection::LengthDelta(length_delta));
    }
    Ok(())
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch<'s> {
    pub key: &'s str,
    pub signature: &'s FunctionSignature,
    pub score: f32,
}

#[derive(Debug)]
struct Candidate<'s> {
    key: &'s str,
    signature: &'s FunctionSignature,
    opcodes: OpcodeSet,
}

/// Scores fingerprints against every function signature.
///
/// Candidate bitmaps are computed once at construction. Candidates are
/// visited in ascending key order and the first one reaching the threshold
/// wins.
#[derive(Debug)]
pub struct SimilarityMatcher<'s> {
    candidates: Vec<Candidate<'s>>,
    config: SimilarityConfig,
}

impl<'s> SimilarityMatcher<'s> {
    pub fn new(store: &'s SignatureStore, config: SimilarityConfig) -> Self {
        let mut skipped = 0usize;
        let candidates: Vec<Candidate<'s>> = store
            .functions_sorted()
            .into_iter()
            .filter_map(|(key, signature)| match hex::decode(key) {
                Ok(bytes) if !bytes.is_empty() => Some(Candidate {
                    key,
                    signature,
                    opcodes: OpcodeSet::from_opcodes(&bytes),
                }),
                _ => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            debug!(skipped, "function signatures with unusable keys");
        }
        Self { candidates, config }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// First candidate passing the filters and the threshold.
    ///
    /// `fingerprint` should carry a branch count (taken with branch counting
    /// enabled).
    pub fn find(&self, fingerprint: &Fingerprint) -> Option<SimilarityMatch<'s>> {
        if fingerprint.is_empty() {
            return None;
        }
        let function_set = OpcodeSet::from_opcodes(fingerprint.opcodes());
        self.candidates.iter().find_map(|c| {
            match self.evaluate(fingerprint, &function_set, c) {
                Ok(score) => Some(SimilarityMatch {
                    key: c.key,
                    signature: c.signature,
                    score,
                }),
                Err(_) => None,
            }
        })
    }

    /// Label `address` with the first qualifying candidate. Returns the
    /// number of labels applied (0 or 1).
    pub fn apply<L: LabelSink + ?Sized>(
        &self,
        fingerprint: &Fingerprint,
        address: u64,
        labels: &mut L,
    ) -> usize {
        match self.find(fingerprint) {
            Some(m) => {
                trace!(address, name = %m.signature.name, score = m.score, "similarity match");
                labels.set_label(address, &m.signature.name);
                1
            }
            None => 0,
        }
    }

    fn evaluate(
        &self,
        fingerprint: &Fingerprint,
        function_set: &OpcodeSet,
        candidate: &Candidate<'s>,
    ) -> Result<f32, Rejection> {
        prefilter(
            &self.config,
            fingerprint,
            candidate.key.len(),
            candidate.signature.branches,
        )?;
        let score = jaccard(function_set, &candidate.opcodes);
        if score >= self.config.threshold {
            Ok(score)
        } else {
            Err(Rejection::BelowThreshold(score))
        }
    }
}
