//! Matchers that turn fingerprints into labels.
//!
//! - `exact`: fingerprint equality against function signatures
//! - `entry`: locating the call to the user's main from startup code
//! - `similarity`: Jaccard fallback for functions with no exact match

pub mod entry;
pub mod exact;
pub mod similarity;

pub use entry::{EntryMatch, EntryPhase, EntryResolver};
pub use exact::ExactMatcher;
pub use similarity::{jaccard, OpcodeSet, Rejection, SimilarityMatch, SimilarityMatcher};
