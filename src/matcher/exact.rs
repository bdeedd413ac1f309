use tracing::trace;

use crate::fingerprint::Fingerprint;
use crate::module::LabelSink;
use crate::signatures::{FunctionSignature, SignatureStore};

/// Exact fingerprint lookup in the function-signature table.
#[derive(Debug, Clone, Copy)]
pub struct ExactMatcher<'s> {
    store: &'s SignatureStore,
}

impl<'s> ExactMatcher<'s> {
    pub fn new(store: &'s SignatureStore) -> Self {
        Self { store }
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<&'s FunctionSignature> {
        if fingerprint.is_empty() {
            return None;
        }
        self.store.function(fingerprint.as_hex())
    }

    /// Label `address` on a hit. Returns the number of labels applied (0 or 1).
    pub fn apply<L: LabelSink + ?Sized>(
        &self,
        fingerprint: &Fingerprint,
        address: u64,
        labels: &mut L,
    ) -> usize {
        match self.lookup(fingerprint) {
            Some(sig) => {
                trace!(address, name = %sig.name, "exact match");
                labels.set_label(address, &sig.name);
                1
            }
            None => 0,
        }
    }
}
