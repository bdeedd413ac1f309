//! Locating the user's main function without symbols.
//!
//! Runtime startup code (the CRT routine that sets up the process and then
//! calls `main`/`WinMain`) is statically linked and byte-stable for a given
//! toolchain. An entry signature fingerprints such a routine and records
//! where its call to main sits, both from the routine's start and from the
//! process entry point. Resolution runs in two phases:
//!
//! 1. Forward: every scanned function whose fingerprint is an entry
//!    signature key is probed at `start + from_function`.
//! 2. Backward, only if forward found nothing: for each entry signature the
//!    call site is taken as `entry_point + from_entry`, the routine start is
//!    recovered from it, and the routine's fingerprint must begin with the
//!    signature key.
//!
//! In both phases the probed instruction must be `call rel`; anything else
//! skips the candidate. The first success ends resolution.

use tracing::{debug, trace};

use crate::disasm::{DecodedInstruction, InstructionDecoder};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::module::{LabelSink, ScanContext};
use crate::signatures::{EntrySignature, SignatureStore};

/// Which phase found main.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPhase {
    Forward,
    Backward,
}

/// A resolved call to the user's main.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMatch {
    /// Module address of the `call` instruction.
    pub call_site: u64,
    /// Module address of the called function, which receives the label.
    pub target: u64,
    pub name: String,
    pub phase: EntryPhase,
}

/// Two-phase main-function resolver. Stops after the first match.
#[derive(Debug)]
pub struct EntryResolver<'s> {
    store: &'s SignatureStore,
    window: usize,
    resolved: Option<EntryMatch>,
}

impl<'s> EntryResolver<'s> {
    /// `window` bounds the fingerprint taken during the backward phase.
    pub fn new(store: &'s SignatureStore, window: usize) -> Self {
        Self {
            store,
            window,
            resolved: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn resolved(&self) -> Option<&EntryMatch> {
        self.resolved.as_ref()
    }

    pub fn into_resolved(self) -> Option<EntryMatch> {
        self.resolved
    }

    /// Forward phase for one function starting at buffer offset `start`.
    ///
    /// `fingerprint` must have been taken without branch counting over the
    /// function's window. Does nothing once main is resolved.
    pub fn observe<D, L>(
        &mut self,
        fingerprinter: &Fingerprinter<D>,
        ctx: &ScanContext,
        start: u64,
        fingerprint: &Fingerprint,
        labels: &mut L,
    ) -> Option<&EntryMatch>
    where
        D: InstructionDecoder,
        L: LabelSink + ?Sized,
    {
        if self.resolved.is_some() || fingerprint.is_empty() {
            return None;
        }
        let store = self.store;
        let sig = store.entry(fingerprint.as_hex())?;
        let call_offset = start.checked_add(sig.from_function)?;
        let ins = decode_at(fingerprinter.decoder(), ctx, call_offset)?;
        if !ins.is_relative_call() {
            trace!(call_offset, "entry candidate is not a relative call");
            return None;
        }
        self.resolve(
            ctx,
            fingerprinter.decoder().bitness(),
            call_offset,
            &ins,
            sig,
            EntryPhase::Forward,
            labels,
        )
    }

    /// Backward phase from the process entry point.
    ///
    /// Entry signatures are tried in ascending key order. Returns the match
    /// from whichever phase produced it; once main is resolved no further
    /// probing happens.
    pub fn backtrack<D, L>(
        &mut self,
        fingerprinter: &Fingerprinter<D>,
        ctx: &ScanContext,
        labels: &mut L,
    ) -> Option<&EntryMatch>
    where
        D: InstructionDecoder,
        L: LabelSink + ?Sized,
    {
        if self.resolved.is_some() {
            return self.resolved.as_ref();
        }
        let Some(entry) = ctx.entry_offset() else {
            debug!(
                entry_point = ctx.entry_point(),
                "entry point outside module image"
            );
            return None;
        };

        let store = self.store;
        for (key, sig) in store.entries_sorted() {
            if key.is_empty() {
                continue;
            }
            let Some(call_offset) = entry.checked_add_signed(sig.from_entry) else {
                continue;
            };
            let Some(ins) = decode_at(fingerprinter.decoder(), ctx, call_offset) else {
                continue;
            };
            if ins.mnemonic != iced_x86::Mnemonic::Call {
                continue;
            }
            let Some(routine) = call_offset.checked_sub(sig.from_function) else {
                continue;
            };
            let Some(code) = ctx.bytes_at(routine) else {
                continue;
            };
            let Ok(fp) = fingerprinter.fingerprint(code, routine, self.window, false) else {
                continue;
            };
            // Prefix, not equality: the window may run past the routine's end.
            if !fp.starts_with_hex(key) || !ins.is_relative_call() {
                continue;
            }
            let bitness = fingerprinter.decoder().bitness();
            if self
                .resolve(
                    ctx,
                    bitness,
                    call_offset,
                    &ins,
                    sig,
                    EntryPhase::Backward,
                    labels,
                )
                .is_some()
            {
                break;
            }
        }
        self.resolved.as_ref()
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve<L: LabelSink + ?Sized>(
        &mut self,
        ctx: &ScanContext,
        bitness: u32,
        call_offset: u64,
        ins: &DecodedInstruction,
        sig: &EntrySignature,
        phase: EntryPhase,
        labels: &mut L,
    ) -> Option<&EntryMatch> {
        let target = ctx.module_address(ins.relative_target?, bitness);
        let call_site = ctx.module_address(call_offset, bitness);
        debug!(call_site, target, name = %sig.name, ?phase, "main resolved");
        labels.set_label(target, &sig.name);
        self.resolved = Some(EntryMatch {
            call_site,
            target,
            name: sig.name.clone(),
            phase,
        });
        self.resolved.as_ref()
    }
}

fn decode_at<D: InstructionDecoder>(
    decoder: &D,
    ctx: &ScanContext,
    offset: u64,
) -> Option<DecodedInstruction> {
    decoder.decode(ctx.bytes_at(offset)?, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::IcedDecoder;
    use crate::module::LabelMap;

    const BASE: u64 = 0x140000000;

    // push rbp; sub rsp, 0x20; call main; add rsp, 0x20; pop rbp; ret
    // laid out at 0x10 with main at 0x80.
    fn image() -> Vec<u8> {
        let mut img = vec![0u8; 0x200];
        let startup = [
            0x55, 0x48, 0x83, 0xEC, 0x20, 0xE8, 0x66, 0x00, 0x00, 0x00, 0x48, 0x83, 0xC4, 0x20,
            0x5D, 0xC3,
        ];
        img[0x10..0x20].copy_from_slice(&startup);
        img[0x80..0x83].copy_from_slice(&[0x31, 0xC0, 0xC3]);
        img
    }

    fn fingerprinter() -> Fingerprinter<IcedDecoder> {
        Fingerprinter::new(IcedDecoder::new(64).unwrap())
    }

    #[test]
    fn forward_labels_call_target() {
        let store = SignatureStore::from_source_str("5583e8835dc3_5!5 main\n").unwrap();
        let ctx = ScanContext::new(BASE, image(), Vec::new(), BASE + 0x10);
        let fpr = fingerprinter();
        let fp = fpr.fingerprint(&ctx.image()[0x10..], 0x10, 16, false).unwrap();
        assert_eq!(fp.as_hex(), "5583e8835dc3");

        let mut labels = LabelMap::new();
        let mut resolver = EntryResolver::new(&store, 0x100);
        let m = resolver
            .observe(&fpr, &ctx, 0x10, &fp, &mut labels)
            .cloned()
            .unwrap();
        assert_eq!(m.phase, EntryPhase::Forward);
        assert_eq!(m.call_site, BASE + 0x15);
        assert_eq!(m.target, BASE + 0x80);
        assert_eq!(labels.get(BASE + 0x80), Some("main"));

        // Already resolved: further observations and backtracking are no-ops.
        assert!(resolver.observe(&fpr, &ctx, 0x10, &fp, &mut labels).is_none());
        assert!(resolver.backtrack(&fpr, &ctx, &mut labels).is_some());
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn forward_skips_non_call_offset() {
        let store = SignatureStore::from_source_str("5583e8835dc3_1!5 main\n").unwrap();
        let ctx = ScanContext::new(BASE, image(), Vec::new(), BASE + 0x10);
        let fpr = fingerprinter();
        let fp = fpr.fingerprint(&ctx.image()[0x10..], 0x10, 16, false).unwrap();
        let mut labels = LabelMap::new();
        let mut resolver = EntryResolver::new(&store, 0x100);
        assert!(resolver.observe(&fpr, &ctx, 0x10, &fp, &mut labels).is_none());
        assert!(!resolver.is_resolved());
        assert!(labels.is_empty());
    }

    #[test]
    fn backward_finds_routine_from_entry_point() {
        let store = SignatureStore::from_source_str("5583e8835dc3_5!5 main\n").unwrap();
        let ctx = ScanContext::new(BASE, image(), Vec::new(), BASE + 0x10);
        let mut labels = LabelMap::new();
        let mut resolver = EntryResolver::new(&store, 0x100);
        let m = resolver
            .backtrack(&fingerprinter(), &ctx, &mut labels)
            .cloned()
            .unwrap();
        assert_eq!(m.phase, EntryPhase::Backward);
        assert_eq!(m.target, BASE + 0x80);
        assert_eq!(labels.get(BASE + 0x80), Some("main"));
    }

    #[test]
    fn backward_requires_key_prefix() {
        let store = SignatureStore::from_source_str("5583e8839090_5!5 main\n").unwrap();
        let ctx = ScanContext::new(BASE, image(), Vec::new(), BASE + 0x10);
        let mut labels = LabelMap::new();
        let mut resolver = EntryResolver::new(&store, 0x100);
        assert!(resolver
            .backtrack(&fingerprinter(), &ctx, &mut labels)
            .is_none());
        assert!(labels.is_empty());
    }

    #[test]
    fn backward_handles_offsets_outside_image() {
        let store = SignatureStore::from_source_str(
            "55_5!-4096 far_before\n5583_9999!5 bad_start\n",
        )
        .unwrap();
        let ctx = ScanContext::new(BASE, image(), Vec::new(), BASE + 0x10);
        let mut labels = LabelMap::new();
        let mut resolver = EntryResolver::new(&store, 0x100);
        assert!(resolver
            .backtrack(&fingerprinter(), &ctx, &mut labels)
            .is_none());
    }

    #[test]
    fn entry_point_outside_image() {
        let store = SignatureStore::from_source_str("5583e8835dc3_5!5 main\n").unwrap();
        let ctx = ScanContext::new(BASE, image(), Vec::new(), 0x1000);
        let mut labels = LabelMap::new();
        let mut resolver = EntryResolver::new(&store, 0x100);
        assert!(resolver
            .backtrack(&fingerprinter(), &ctx, &mut labels)
            .is_none());
    }
}
