//! Target module access: host collaborator traits and the per-scan context.
//!
//! The engine never talks to a debugger or loader directly. A host provides
//! a `ModuleSource` (base address, memory, function list, entry point) and a
//! `LabelSink`; a scan snapshots the former into a `ScanContext` and writes
//! names through the latter.
//!
//! Addresses inside a `ScanContext` come in two spaces: *buffer offsets*
//! index the local copy of module memory (and equal RVAs), while *module
//! addresses* are the real, possibly relocated, virtual addresses.

pub mod image;

pub use image::ImageModule;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;

/// A function's extent as RVAs, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionRange {
    pub rva_start: u64,
    pub rva_end: u64,
}

impl FunctionRange {
    pub fn new(rva_start: u64, rva_end: u64) -> Self {
        Self { rva_start, rva_end }
    }

    /// Size in bytes; zero for an inverted range.
    pub fn size(&self) -> u64 {
        if self.rva_end < self.rva_start {
            0
        } else {
            self.rva_end - self.rva_start + 1
        }
    }
}

/// Host-provided view of the module being scanned.
pub trait ModuleSource {
    /// Load address of the module.
    fn base(&self) -> u64;

    /// Copy of the module's memory, starting at `base()`.
    fn read_memory(&self) -> Result<Vec<u8>>;

    /// Functions discovered by the host's analysis, in the host's order.
    fn functions(&self) -> Result<Vec<FunctionRange>>;

    /// Absolute address of the process entry point.
    fn entry_point(&self) -> u64;
}

/// Host-provided label application. Re-labelling an address overwrites.
pub trait LabelSink {
    fn set_label(&mut self, address: u64, name: &str);
}

impl<T: LabelSink + ?Sized> LabelSink for &mut T {
    fn set_label(&mut self, address: u64, name: &str) {
        (**self).set_label(address, name)
    }
}

/// Ordered address → label map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: BTreeMap<u64, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: u64) -> Option<&str> {
        self.labels.get(&address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.labels.iter().map(|(a, n)| (*a, n.as_str()))
    }
}

impl LabelSink for LabelMap {
    fn set_label(&mut self, address: u64, name: &str) {
        self.labels.insert(address, name.to_string());
    }
}

/// A module whose memory and metadata are already in hand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModule {
    pub base: u64,
    pub memory: Vec<u8>,
    pub functions: Vec<FunctionRange>,
    pub entry_point: u64,
}

impl ModuleSource for InMemoryModule {
    fn base(&self) -> u64 {
        self.base
    }

    fn read_memory(&self) -> Result<Vec<u8>> {
        Ok(self.memory.clone())
    }

    fn functions(&self) -> Result<Vec<FunctionRange>> {
        Ok(self.functions.clone())
    }

    fn entry_point(&self) -> u64 {
        self.entry_point
    }
}

/// Snapshot of a module for the duration of one scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    base: u64,
    image: Vec<u8>,
    functions: Vec<FunctionRange>,
    entry_point: u64,
}

impl ScanContext {
    pub fn new(base: u64, image: Vec<u8>, functions: Vec<FunctionRange>, entry_point: u64) -> Self {
        Self {
            base,
            image,
            functions,
            entry_point,
        }
    }

    /// Read everything a scan needs from the host. Any failure aborts.
    pub fn capture<M: ModuleSource + ?Sized>(module: &M) -> Result<Self> {
        let base = module.base();
        let image = module.read_memory()?;
        let functions = module.functions()?;
        debug!(
            base,
            size = image.len(),
            functions = functions.len(),
            "module captured"
        );
        Ok(Self::new(base, image, functions, module.entry_point()))
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn functions(&self) -> &[FunctionRange] {
        &self.functions
    }

    pub fn entry_point(&self) -> u64 {
        self.entry_point
    }

    /// Bytes from `offset` to the end of the image, if `offset` is inside it.
    pub fn bytes_at(&self, offset: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        self.image.get(start..).filter(|b| !b.is_empty())
    }

    /// Buffer offset of a module address, if it lies inside the image.
    pub fn buffer_offset(&self, address: u64) -> Option<u64> {
        let offset = address.checked_sub(self.base)?;
        (offset < self.image.len() as u64).then_some(offset)
    }

    /// Entry point as a buffer offset.
    pub fn entry_offset(&self) -> Option<u64> {
        self.buffer_offset(self.entry_point)
    }

    /// Translate a buffer-space address to the module's address space.
    ///
    /// Below 64-bit mode, decoded branch targets are truncated to 32 bits,
    /// so the translation wraps the same way.
    pub fn module_address(&self, buffer_address: u64, bitness: u32) -> u64 {
        let address = self.base.wrapping_add(buffer_address);
        if bitness < 64 {
            address & 0xFFFF_FFFF
        } else {
            address
        }
    }
}
