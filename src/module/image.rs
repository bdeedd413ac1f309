//! File-backed module source.
//!
//! Maps an executable's loadable segments into a flat image the way a loader
//! would, so a scan can run against a file on disk instead of a live process.
//! The function list comes from sized text symbols when the file has them;
//! hosts with better function discovery can replace it.

use std::path::Path;

use object::{BinaryFormat, Object, ObjectSegment, ObjectSymbol, SymbolKind};
use tracing::debug;

use crate::error::{LibIdentError, Result};
use crate::module::{FunctionRange, ModuleSource};

/// Largest image `ImageModule` will lay out (256 MiB).
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ImageModule {
    base: u64,
    image: Vec<u8>,
    functions: Vec<FunctionRange>,
    entry_point: u64,
    bitness: u32,
}

impl ImageModule {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with_limit(data, DEFAULT_MAX_IMAGE_SIZE)
    }

    pub fn parse_with_limit(data: &[u8], max_image_size: u64) -> Result<Self> {
        let obj = object::File::parse(data).map_err(|e| LibIdentError::Image(e.to_string()))?;

        let segments: Vec<_> = obj.segments().filter(|s| s.size() > 0).collect();
        if segments.is_empty() {
            return Err(LibIdentError::Image("no loadable segments".into()));
        }

        // PE addresses are relative to the preferred image base; elsewhere the
        // lowest mapped segment is the module start.
        let base = match obj.format() {
            BinaryFormat::Pe => obj.relative_address_base(),
            _ => segments.iter().map(|s| s.address()).min().unwrap_or(0),
        };
        let end = segments
            .iter()
            .map(|s| s.address().saturating_add(s.size()))
            .max()
            .unwrap_or(base);
        let image_size = end.saturating_sub(base);
        if image_size > max_image_size {
            return Err(LibIdentError::Image(format!(
                "image size {:#x} exceeds limit {:#x}",
                image_size, max_image_size
            )));
        }

        let mut image = vec![0u8; image_size as usize];
        for seg in &segments {
            let Some(offset) = seg.address().checked_sub(base) else {
                continue;
            };
            let bytes = seg.data().map_err(|e| LibIdentError::Image(e.to_string()))?;
            let start = offset as usize;
            let len = bytes.len().min(image.len().saturating_sub(start));
            image[start..start + len].copy_from_slice(&bytes[..len]);
        }

        let mut functions: Vec<FunctionRange> = obj
            .symbols()
            .filter(|s| s.kind() == SymbolKind::Text && s.is_definition() && s.size() > 0)
            .filter_map(|s| symbol_range(s.address(), s.size(), base, image_size))
            .collect();
        functions.sort();
        functions.dedup_by_key(|f| f.rva_start);

        let bitness = if obj.is_64() { 64 } else { 32 };
        debug!(
            base,
            image_size,
            functions = functions.len(),
            bitness,
            "image mapped"
        );

        Ok(Self {
            base,
            image,
            functions,
            entry_point: obj.entry(),
            bitness,
        })
    }

    /// Replace the symbol-derived function list.
    pub fn with_functions(mut self, functions: Vec<FunctionRange>) -> Self {
        self.functions = functions;
        self
    }

    /// Decoder mode matching the image's machine.
    pub fn bitness(&self) -> u32 {
        self.bitness
    }
}

/// Extent of a sized symbol as RVAs, clamped to the image. Sizes come from
/// the file unchecked, so the end is computed without overflow.
fn symbol_range(address: u64, size: u64, base: u64, image_size: u64) -> Option<FunctionRange> {
    let start = address.checked_sub(base)?;
    if size == 0 || start >= image_size {
        return None;
    }
    let end = start.saturating_add(size - 1).min(image_size - 1);
    Some(FunctionRange::new(start, end))
}

impl ModuleSource for ImageModule {
    fn base(&self) -> u64 {
        self.base
    }

    fn read_memory(&self) -> Result<Vec<u8>> {
        Ok(self.image.clone())
    }

    fn functions(&self) -> Result<Vec<FunctionRange>> {
        Ok(self.functions.clone())
    }

    fn entry_point(&self) -> u64 {
        self.entry_point
    }
}
