//! PE Image Model (`spec.md` §4.A): an in-memory, byte-accurate view over a
//! PE/COFF file, parsed and validated the way `lowell-core::formats::pe`
//! wraps `goblin` — except this model owns a *mutable* buffer, because the
//! Certificate Table Editor (§4.C) writes through it.

mod layout;

use std::fs;
use std::path::{Path, PathBuf};

use goblin::pe::header::*;
use goblin::pe::options::ParseOptions;
use goblin::pe::PE;
use tracing::{debug, warn};

use crate::error::{Error, Result};
pub use layout::{PeLayout, SectionLayout, CERT_TABLE_DIRECTORY_INDEX};

/// Cross-checks the hand-rolled [`PeLayout`] parse against `goblin`'s own PE
/// reader, the way `lowell_core::formats::pe::PeFile::parse_pe` validates
/// with `goblin` before any read-only introspection. `goblin` rejects a
/// superset of what the byte-offset layout walker in [`layout`] checks, but
/// disagreement here is only logged: the layout walker (not `goblin`) is
/// authoritative for the byte ranges the digester and certificate-table
/// editor mutate, so a `goblin` parse failure on an otherwise
/// layout-valid image must not block signing or hashing.
fn cross_validate_with_goblin(data: &[u8]) {
    let mut opts = ParseOptions::default();
    opts.parse_attribute_certificates = true;
    if let Err(e) = PE::parse_with_opts(data, &opts) {
        warn!(error = %e, "goblin disagrees with the layout parse");
    }
}

/// Best-effort human-readable machine/architecture label, used by the
/// `list`/`show` reporting paths. `None` if `goblin` cannot parse the
/// image (callers fall back to omitting the field rather than failing).
pub fn architecture_label(data: &[u8]) -> Option<&'static str> {
    let mut opts = ParseOptions::default();
    opts.parse_attribute_certificates = true;
    let pe = PE::parse_with_opts(data, &opts).ok()?;
    Some(match pe.header.coff_header.machine {
        COFF_MACHINE_X86_64 => "x86_64",
        COFF_MACHINE_ARM64 => "aarch64",
        COFF_MACHINE_ARM => "arm",
        COFF_MACHINE_X86 => "i386",
        _ => "unknown",
    })
}

/// An owned, mutable PE/COFF image buffer plus its parsed header layout.
///
/// Mirrors `lowell_core::formats::pe::PeFile` in shape (own the bytes,
/// parse on demand, return borrowed slices tied to `&self`) but additionally
/// supports in-place mutation for signing, matching `spec.md` §4.A's
/// `write_at`/`truncate`/`set_data_directory` contract.
#[derive(Debug)]
pub struct PeImage {
    data: Vec<u8>,
    layout: PeLayout,
    path: Option<PathBuf>,
}

impl PeImage {
    /// Opens a PE/COFF file read-write (the image is always buffered in
    /// memory; `spec.md` §5 permits either file-mapping or in-memory
    /// buffering, and in-memory keeps the certificate-table grow/shrink
    /// logic simple to reason about).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| Error::io(path, e))?;
        Self::from_bytes(data).map(|mut img| {
            img.path = Some(path.to_path_buf());
            img
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let layout = PeLayout::parse(&data)?;
        cross_validate_with_goblin(&data);
        debug!(
            size = data.len(),
            pe32_plus = layout.is_pe32_plus,
            sections = layout.sections.len(),
            "parsed PE image"
        );
        Ok(Self {
            data,
            layout,
            path: None,
        })
    }

    /// Clones this image's bytes into a fresh, independent writable handle,
    /// as the sign flow does before mutating the output
    /// (`spec.md` §2 data flow: "G → A (open input) → C (clone to output,
    /// clear cert table)").
    pub fn clone_to(&self, path: impl AsRef<Path>) -> Self {
        Self {
            data: self.data.clone(),
            layout: self.layout.clone(),
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .expect("save() called on an image with no associated path");
        fs::write(path, &self.data).map_err(|e| Error::io(path, e))
    }

    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, &self.data).map_err(|e| Error::io(path, e))
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn layout(&self) -> &PeLayout {
        &self.layout
    }

    pub fn section_iter(&self) -> impl Iterator<Item = &SectionLayout> {
        self.layout.sections.iter()
    }

    /// Reads data directory entry `index` as `(rva_or_offset, size)`.
    ///
    /// For every entry except the Certificate Table this is a real RVA; for
    /// the Certificate Table (index 4) it is, uniquely, a raw file offset —
    /// callers must not run it through an RVA-to-offset translator
    /// (`spec.md` §9).
    pub fn data_directory(&self, index: usize) -> Result<(u32, u32)> {
        if index >= self.layout.number_of_rva_and_sizes {
            return Err(Error::MalformedImage(format!(
                "data directory index {index} out of range (have {})",
                self.layout.number_of_rva_and_sizes
            )));
        }
        let off = self.layout.data_directory_offset(index);
        let rva = self.read_u32(off)?;
        let size = self.read_u32(off + 4)?;
        Ok((rva, size))
    }

    pub fn set_data_directory(&mut self, index: usize, rva: u32, size: u32) -> Result<()> {
        if index >= self.layout.number_of_rva_and_sizes {
            return Err(Error::MalformedImage(format!(
                "data directory index {index} out of range (have {})",
                self.layout.number_of_rva_and_sizes
            )));
        }
        let off = self.layout.data_directory_offset(index);
        self.write_u32(off, rva)?;
        self.write_u32(off + 4, size)?;
        Ok(())
    }

    pub fn cert_table_directory(&self) -> Result<(u32, u32)> {
        self.data_directory(CERT_TABLE_DIRECTORY_INDEX)
    }

    pub fn set_cert_table_directory(&mut self, offset: u32, size: u32) -> Result<()> {
        self.set_data_directory(CERT_TABLE_DIRECTORY_INDEX, offset, size)
    }

    /// Zeroes the optional-header checksum. `pesign` (and this
    /// reimplementation) leaves it at zero after any mutation rather than
    /// recomputing it: UEFI does not verify it (`spec.md` §4.C, §9).
    pub fn update_checksum(&mut self) -> Result<()> {
        self.write_u32(self.layout.checksum_offset, 0)
    }

    /// Truncates the backing buffer to `new_size` bytes.
    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        if new_size > self.data.len() {
            return Err(Error::MalformedImage(format!(
                "cannot truncate to {new_size}, image is only {} bytes",
                self.data.len()
            )));
        }
        self.data.truncate(new_size);
        Ok(())
    }

    /// Grows the buffer to at least `new_size` bytes, zero-filling the gap.
    pub fn grow_to(&mut self, new_size: usize) {
        if new_size > self.data.len() {
            self.data.resize(new_size, 0);
        }
    }

    /// Appends bytes at the current end of the buffer, returning the offset
    /// they were written at.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| Error::MalformedImage("write_at offset overflow".into()))?;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        self.data
            .get(offset..offset + 4)
            .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
            .ok_or_else(|| Error::MalformedImage(format!("read past end of file at {offset:#x}")))
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let bytes = value.to_le_bytes();
        self.write_at(offset, &bytes)
    }

    /// The offset immediately past the last section's raw data, i.e. where
    /// `pesign` expects the Attribute Certificate Table to begin.
    pub fn end_of_section_data(&self) -> usize {
        self.layout
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data as usize + s.size_of_raw_data as usize)
            .max()
            .unwrap_or(self.layout.size_of_headers)
    }
}
