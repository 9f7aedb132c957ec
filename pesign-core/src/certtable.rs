//! Certificate Table Editor (`spec.md` §4.C): parses and rewrites the
//! Attribute Certificate Table the Certificate Table data directory points
//! at — a flat sequence of `WIN_CERTIFICATE` entries, each padded to an
//! 8-byte boundary.
//!
//! The entry header and padding rules follow `goblin`'s own
//! `pe::certificate_table` (`examples/m4b-goblin/src/pe/certificate_table.rs`)
//! and the `scroll`-based `WinCertificate` type in
//! `examples/other_examples/dfccd9a4_binarly-io-bias-goblin__src-pe-certs.rs.rs`;
//! `goblin` itself only exposes the table read-only, so entries here are
//! read and written directly against the owned [`crate::pe::PeImage`] buffer.

use scroll::{Pread, Pwrite, LE};

use crate::digest::DigestEntry;
use crate::error::{Error, Result};
use crate::identity::SigningIdentity;
use crate::pe::PeImage;
use crate::util::padding_for;

/// WIN_CERTIFICATE revision field. `pesign` always writes 0x0200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateRevision {
    Revision1_0,
    Revision2_0,
}

impl CertificateRevision {
    fn from_u16(v: u16) -> Result<Self> {
        match v {
            0x0100 => Ok(Self::Revision1_0),
            0x0200 => Ok(Self::Revision2_0),
            other => Err(Error::MalformedCertTable(format!(
                "unrecognized WIN_CERTIFICATE revision {other:#06x}"
            ))),
        }
    }

    fn to_u16(self) -> u16 {
        match self {
            Self::Revision1_0 => 0x0100,
            Self::Revision2_0 => 0x0200,
        }
    }
}

/// WIN_CERTIFICATE certificate-type field. `pesign` only ever writes
/// `PkcsSignedData`; the others are recognized for round-tripping images
/// signed by other tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    X509,
    PkcsSignedData,
    Reserved1,
    TsStackSigned,
}

impl CertificateType {
    fn from_u16(v: u16) -> Result<Self> {
        match v {
            1 => Ok(Self::X509),
            2 => Ok(Self::PkcsSignedData),
            3 => Ok(Self::Reserved1),
            4 => Ok(Self::TsStackSigned),
            other => Err(Error::MalformedCertTable(format!(
                "unrecognized WIN_CERTIFICATE certificate type {other:#06x}"
            ))),
        }
    }

    fn to_u16(self) -> u16 {
        match self {
            Self::X509 => 1,
            Self::PkcsSignedData => 2,
            Self::Reserved1 => 3,
            Self::TsStackSigned => 4,
        }
    }
}

const HEADER_SIZE: usize = 8;

/// One WIN_CERTIFICATE entry: an 8-byte header plus `length - 8` bytes of
/// payload (a DER-encoded CMS `SignedData`, for `PkcsSignedData`).
#[derive(Debug, Clone)]
pub struct CertificateEntry {
    pub revision: CertificateRevision,
    pub certificate_type: CertificateType,
    pub payload: Vec<u8>,
}

impl CertificateEntry {
    pub fn new_signed_data(payload: Vec<u8>) -> Self {
        Self {
            revision: CertificateRevision::Revision2_0,
            certificate_type: CertificateType::PkcsSignedData,
            payload,
        }
    }

    /// Unpadded length of this entry once serialized: header plus payload.
    fn unpadded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Length including the 8-byte alignment padding `pesign` writes
    /// between consecutive entries.
    pub fn padded_len(&self) -> usize {
        let len = self.unpadded_len();
        len + padding_for(len, 8).map(|p| p.len()).unwrap_or(0)
    }

    fn write_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let length = self.unpadded_len() as u32;
        let mut header = [0u8; HEADER_SIZE];
        header
            .pwrite_with(length, 0, LE)
            .map_err(|e| Error::MalformedCertTable(e.to_string()))?;
        header
            .pwrite_with(self.revision.to_u16(), 4, LE)
            .map_err(|e| Error::MalformedCertTable(e.to_string()))?;
        header
            .pwrite_with(self.certificate_type.to_u16(), 6, LE)
            .map_err(|e| Error::MalformedCertTable(e.to_string()))?;
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        if let Some(padding) = padding_for(self.unpadded_len(), 8) {
            out.extend_from_slice(&padding);
        }
        Ok(())
    }
}

/// The parsed Attribute Certificate Table: an ordered list of entries, plus
/// the offset and total size of the table in the underlying image (for
/// `remove`/`insert` to recompute the Certificate Table data directory).
#[derive(Debug, Clone, Default)]
pub struct CertificateTable {
    pub entries: Vec<CertificateEntry>,
}

impl CertificateTable {
    /// Parses the Certificate Table pointed at by the image's data
    /// directory entry 4. Returns an empty table if the directory entry is
    /// `(0, 0)` (unsigned image).
    pub fn parse(image: &PeImage) -> Result<Self> {
        let (offset, size) = image.cert_table_directory()?;
        if size == 0 {
            return Ok(Self::default());
        }
        let data = image.raw_bytes();
        let table_end = (offset as usize)
            .checked_add(size as usize)
            .ok_or_else(|| Error::MalformedCertTable("certificate table size overflow".into()))?;
        if table_end > data.len() {
            return Err(Error::MalformedCertTable(format!(
                "certificate table {:#x}..{:#x} exceeds file length {:#x}",
                offset,
                table_end,
                data.len()
            )));
        }

        let mut entries = Vec::new();
        let mut cursor = offset as usize;
        while cursor < table_end {
            if table_end - cursor < HEADER_SIZE {
                return Err(Error::MalformedCertTable(
                    "trailing bytes too short for a WIN_CERTIFICATE header".into(),
                ));
            }
            let length: u32 = data
                .pread_with(cursor, LE)
                .map_err(|e| Error::MalformedCertTable(e.to_string()))?;
            let revision: u16 = data
                .pread_with(cursor + 4, LE)
                .map_err(|e| Error::MalformedCertTable(e.to_string()))?;
            let certificate_type: u16 = data
                .pread_with(cursor + 6, LE)
                .map_err(|e| Error::MalformedCertTable(e.to_string()))?;

            let length = length as usize;
            if length < HEADER_SIZE || cursor + length > table_end {
                return Err(Error::MalformedCertTable(format!(
                    "WIN_CERTIFICATE length {length} at offset {cursor:#x} is out of bounds"
                )));
            }
            let payload = data[cursor + HEADER_SIZE..cursor + length].to_vec();
            entries.push(CertificateEntry {
                revision: CertificateRevision::from_u16(revision)?,
                certificate_type: CertificateType::from_u16(certificate_type)?,
                payload,
            });

            let padded = length + padding_for(length, 8).map(|p| p.len()).unwrap_or(0);
            cursor += padded;
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Total size, in bytes, the serialized table occupies.
    pub fn serialized_size(&self) -> usize {
        self.entries.iter().map(CertificateEntry::padded_len).sum()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.serialized_size());
        for entry in &self.entries {
            entry.write_into(&mut out)?;
        }
        Ok(out)
    }

    /// Removes entry `index`, per `spec.md` §4.C's "removal is the inverse
    /// of insertion" property: the cert table shrinks by exactly that
    /// entry's padded length and every later signature's index shifts down
    /// by one.
    pub fn remove(&mut self, index: usize) -> Result<CertificateEntry> {
        if index >= self.entries.len() {
            return Err(Error::InvalidSignatureNumber {
                index,
                count: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index))
    }

    /// Places `entry` at position `at_index`, clamped to `[0, len]`
    /// (`spec.md` §4.C `insert`). Every caller in this tree currently passes
    /// the table's current length (append), since no front-end flag threads
    /// a custom insertion index — Authenticode does not define an ordering
    /// among co-signatures — but the contract itself is not narrowed to
    /// append-only.
    pub fn insert(&mut self, entry: CertificateEntry, at_index: usize) {
        let at_index = at_index.min(self.entries.len());
        self.entries.insert(at_index, entry);
    }

    /// Grows `image` by `extra_bytes` of zero-filled space at end-of-image
    /// and extends the Certificate Table data-directory entry to cover it,
    /// without writing any entries into the new region.
    ///
    /// Used by the sign flow to reserve room for a signature whose exact
    /// size isn't known until it's built, so the image only has to grow
    /// once (`spec.md` §4.C `allocate_space`). The reserved bytes stay
    /// outside every region the Authenticode digester hashes (they're
    /// covered by the, now larger, Certificate Table directory entry), so
    /// digesting before and after this call must produce the same hash —
    /// callers rely on that to digest once, reserve space sized to that
    /// digest's signature, then digest again over the grown file before
    /// signing.
    pub fn allocate_space(image: &mut PeImage, extra_bytes: usize) -> Result<()> {
        let (offset, size) = image.cert_table_directory()?;
        let table_start = if size == 0 {
            image.end_of_section_data() as u32
        } else {
            offset
        };
        let new_size = size as usize + extra_bytes;
        image.grow_to(table_start as usize + new_size);
        image.set_cert_table_directory(table_start, new_size as u32)
    }

    /// Returns the exact size, in bytes, a WIN_CERTIFICATE entry wrapping a
    /// freshly built `SignedData` over `digest` and signed by `identity`
    /// would occupy once padded to an 8-byte boundary (`spec.md` §4.C
    /// `estimate_size`). Building the real entry once here and reusing its
    /// length is an exact bound rather than an approximation, at the cost
    /// of one throwaway signing operation before the real one.
    pub fn estimate_size(digest: &DigestEntry, identity: &dyn SigningIdentity) -> Result<usize> {
        let der = crate::cms::build_signed_data(digest, identity)?;
        Ok(CertificateEntry::new_signed_data(der).padded_len())
    }

    /// Writes the serialized table into `image` at the end of section data,
    /// updates the Certificate Table data directory, and truncates/grows
    /// the buffer to exactly fit. The cert table is always the last thing
    /// in the file (`spec.md` §9), so "growing" never requires relocating
    /// section data — only appending past `end_of_section_data()`.
    pub fn write_to(&self, image: &mut PeImage) -> Result<()> {
        let start = image.end_of_section_data();
        image.truncate(start)?;
        let bytes = self.serialize()?;
        if bytes.is_empty() {
            image.set_cert_table_directory(0, 0)?;
            return Ok(());
        }
        image.append(&bytes);
        image.set_cert_table_directory(start as u32, bytes.len() as u32)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::PeImage;
    use crate::test_support::minimal_pe_image;

    fn signed_image() -> PeImage {
        PeImage::from_bytes(minimal_pe_image()).unwrap()
    }

    #[test]
    fn round_trip_insert_then_parse() {
        let mut image = signed_image();
        let mut table = CertificateTable::parse(&image).unwrap();
        assert!(table.is_empty());

        let at_index = table.len();
        table.insert(CertificateEntry::new_signed_data(vec![0xAB; 37]), at_index);
        table.write_to(&mut image).unwrap();

        let reparsed = CertificateTable::parse(&image).unwrap();
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed.entries[0].payload, vec![0xAB; 37]);
    }

    #[test]
    fn removal_is_the_inverse_of_insertion() {
        let mut image = signed_image();
        let mut table = CertificateTable::parse(&image).unwrap();
        let at_index = table.len();
        table.insert(CertificateEntry::new_signed_data(vec![0x01; 10]), at_index);
        let at_index = table.len();
        table.insert(CertificateEntry::new_signed_data(vec![0x02; 20]), at_index);
        table.write_to(&mut image).unwrap();
        assert_eq!(CertificateTable::parse(&image).unwrap().len(), 2);

        let mut table = CertificateTable::parse(&image).unwrap();
        table.remove(0).unwrap();
        table.write_to(&mut image).unwrap();

        let reparsed = CertificateTable::parse(&image).unwrap();
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed.entries[0].payload, vec![0x02; 20]);
    }

    #[test]
    fn insert_places_entry_at_the_requested_index() {
        let mut table = CertificateTable::default();
        table.insert(CertificateEntry::new_signed_data(vec![0x01; 4]), 0);
        table.insert(CertificateEntry::new_signed_data(vec![0x03; 4]), 1);
        // Inserting in the middle shifts the tail rather than appending.
        table.insert(CertificateEntry::new_signed_data(vec![0x02; 4]), 1);
        let payloads: Vec<u8> = table.entries.iter().map(|e| e.payload[0]).collect();
        assert_eq!(payloads, vec![0x01, 0x02, 0x03]);

        // Out-of-range indices clamp to the end.
        table.insert(CertificateEntry::new_signed_data(vec![0x04; 4]), 99);
        let payloads: Vec<u8> = table.entries.iter().map(|e| e.payload[0]).collect();
        assert_eq!(payloads, vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn entries_are_padded_to_eight_byte_boundaries() {
        let entry = CertificateEntry::new_signed_data(vec![0; 3]);
        assert_eq!(entry.padded_len() % 8, 0);
        assert!(entry.padded_len() >= entry.unpadded_len());
    }

    #[test]
    fn removing_out_of_range_index_is_an_error() {
        let table = CertificateTable::default();
        let mut table = table;
        let err = table.remove(0).unwrap_err();
        assert!(matches!(err, Error::InvalidSignatureNumber { index: 0, count: 0 }));
    }
}
