//! Byte-offset computation for the fields the Authenticode digest and the
//! certificate-table editor need to touch directly.
//!
//! `goblin` (the teacher's PE dependency) is excellent at structured,
//! read-only access to a PE image, but it does not expose raw file offsets
//! for sub-fields of the optional header, and has no writer. The layout
//! here walks the same fields `goblin`'s own `pe::optional_header` and
//! `pe::header` modules do (see `examples/m4b-goblin/src/pe/{header,
//! optional_header,section_table}.rs`), but records byte ranges instead of
//! parsed values, so the certificate-table editor and digester can mutate
//! and hash the underlying buffer directly.

use scroll::{Pread, LE};

use crate::error::{Error, Result};

pub const DOS_MAGIC: u16 = 0x5a4d;
pub const PE_MAGIC: u32 = 0x0000_4550;
pub const PE_POINTER_OFFSET: usize = 0x3c;
pub const SIZEOF_COFF_HEADER: usize = 20;
pub const SIZEOF_SECTION_TABLE: usize = 40;
pub const SIZEOF_DATA_DIRECTORY: usize = 8;
pub const NUM_DATA_DIRECTORIES_CLASSIC: usize = 16;

pub const MAGIC_PE32: u16 = 0x10b;
pub const MAGIC_PE32_PLUS: u16 = 0x20b;

/// Index of the Certificate Table entry within the data directory array.
pub const CERT_TABLE_DIRECTORY_INDEX: usize = 4;

const SIZEOF_STANDARD_FIELDS_32: usize = 28;
const SIZEOF_STANDARD_FIELDS_64: usize = 24;
/// Bytes of `WindowsFields` that precede `CheckSum`: ImageBase, Section/File
/// alignment, four version pairs, Win32VersionValue, SizeOfImage,
/// SizeOfHeaders.
const WINDOWS_FIELDS_BEFORE_CHECKSUM_32: usize = 36;
const WINDOWS_FIELDS_BEFORE_CHECKSUM_64: usize = 40;
/// Bytes of `WindowsFields` that follow `CheckSum` up to (not including) the
/// data directory count: Subsystem, DllCharacteristics, four
/// reserve/commit sizes, LoaderFlags.
const WINDOWS_FIELDS_AFTER_CHECKSUM_BEFORE_COUNT_32: usize = 24;
const WINDOWS_FIELDS_AFTER_CHECKSUM_BEFORE_COUNT_64: usize = 40;

#[derive(Debug, Clone, Copy)]
pub struct SectionLayout {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
}

impl SectionLayout {
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

/// Computed byte offsets and parsed fields needed to digest and mutate a PE
/// image. Recomputed every time the underlying buffer's headers or
/// directory entries change (it is cheap: a few hundred bytes read).
#[derive(Debug, Clone)]
pub struct PeLayout {
    pub is_pe32_plus: bool,
    /// Offset of the optional header's `CheckSum` field.
    pub checksum_offset: usize,
    /// Offset of the first data directory entry (Export Table, index 0).
    pub data_directories_offset: usize,
    /// Offset of the Certificate Table entry within the data directory
    /// array (8 bytes: RVA then Size).
    pub cert_table_dir_offset: usize,
    pub number_of_rva_and_sizes: usize,
    pub size_of_headers: usize,
    pub size_of_optional_header: usize,
    pub optional_header_offset: usize,
    pub sections: Vec<SectionLayout>,
}

impl PeLayout {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let malformed = |msg: String| Error::MalformedImage(msg);

        let dos_magic: u16 = data
            .pread_with(0, LE)
            .map_err(|_| malformed("file too short for DOS header".into()))?;
        if dos_magic != DOS_MAGIC {
            return Err(malformed(format!("bad DOS signature {dos_magic:#06x}")));
        }

        let e_lfanew: u32 = data
            .pread_with(PE_POINTER_OFFSET, LE)
            .map_err(|_| malformed("file too short for e_lfanew".into()))?;
        let pe_header_offset = e_lfanew as usize;

        let pe_magic: u32 = data
            .pread_with(pe_header_offset, LE)
            .map_err(|_| malformed("e_lfanew points outside the file".into()))?;
        if pe_magic != PE_MAGIC {
            return Err(malformed(format!("bad PE signature {pe_magic:#010x}")));
        }

        let coff_offset = pe_header_offset + 4;
        let number_of_sections: u16 = data
            .pread_with(coff_offset + 2, LE)
            .map_err(|_| malformed("file too short for COFF header".into()))?;
        let size_of_optional_header: u16 = data
            .pread_with(coff_offset + 16, LE)
            .map_err(|_| malformed("file too short for COFF header".into()))?;

        let optional_header_offset = coff_offset + SIZEOF_COFF_HEADER;
        let magic: u16 = data
            .pread_with(optional_header_offset, LE)
            .map_err(|_| malformed("file too short for optional header magic".into()))?;

        let (is_pe32_plus, standard_fields_size, before, after) = match magic {
            MAGIC_PE32 => (
                false,
                SIZEOF_STANDARD_FIELDS_32,
                WINDOWS_FIELDS_BEFORE_CHECKSUM_32,
                WINDOWS_FIELDS_AFTER_CHECKSUM_BEFORE_COUNT_32,
            ),
            MAGIC_PE32_PLUS => (
                true,
                SIZEOF_STANDARD_FIELDS_64,
                WINDOWS_FIELDS_BEFORE_CHECKSUM_64,
                WINDOWS_FIELDS_AFTER_CHECKSUM_BEFORE_COUNT_64,
            ),
            other => return Err(malformed(format!("unrecognized optional header magic {other:#06x}"))),
        };

        let windows_fields_offset = optional_header_offset + standard_fields_size;
        let checksum_offset = windows_fields_offset + before;
        let size_of_headers_offset = checksum_offset - 4;
        let size_of_headers: u32 = data
            .pread_with(size_of_headers_offset, LE)
            .map_err(|_| malformed("file too short for SizeOfHeaders".into()))?;

        let data_dir_count_offset = checksum_offset + 4 + after;
        let number_of_rva_and_sizes: u32 = data
            .pread_with(data_dir_count_offset, LE)
            .map_err(|_| malformed("file too short for NumberOfRvaAndSizes".into()))?;
        let data_directories_offset = data_dir_count_offset + 4;

        if number_of_rva_and_sizes as usize <= CERT_TABLE_DIRECTORY_INDEX {
            return Err(malformed(
                "data directory array has no Certificate Table entry".into(),
            ));
        }
        let cert_table_dir_offset =
            data_directories_offset + CERT_TABLE_DIRECTORY_INDEX * SIZEOF_DATA_DIRECTORY;

        let section_table_offset =
            optional_header_offset + size_of_optional_header as usize;
        let section_table_end =
            section_table_offset + number_of_sections as usize * SIZEOF_SECTION_TABLE;
        if section_table_end > size_of_headers as usize {
            return Err(malformed(
                "section table overflows SizeOfHeaders".into(),
            ));
        }
        if data.len() < section_table_end {
            return Err(malformed("file too short for section table".into()));
        }

        let mut sections = Vec::with_capacity(number_of_sections as usize);
        for i in 0..number_of_sections as usize {
            let base = section_table_offset + i * SIZEOF_SECTION_TABLE;
            let mut name = [0u8; 8];
            name.copy_from_slice(&data[base..base + 8]);
            let virtual_size: u32 = data.pread_with(base + 8, LE).unwrap();
            let virtual_address: u32 = data.pread_with(base + 12, LE).unwrap();
            let size_of_raw_data: u32 = data.pread_with(base + 16, LE).unwrap();
            let pointer_to_raw_data: u32 = data.pread_with(base + 20, LE).unwrap();
            sections.push(SectionLayout {
                name,
                virtual_size,
                virtual_address,
                size_of_raw_data,
                pointer_to_raw_data,
            });
        }

        for s in &sections {
            let end = (s.pointer_to_raw_data as usize).saturating_add(s.size_of_raw_data as usize);
            if s.size_of_raw_data != 0 && end > data.len() {
                return Err(malformed(format!(
                    "section {:?} raw data range {:#x}..{:#x} exceeds file length {:#x}",
                    s.name_str(),
                    s.pointer_to_raw_data,
                    end,
                    data.len()
                )));
            }
        }

        Ok(PeLayout {
            is_pe32_plus,
            checksum_offset,
            data_directories_offset,
            cert_table_dir_offset,
            number_of_rva_and_sizes: number_of_rva_and_sizes as usize,
            size_of_headers: size_of_headers as usize,
            size_of_optional_header: size_of_optional_header as usize,
            optional_header_offset,
            sections,
        })
    }

    /// Offset of data directory entry `index` (RVA then Size, 4 bytes each).
    pub fn data_directory_offset(&self, index: usize) -> usize {
        self.data_directories_offset + index * SIZEOF_DATA_DIRECTORY
    }
}
