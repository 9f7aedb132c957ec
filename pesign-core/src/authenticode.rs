//! Authenticode Digester (`spec.md` §4.B): computes the canonical
//! Authenticode PE hash, skipping the checksum field, the Certificate Table
//! data-directory entry, and the Certificate Table itself.
//!
//! The excluded-ranges idea is the same one `goblin` uses internally
//! (`examples/m4b-goblin/src/pe/authenticode.rs`'s `authenticode_ranges`
//! iterator), generalized here to the section-by-section, sorted-by-
//! `PointerToRawData` hashing and explicit `sum_of_bytes_hashed` tracking
//! the specification requires, plus the padding mode used by the
//! standalone `--hash` action.

use tracing::{debug, trace};

use crate::digest::{DigestAlgorithm, DigestEntry};
use crate::error::{Error, Result};
use crate::pe::PeImage;
use crate::util::align_up;

/// Whether to zero-pad a section's raw data up to `FileAlignment` before
/// hashing it, for files where `SizeOfRawData` would otherwise run past
/// the end of the file. `spec.md` §4.B ties this to the standalone `hash`
/// action only; it exists to make hashing of malformed/truncated inputs
/// deterministic rather than error out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    Strict,
    PadToFileAlignment { file_alignment: u32 },
}

/// Computes the Authenticode digest of `image` with `algorithm`, under
/// `padding`.
///
/// Algorithm (must match byte-for-byte for interoperability, `spec.md`
/// §4.B):
/// 1. hash `[0, checksum_offset)`
/// 2. skip the 4-byte checksum
/// 3. hash `[checksum_offset+4, cert_table_dir_offset)`
/// 4. skip the 8-byte Certificate Table directory entry
/// 5. hash `[cert_table_dir_offset+8, size_of_headers)`
/// 6. hash each section's raw data, sections sorted by `PointerToRawData`
/// 7. if the file is larger than `sum_of_bytes_hashed + cert_table.size`,
///    hash the trailing remainder (outside the certificate table)
pub fn digest_image(
    image: &PeImage,
    algorithm: DigestAlgorithm,
    padding: PaddingMode,
) -> Result<DigestEntry> {
    let layout = image.layout();
    let data = image.raw_bytes();
    let (cert_table_offset, cert_table_size) = image.cert_table_directory()?;

    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut push = |v: &[u8]| chunks.push(v.to_vec());

    push(&data[..layout.checksum_offset]);
    push(&data[layout.checksum_offset + 4..layout.cert_table_dir_offset]);
    push(&data[layout.cert_table_dir_offset + 8..layout.size_of_headers]);

    let mut sections: Vec<_> = layout.sections.iter().collect();
    sections.sort_by_key(|s| s.pointer_to_raw_data);

    let mut sum_of_bytes_hashed = layout.size_of_headers as u64;
    for section in &sections {
        let start = section.pointer_to_raw_data as usize;
        let wanted = section.size_of_raw_data as usize;
        let available = data.len().saturating_sub(start);

        if wanted <= available {
            push(&data[start..start + wanted]);
        } else {
            match padding {
                PaddingMode::Strict => {
                    return Err(Error::MalformedImage(format!(
                        "section {:?} raw data ({wanted} bytes at {start:#x}) runs past end of file",
                        section.name_str()
                    )));
                }
                PaddingMode::PadToFileAlignment { file_alignment } => {
                    let have = &data[start..];
                    let padded_len = align_up(wanted, file_alignment.max(1) as usize);
                    let mut buf = have.to_vec();
                    buf.resize(padded_len.max(have.len()), 0);
                    trace!(section = section.name_str(), padded_len, "padded truncated section");
                    push(&buf[..padded_len.min(buf.len())]);
                }
            }
        }
        sum_of_bytes_hashed += section.size_of_raw_data as u64;
    }

    let cert_table_start = sum_of_bytes_hashed;
    let file_size = data.len() as u64;
    let cert_table_size = cert_table_size as u64;
    if file_size > cert_table_start + cert_table_size {
        let trailing_end = file_size - cert_table_size;
        push(&data[cert_table_start as usize..trailing_end as usize]);
    }

    let _ = cert_table_offset;

    debug!(
        algorithm = algorithm.name(),
        chunks = chunks.len(),
        sum_of_bytes_hashed,
        "computed authenticode digest"
    );

    let digest = algorithm.digest_chunks(chunks.iter().map(|c| c.as_slice()));
    Ok(DigestEntry { algorithm, digest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::minimal_pe_image;

    #[test]
    fn digest_is_stable_across_checksum_and_cert_table_mutation() {
        let mut bytes = minimal_pe_image();
        let image = PeImage::from_bytes(bytes.clone()).unwrap();
        let before = digest_image(&image, DigestAlgorithm::Sha256, PaddingMode::Strict).unwrap();

        // Flip the checksum field and grow a placeholder certificate table;
        // the digest must not change (spec.md's "digest invariance under
        // space reservation" property).
        let layout = image.layout().clone();
        bytes[layout.checksum_offset..layout.checksum_offset + 4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA; 64]);
        let mut mutated = PeImage::from_bytes(bytes).unwrap();
        mutated.set_cert_table_directory(mutated.end_of_section_data() as u32, 64).unwrap();
        let after = digest_image(&mutated, DigestAlgorithm::Sha256, PaddingMode::Strict).unwrap();

        assert_eq!(before.digest, after.digest);
    }

    #[test]
    fn different_algorithms_produce_different_length_digests() {
        let bytes = minimal_pe_image();
        let image = PeImage::from_bytes(bytes).unwrap();
        for algo in DigestAlgorithm::ALL {
            let d = digest_image(&image, algo, PaddingMode::Strict).unwrap();
            assert_eq!(d.digest.len(), algo.output_size());
        }
    }
}
