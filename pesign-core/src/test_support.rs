//! Hand-built PE32+ fixtures shared by the unit tests in `pe`, `authenticode`,
//! `certtable`, `cms`, and `dispatcher`.
//!
//! Rather than embed a real signed `.efi` binary, the fixtures here are
//! assembled field-by-field in the same order `PeLayout::parse` expects to
//! read them, so a change to one side breaks the test instead of silently
//! hashing the wrong bytes.

use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;

use crate::util::align_up;

/// A minimal, loader-meaningless PE32+ image: DOS stub, COFF header,
/// PE32+ optional header with 16 data directories (Certificate Table entry
/// zeroed), and one `.text` section with real, if inert, raw data.
pub(crate) fn minimal_pe_image() -> Vec<u8> {
    minimal_pe_image_with_sections(1)
}

/// Same shape as [`minimal_pe_image`] but with `extra_sections` additional
/// `.data0`, `.data1`, ... sections, for tests that care about
/// `PointerToRawData` ordering across multiple sections.
pub(crate) fn minimal_pe_image_with_sections(extra_sections: usize) -> Vec<u8> {
    let file_alignment: u32 = 0x200;
    let section_alignment: u32 = 0x1000;
    let number_of_sections = 1 + extra_sections;

    let mut buf = Vec::new();

    // DOS header: only the "MZ" signature and e_lfanew matter.
    buf.resize(0x40, 0);
    buf[0] = b'M';
    buf[1] = b'Z';
    let e_lfanew = buf.len() as u32;
    buf[0x3c..0x40].copy_from_slice(&e_lfanew.to_le_bytes());

    buf.extend_from_slice(b"PE\0\0");

    // COFF header.
    buf.extend_from_slice(&0x8664u16.to_le_bytes()); // Machine: x86_64
    buf.extend_from_slice(&(number_of_sections as u16).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // TimeDateStamp
    buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToSymbolTable
    buf.extend_from_slice(&0u32.to_le_bytes()); // NumberOfSymbols
    let size_opt_hdr_field = buf.len();
    buf.extend_from_slice(&0u16.to_le_bytes()); // SizeOfOptionalHeader, patched below
    buf.extend_from_slice(&0x0022u16.to_le_bytes()); // Characteristics: executable

    let optional_header_start = buf.len();

    // StandardFields64 (24 bytes).
    buf.extend_from_slice(&0x20bu16.to_le_bytes()); // Magic: PE32+
    buf.push(0); // MajorLinkerVersion
    buf.push(0); // MinorLinkerVersion
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfCode
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfInitializedData
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfUninitializedData
    buf.extend_from_slice(&0u32.to_le_bytes()); // AddressOfEntryPoint
    buf.extend_from_slice(&0u32.to_le_bytes()); // BaseOfCode

    // WindowsFields64.
    buf.extend_from_slice(&0x0000000140000000u64.to_le_bytes()); // ImageBase
    buf.extend_from_slice(&section_alignment.to_le_bytes());
    buf.extend_from_slice(&file_alignment.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // MajorOperatingSystemVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MinorOperatingSystemVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MajorImageVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MinorImageVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MajorSubsystemVersion
    buf.extend_from_slice(&0u16.to_le_bytes()); // MinorSubsystemVersion
    buf.extend_from_slice(&0u32.to_le_bytes()); // Win32VersionValue
    let size_of_image_field = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfImage, patched below
    let size_of_headers_field = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes()); // SizeOfHeaders, patched below
    buf.extend_from_slice(&0u32.to_le_bytes()); // CheckSum
    buf.extend_from_slice(&10u16.to_le_bytes()); // Subsystem: EFI_APPLICATION
    buf.extend_from_slice(&0u16.to_le_bytes()); // DllCharacteristics
    buf.extend_from_slice(&0u64.to_le_bytes()); // SizeOfStackReserve
    buf.extend_from_slice(&0u64.to_le_bytes()); // SizeOfStackCommit
    buf.extend_from_slice(&0u64.to_le_bytes()); // SizeOfHeapReserve
    buf.extend_from_slice(&0u64.to_le_bytes()); // SizeOfHeapCommit
    buf.extend_from_slice(&0u32.to_le_bytes()); // LoaderFlags
    let num_dirs: u32 = 16;
    buf.extend_from_slice(&num_dirs.to_le_bytes()); // NumberOfRvaAndSizes

    // Data directories: all zero, including the Certificate Table (index 4).
    for _ in 0..num_dirs {
        buf.extend_from_slice(&0u32.to_le_bytes()); // RVA/offset
        buf.extend_from_slice(&0u32.to_le_bytes()); // Size
    }

    let size_of_optional_header = (buf.len() - optional_header_start) as u16;
    buf[size_opt_hdr_field..size_opt_hdr_field + 2]
        .copy_from_slice(&size_of_optional_header.to_le_bytes());

    // Section table: one `.text` section plus `extra_sections` `.dataN`.
    let mut raw_data_fields = Vec::with_capacity(number_of_sections);
    for i in 0..number_of_sections {
        let mut name = [0u8; 8];
        let label = if i == 0 {
            ".text".to_string()
        } else {
            format!(".dat{}", i - 1)
        };
        let bytes = label.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&0x200u32.to_le_bytes()); // VirtualSize
        buf.extend_from_slice(&((i as u32 + 1) * 0x1000).to_le_bytes()); // VirtualAddress
        buf.extend_from_slice(&0x200u32.to_le_bytes()); // SizeOfRawData
        raw_data_fields.push(buf.len());
        buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToRawData, patched below
        buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToRelocations
        buf.extend_from_slice(&0u32.to_le_bytes()); // PointerToLinenumbers
        buf.extend_from_slice(&0u16.to_le_bytes()); // NumberOfRelocations
        buf.extend_from_slice(&0u16.to_le_bytes()); // NumberOfLinenumbers
        buf.extend_from_slice(&0x6000_0020u32.to_le_bytes()); // Characteristics: code|exec|read
    }

    let size_of_headers = align_up(buf.len(), file_alignment as usize) as u32;
    buf[size_of_headers_field..size_of_headers_field + 4]
        .copy_from_slice(&size_of_headers.to_le_bytes());
    let size_of_image = align_up(size_of_headers as usize, section_alignment as usize) as u32
        + section_alignment * number_of_sections as u32;
    buf[size_of_image_field..size_of_image_field + 4]
        .copy_from_slice(&size_of_image.to_le_bytes());

    buf.resize(size_of_headers as usize, 0);

    for (i, field_offset) in raw_data_fields.into_iter().enumerate() {
        let pointer_to_raw_data = size_of_headers + i as u32 * 0x200;
        buf[field_offset..field_offset + 4]
            .copy_from_slice(&pointer_to_raw_data.to_le_bytes());
    }

    for i in 0..number_of_sections {
        let fill = 0x90u8.wrapping_add(i as u8);
        buf.extend(std::iter::repeat(fill).take(0x200));
    }

    buf
}

/// DER length octets for `len`, short-form under 128 bytes, long-form
/// (big-endian minimal byte count) above it.
fn push_der_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let be = len.to_be_bytes();
    let first = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
    let significant = &be[first..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    push_der_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

fn der_sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    der_tlv(0x30, &parts.concat())
}

fn der_integer_small(value: u8) -> Vec<u8> {
    der_tlv(0x02, &[value])
}

fn der_utc_time(s: &str) -> Vec<u8> {
    der_tlv(0x17, s.as_bytes())
}

fn der_bit_string(unused_bits: u8, bytes: &[u8]) -> Vec<u8> {
    let mut content = vec![unused_bits];
    content.extend_from_slice(bytes);
    der_tlv(0x03, &content)
}

/// DER `rsaEncryption` `AlgorithmIdentifier` (RFC 3279 §2.3.1) with a NULL
/// parameters field, the form every RSA SubjectPublicKeyInfo and
/// signatureAlgorithm in this fixture uses.
fn rsa_encryption_algorithm_identifier_der() -> Vec<u8> {
    const RSA_ENCRYPTION_OID: [u8; 11] = [
        0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01,
    ];
    const NULL: [u8; 2] = [0x05, 0x00];
    der_sequence(&[RSA_ENCRYPTION_OID.to_vec(), NULL.to_vec()])
}

/// Builds a minimal, trust-meaningless DER-encoded X.509v1 certificate
/// binding `key`'s public half, with an empty issuer/subject RDNSequence
/// and a signature value that is never checked (nothing in this crate
/// validates certificate trust — `spec.md`'s Non-goals explicitly exclude
/// chain verification). Good enough to round-trip through
/// `rasn_pkix::Certificate` decode for the identity-loading and
/// signed-data-building tests that need a real certificate on disk.
pub(crate) fn self_signed_certificate_der(key: &RsaPrivateKey) -> Vec<u8> {
    let subject_public_key_info = key
        .to_public_key()
        .to_public_key_der()
        .expect("encoding RSA public key to SubjectPublicKeyInfo DER")
        .as_bytes()
        .to_vec();
    let algorithm = rsa_encryption_algorithm_identifier_der();
    let empty_name = der_sequence(&[]);
    let validity = der_sequence(&[
        der_utc_time("250101000000Z"),
        der_utc_time("350101000000Z"),
    ]);

    let tbs_certificate = der_sequence(&[
        der_integer_small(1), // serialNumber
        algorithm.clone(),    // signature AlgorithmIdentifier
        empty_name.clone(),   // issuer
        validity,
        empty_name, // subject
        subject_public_key_info,
    ]);

    let signature_value = der_bit_string(0, &[0u8]);
    der_sequence(&[tbs_certificate, algorithm, signature_value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::PeImage;

    #[test]
    fn fixture_parses_as_a_valid_pe32_plus_image() {
        let bytes = minimal_pe_image();
        let image = PeImage::from_bytes(bytes).unwrap();
        assert!(image.layout().is_pe32_plus);
        assert_eq!(image.layout().sections.len(), 1);
    }

    #[test]
    fn fixture_supports_extra_sections_in_pointer_order() {
        let bytes = minimal_pe_image_with_sections(2);
        let image = PeImage::from_bytes(bytes).unwrap();
        assert_eq!(image.layout().sections.len(), 3);
        let mut pointers: Vec<_> = image
            .layout()
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data)
            .collect();
        pointers.sort_unstable();
        assert_eq!(pointers.len(), 3);
    }

    #[test]
    fn self_signed_certificate_decodes_as_a_pkix_certificate() {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let der = self_signed_certificate_der(&key);
        let certificate: rasn_pkix::Certificate = rasn::der::decode(&der).unwrap();
        assert!(matches!(
            certificate.tbs_certificate.issuer,
            rasn_pkix::Name::RdnSequence(ref rdn) if rdn.is_empty()
        ));
    }
}
