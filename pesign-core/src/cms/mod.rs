//! CMS Builder (`spec.md` §4.D) and CMS Parser (`spec.md` §4.E): assembling
//! and dissecting the PKCS#7-style `SignedData` object that carries
//! Authenticode's `SpcIndirectDataContent`.
//!
//! The ASN.1 types come from `rasn-cms`'s own `authenticode` module
//! (`examples/librasn-rasn/standards/cms/src/authenticode.rs`), which
//! already defines `SpcIndirectDataContent`, `SpcAttributeTypeAndOptionalValue`,
//! `DigestInfo`, `SpcPeImageData`, `SpcLink`, and `SpcString` to the letter
//! of the Authenticode format — this module only supplies the
//! signing/verification logic around them.

pub mod build;
pub mod parse;

pub use build::{assemble_signed_data_from_raw, build_signed_data, signed_attributes_der};
pub use parse::{parse_signed_data, DecodedSignature};

use rasn::types::ObjectIdentifier;

/// `id-signedData` (RFC 5652 §5.1).
pub(crate) fn id_signed_data() -> ObjectIdentifier {
    ObjectIdentifier::new(vec![1, 2, 840, 113549, 1, 7, 2]).expect("static OID is valid")
}

/// `id-contentType` signed attribute (RFC 5652 §11.1).
pub(crate) fn id_content_type_attr() -> ObjectIdentifier {
    ObjectIdentifier::new(vec![1, 2, 840, 113549, 1, 9, 3]).expect("static OID is valid")
}

/// `id-messageDigest` signed attribute (RFC 5652 §11.2).
pub(crate) fn id_message_digest_attr() -> ObjectIdentifier {
    ObjectIdentifier::new(vec![1, 2, 840, 113549, 1, 9, 4]).expect("static OID is valid")
}
