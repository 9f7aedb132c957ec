//! Decodes a WIN_CERTIFICATE payload back into its constituent parts
//! (`spec.md` §4.E): the embedded Authenticode digest, its algorithm, the
//! certificate chain, and the signer info, for `--list-signatures` and
//! `--show-signature`.

use rasn_cms::authenticode::{SpcIndirectDataContent, SPC_INDIRECT_DATA_OBJID};
use rasn_cms::{CertificateChoices, SignedData, SignerIdentifier, SignerInfo};
use rasn_pkix::Certificate;

use super::id_signed_data;
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

/// Everything extracted from one WIN_CERTIFICATE payload.
#[derive(Debug)]
pub struct DecodedSignature {
    pub digest_algorithm: DigestAlgorithm,
    pub pe_digest: Vec<u8>,
    pub certificates: Vec<Certificate>,
    pub signer_info: SignerInfo,
}

impl DecodedSignature {
    /// The signer's issuer distinguished name and serial number, rendered
    /// for `--list-signatures`/`--show-signature` (RFC 4514-style string,
    /// approximated with `Debug` formatting since `rasn-pkix::Name` has no
    /// built-in RFC 4514 renderer).
    pub fn signer_description(&self) -> String {
        match &self.signer_info.sid {
            SignerIdentifier::IssuerAndSerialNumber(iasn) => {
                format!("{:?} serial={:?}", iasn.issuer, iasn.serial_number)
            }
            SignerIdentifier::SubjectKeyIdentifier(ski) => format!("subjectKeyIdentifier={ski:?}"),
        }
    }
}

/// Parses `payload` (the bytes following a WIN_CERTIFICATE header) as a
/// `ContentInfo`/`SignedData` wrapping `SpcIndirectDataContent`.
pub fn parse_signed_data(payload: &[u8]) -> Result<DecodedSignature> {
    let content_info: rasn_cms::ContentInfo = rasn::der::decode(payload)
        .map_err(|e| Error::MalformedCms(format!("decoding ContentInfo: {e}")))?;

    if content_info.content_type != id_signed_data() {
        return Err(Error::UnsupportedContentType(format!(
            "{:?}",
            content_info.content_type
        )));
    }

    // `Any`'s `contents` field is private; re-encoding it (rather than
    // reading the field) is how `rasn` itself recovers the raw DER of an
    // `ANY`-typed value, since `Any`'s `Encode` impl just writes `contents`
    // back out verbatim.
    let signed_data_der = rasn::der::encode(&content_info.content)
        .map_err(|e| Error::MalformedCms(format!("re-encoding SignedData content: {e}")))?;
    let signed_data: SignedData = rasn::der::decode(&signed_data_der)
        .map_err(|e| Error::MalformedCms(format!("decoding SignedData: {e}")))?;

    let spc_oid: rasn::types::ObjectIdentifier = SPC_INDIRECT_DATA_OBJID.into();
    if signed_data.encap_content_info.content_type != spc_oid {
        return Err(Error::UnsupportedContentType(format!(
            "{:?}",
            signed_data.encap_content_info.content_type
        )));
    }
    let encap_content = signed_data
        .encap_content_info
        .content
        .as_ref()
        .ok_or_else(|| Error::MalformedCms("SignedData has no encapsulated content".into()))?;

    let indirect_data: SpcIndirectDataContent = rasn::der::decode(encap_content.as_ref())
        .map_err(|e| Error::MalformedCms(format!("decoding SpcIndirectDataContent: {e}")))?;

    let digest_algorithm = DigestAlgorithm::from_oid(&indirect_data.message_digest.digest_algorithm.algorithm)?;
    let pe_digest = indirect_data.message_digest.digest.to_vec();

    let certificates = signed_data
        .certificates
        .as_ref()
        .map(|set| {
            set.iter()
                .filter_map(|choice| match choice {
                    CertificateChoices::Certificate(cert) => Some((**cert).clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let signer_info = signed_data
        .signer_infos
        .iter()
        .next()
        .cloned()
        .ok_or_else(|| Error::MalformedCms("SignedData has no SignerInfo".into()))?;

    Ok(DecodedSignature {
        digest_algorithm,
        pe_digest,
        certificates,
        signer_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_fail_with_malformed_cms() {
        let err = parse_signed_data(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap_err();
        assert!(matches!(err, Error::MalformedCms(_)));
    }
}
