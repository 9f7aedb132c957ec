//! Assembles a DER-encoded CMS `ContentInfo`/`SignedData` wrapping an
//! Authenticode `SpcIndirectDataContent`, per `spec.md` §4.D's six-step
//! design.

use rasn::types::{Any, Integer, ObjectIdentifier, OctetString, SetOf};
use rasn_cms::authenticode::{
    DigestInfo, SpcAttributeTypeAndOptionalValue, SpcIndirectDataContent, SpcLink,
    SpcPeImageData, SpcPeImageFlags, SpcSpOpusInfo, SpcString, SPC_INDIRECT_DATA_OBJID,
    SPC_PE_IMAGE_DATA_OBJID,
};
use rasn_cms::{
    Attribute, CertificateChoices, ContentInfo, EncapsulatedContentInfo, SignedData, SignerInfo,
    SignerIdentifier,
};
use tracing::debug;

use super::{id_content_type_attr, id_message_digest_attr, id_signed_data};
use crate::digest::DigestEntry;
use crate::error::{Error, Result};
use crate::identity::SigningIdentity;

/// Builds the `SpcIndirectDataContent` wrapping `digest`: an empty
/// `SpcPeImageData` link (`spec.md` §4.D step 1 — `pesign` never populates
/// the file-name field) and a `DigestInfo` carrying the Authenticode PE
/// digest.
fn build_indirect_data_content(digest: &DigestEntry) -> SpcIndirectDataContent {
    let pe_image_data = SpcPeImageData {
        flags: SpcPeImageFlags(rasn::types::BitString::from_vec(vec![0u8])),
        file: Some(SpcLink::File(SpcString::Unicode(String::new().into()))),
    };
    let data = SpcAttributeTypeAndOptionalValue {
        attribute_type: SPC_PE_IMAGE_DATA_OBJID.into(),
        value: rasn::der::encode(&pe_image_data)
            .ok()
            .map(|bytes| Any::new(bytes)),
    };
    let message_digest = DigestInfo {
        digest_algorithm: digest.algorithm.algorithm_identifier(),
        digest: OctetString::from(digest.digest.clone()),
    };
    SpcIndirectDataContent {
        data,
        message_digest,
    }
}

/// Builds the DER-encoded signed-attribute `SET OF` (`spec.md` §4.D step 2):
/// `contentType`, `messageDigest`, and an empty `SpcSpOpusInfo`.
///
/// `rasn`'s `SET OF` encoder preserves insertion order — it only sorts
/// fields of a Rust-level `SET` struct, not the elements of a `SetOf<T>`
/// collection — so DER's "sort elements by their own encoding"
/// canonicalization rule has to be applied here explicitly before handing
/// the vector to `SetOf::from_vec`.
fn build_signed_attributes(
    content_type_oid: &ObjectIdentifier,
    indirect_data_digest: &[u8],
) -> Result<SetOf<Attribute>> {
    let opus_info = SpcSpOpusInfo {
        program_name: None,
        more_info: None,
    };
    let opus_info_der = rasn::der::encode(&opus_info)
        .map_err(|e| Error::SigningFailed(format!("encoding SpcSpOpusInfo: {e}")))?;

    let content_type_attr = Attribute {
        attr_type: id_content_type_attr(),
        attr_values: SetOf::from_vec(vec![Any::new(
            rasn::der::encode(content_type_oid)
                .map_err(|e| Error::SigningFailed(format!("encoding contentType OID: {e}")))?,
        )]),
    };
    let message_digest_attr = Attribute {
        attr_type: id_message_digest_attr(),
        attr_values: SetOf::from_vec(vec![Any::new(
            rasn::der::encode(&OctetString::from(indirect_data_digest.to_vec()))
                .map_err(|e| Error::SigningFailed(format!("encoding messageDigest: {e}")))?,
        )]),
    };
    let opus_info_attr = Attribute {
        attr_type: rasn_cms::authenticode::SPC_SP_OPUS_INFO_OBJID.into(),
        attr_values: SetOf::from_vec(vec![Any::new(opus_info_der)]),
    };

    let mut attrs = vec![content_type_attr, message_digest_attr, opus_info_attr];
    sort_by_der_encoding(&mut attrs)?;
    Ok(SetOf::from_vec(attrs))
}

/// Orders `attrs` by the lexicographic (unsigned byte) order of each
/// element's own DER encoding, the canonicalization DER requires for a
/// `SET OF` (`spec.md` §4.D step 2, §8 "DER canonicity").
fn sort_by_der_encoding(attrs: &mut [Attribute]) -> Result<()> {
    let mut keyed: Vec<(Vec<u8>, Attribute)> = attrs
        .iter()
        .cloned()
        .map(|attr| {
            rasn::der::encode(&attr)
                .map(|der| (der, attr))
                .map_err(|e| Error::SigningFailed(format!("encoding attribute for sort: {e}")))
        })
        .collect::<Result<_>>()?;
    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (slot, (_, attr)) in attrs.iter_mut().zip(keyed.into_iter()) {
        *slot = attr;
    }
    Ok(())
}

/// `rsaEncryption` (RFC 3279 §2.3.1) — Authenticode signs with plain RSA
/// PKCS#1v1.5, keeping the digest algorithm only in `digestAlgorithm`, not
/// folded into `signatureAlgorithm` the way `shaNNNWithRSAEncryption` would.
fn rsa_encryption_algorithm_identifier() -> rasn_pkix::AlgorithmIdentifier {
    rasn_pkix::AlgorithmIdentifier {
        algorithm: ObjectIdentifier::new(vec![1, 2, 840, 113549, 1, 1, 1])
            .expect("static OID is valid"),
        parameters: None,
    }
}

/// Builds a complete DER-encoded `ContentInfo`/`SignedData` over `digest`,
/// signed by `identity`, becoming the payload of a new WIN_CERTIFICATE
/// entry.
pub fn build_signed_data(digest: &DigestEntry, identity: &dyn SigningIdentity) -> Result<Vec<u8>> {
    let indirect_data_content = build_indirect_data_content(digest);
    let indirect_data_der = rasn::der::encode(&indirect_data_content)
        .map_err(|e| Error::SigningFailed(format!("encoding SpcIndirectDataContent: {e}")))?;
    let content_type_oid: ObjectIdentifier = SPC_INDIRECT_DATA_OBJID.into();

    let content_digest = digest
        .algorithm
        .digest_chunks(std::iter::once(indirect_data_der.as_slice()));

    let signed_attrs = build_signed_attributes(&content_type_oid, &content_digest)?;
    let signed_attrs_der = rasn::der::encode(&signed_attrs)
        .map_err(|e| Error::SigningFailed(format!("encoding signed attributes: {e}")))?;

    let signature = identity.sign(digest.algorithm, &signed_attrs_der)?;

    let signer_info = SignerInfo {
        version: Integer::from(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(Box::new(identity.issuer_and_serial()?)),
        digest_algorithm: digest.algorithm.algorithm_identifier(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: rsa_encryption_algorithm_identifier(),
        signature: rasn::types::OctetString::from(signature),
        unsigned_attrs: None,
    };

    finish_signed_data(digest.algorithm.algorithm_identifier(), content_type_oid, indirect_data_der, signer_info, identity)
}

/// Returns the DER encoding of the signed-attribute `SET OF` alone, for
/// `--export-signed-attributes`: an external signer signs this blob
/// directly and the raw RSA signature comes back through
/// `--import-raw-signature` (`spec.md`'s disaggregated signing flow, for
/// signers whose key never leaves a separate host).
pub fn signed_attributes_der(digest: &DigestEntry) -> Result<Vec<u8>> {
    let indirect_data_content = build_indirect_data_content(digest);
    let indirect_data_der = rasn::der::encode(&indirect_data_content)
        .map_err(|e| Error::SigningFailed(format!("encoding SpcIndirectDataContent: {e}")))?;
    let content_type_oid: ObjectIdentifier = SPC_INDIRECT_DATA_OBJID.into();
    let content_digest = digest
        .algorithm
        .digest_chunks(std::iter::once(indirect_data_der.as_slice()));
    let signed_attrs = build_signed_attributes(&content_type_oid, &content_digest)?;
    rasn::der::encode(&signed_attrs)
        .map_err(|e| Error::SigningFailed(format!("encoding signed attributes: {e}")))
}

/// Reassembles a complete `SignedData` from a signed-attribute `SET OF`
/// exported earlier and the raw RSA signature an external signer computed
/// over it, the other half of [`signed_attributes_der`]'s disaggregated
/// flow. `identity` here only contributes the certificate to embed — the
/// private key that produced `signature` was never available to this host.
pub fn assemble_signed_data_from_raw(
    digest: &DigestEntry,
    signed_attrs_der: &[u8],
    signature: &[u8],
    identity: &dyn SigningIdentity,
) -> Result<Vec<u8>> {
    let indirect_data_content = build_indirect_data_content(digest);
    let indirect_data_der = rasn::der::encode(&indirect_data_content)
        .map_err(|e| Error::SigningFailed(format!("encoding SpcIndirectDataContent: {e}")))?;
    let content_type_oid: ObjectIdentifier = SPC_INDIRECT_DATA_OBJID.into();

    let signed_attrs: SetOf<Attribute> = rasn::der::decode(signed_attrs_der)
        .map_err(|e| Error::MalformedCms(format!("decoding imported signed attributes: {e}")))?;

    let signer_info = SignerInfo {
        version: Integer::from(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(Box::new(identity.issuer_and_serial()?)),
        digest_algorithm: digest.algorithm.algorithm_identifier(),
        signed_attrs: Some(signed_attrs),
        signature_algorithm: rsa_encryption_algorithm_identifier(),
        signature: rasn::types::OctetString::from(signature.to_vec()),
        unsigned_attrs: None,
    };

    finish_signed_data(digest.algorithm.algorithm_identifier(), content_type_oid, indirect_data_der, signer_info, identity)
}

/// Shared tail of [`build_signed_data`] and [`assemble_signed_data_from_raw`]:
/// wraps a fully-built `SignerInfo` and the encapsulated content in a
/// `SignedData`, attaches the signer's certificate, and DER-encodes the
/// outer `ContentInfo`.
fn finish_signed_data(
    digest_algorithm_identifier: rasn_pkix::AlgorithmIdentifier,
    content_type_oid: ObjectIdentifier,
    indirect_data_der: Vec<u8>,
    signer_info: SignerInfo,
    identity: &dyn SigningIdentity,
) -> Result<Vec<u8>> {
    let certificate: rasn_pkix::Certificate = rasn::der::decode(identity.certificate_der())
        .map_err(|e| Error::SigningFailed(format!("re-decoding signer certificate: {e}")))?;

    let signed_data = SignedData {
        version: Integer::from(1),
        digest_algorithms: SetOf::from_vec(vec![digest_algorithm_identifier]),
        encap_content_info: EncapsulatedContentInfo {
            content_type: content_type_oid,
            content: Some(OctetString::from(indirect_data_der)),
        },
        certificates: Some(SetOf::from_vec(vec![CertificateChoices::Certificate(
            Box::new(certificate),
        )])),
        crls: None,
        signer_infos: SetOf::from_vec(vec![signer_info]),
    };

    let signed_data_der = rasn::der::encode(&signed_data)
        .map_err(|e| Error::SigningFailed(format!("encoding SignedData: {e}")))?;
    let content_info = ContentInfo {
        content_type: id_signed_data(),
        content: Any::new(signed_data_der),
    };
    let der = rasn::der::encode(&content_info)
        .map_err(|e| Error::SigningFailed(format!("encoding ContentInfo: {e}")))?;

    debug!(bytes = der.len(), "assembled Authenticode SignedData");
    Ok(der)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rasn_cms::IssuerAndSerialNumber;
    use rsa::pkcs1v15::Pkcs1v15Sign;
    use rsa::RsaPrivateKey;
    use sha2::Sha256;

    use crate::test_support::self_signed_certificate_der;

    /// An in-memory [`SigningIdentity`] backed by a throwaway RSA key and
    /// the hand-built certificate in [`crate::test_support`], so these
    /// tests don't need a filesystem-backed identity store.
    struct TestIdentity {
        certificate_der: Vec<u8>,
        certificate: rasn_pkix::Certificate,
        key: RsaPrivateKey,
    }

    impl TestIdentity {
        fn new() -> Self {
            let mut rng = rand::thread_rng();
            let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
            let certificate_der = self_signed_certificate_der(&key);
            let certificate = rasn::der::decode(&certificate_der).unwrap();
            Self {
                certificate_der,
                certificate,
                key,
            }
        }
    }

    impl SigningIdentity for TestIdentity {
        fn certificate_der(&self) -> &[u8] {
            &self.certificate_der
        }

        fn public_key_der(&self) -> Result<Vec<u8>> {
            rasn::der::encode(&self.certificate.tbs_certificate.subject_public_key_info)
                .map_err(|e| Error::SigningFailed(e.to_string()))
        }

        fn issuer_and_serial(&self) -> Result<IssuerAndSerialNumber> {
            Ok(IssuerAndSerialNumber {
                issuer: self.certificate.tbs_certificate.issuer.clone(),
                serial_number: self.certificate.tbs_certificate.serial_number.clone(),
            })
        }

        fn sign(&self, digest_algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
            let hashed = digest_algorithm.digest_chunks(std::iter::once(message));
            self.key
                .sign_with_rng(&mut OsRng, Pkcs1v15Sign::new::<Sha256>(), &hashed)
                .map_err(|e| Error::SigningFailed(e.to_string()))
        }
    }

    fn sample_digest() -> DigestEntry {
        DigestEntry {
            algorithm: DigestAlgorithm::Sha256,
            digest: vec![0x42; 32],
        }
    }

    #[test]
    fn build_signed_data_round_trips_through_parse() {
        let identity = TestIdentity::new();
        let digest = sample_digest();
        let der = build_signed_data(&digest, &identity).unwrap();

        let decoded = crate::cms::parse::parse_signed_data(&der).unwrap();
        assert_eq!(decoded.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(decoded.pe_digest, digest.digest);
        assert_eq!(decoded.certificates.len(), 1);
    }

    #[test]
    fn exported_signed_attributes_reassemble_into_an_equivalent_signed_data() {
        let identity = TestIdentity::new();
        let digest = sample_digest();

        let sattrs_der = signed_attributes_der(&digest).unwrap();
        let signature = identity.sign(digest.algorithm, &sattrs_der).unwrap();
        let assembled =
            assemble_signed_data_from_raw(&digest, &sattrs_der, &signature, &identity).unwrap();

        let decoded = crate::cms::parse::parse_signed_data(&assembled).unwrap();
        assert_eq!(decoded.pe_digest, digest.digest);
    }

    #[test]
    fn signed_attributes_are_ordered_by_der_encoding() {
        let identity = TestIdentity::new();
        let der = build_signed_data(&sample_digest(), &identity).unwrap();
        let decoded = crate::cms::parse::parse_signed_data(&der).unwrap();
        let attrs = decoded
            .signer_info
            .signed_attrs
            .expect("SignerInfo carries signed attributes");

        let encoded: Vec<Vec<u8>> = attrs.iter().map(|a| rasn::der::encode(a).unwrap()).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }
}
