//! Operation Dispatcher (`spec.md` §4.G): interprets an [`OperationDescriptor`]
//! built by an external front end (the CLI, or a daemon decoding an IPC
//! request — both out of scope here per `spec.md` §1), sequences the other
//! six components against it, and enforces the preconditions `spec.md`
//! §4.G and §5 name: outputs opened only after input validation, `in`/`out`
//! aliasing rejected, existing outputs refused without `--force`, and the
//! signing identity resolved before any destructive write.
//!
//! `spec.md`'s own design note keeps the source's exhaustive switch over
//! `action_mask` rather than composing flags ad hoc: [`RecognizedOperation`]
//! is that switch, one variant per legal mask, with [`ActionMask::recognize`]
//! standing in for the `IncompatibleFlags` default case.

use std::fs;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use tracing::{debug_span, info};

use crate::authenticode::{self, PaddingMode};
use crate::certtable::{CertificateEntry, CertificateTable};
use crate::cms;
use crate::digest::{DigestAlgorithm, DigestEntry};
use crate::error::{Error, Result};
use crate::identity::{FileSystemIdentityStore, SigningIdentity};
use crate::pe::PeImage;

bitflags! {
    /// One bit per action the CLI surface (`spec.md` §6) can request. The
    /// dispatcher only recognizes a handful of *combinations* of these —
    /// see [`ActionMask::recognize`] — everything else is
    /// [`Error::IncompatibleFlags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionMask: u32 {
        /// `--hash`/`-h`: compute and print the Authenticode digest.
        const HASH                  = 1 << 0;
        /// `--sign`/`-s`: produce a signature (locally or from an import)
        /// and either embed it or export it, depending on what else is set.
        const SIGN                  = 1 << 1;
        /// `--remove-signature`/`-r`.
        const REMOVE                = 1 << 2;
        /// `--list-signatures`/`-l`.
        const LIST                  = 1 << 3;
        /// `--show-signature`/`-S`.
        const SHOW                  = 1 << 4;
        /// `--import-signature`/`-m`: source a complete `SignedData` from a
        /// file instead of building one.
        const IMPORT_SIGNATURE      = 1 << 5;
        /// `--export-signature`/`-e`: write the signature to a file instead
        /// of embedding it.
        const EXPORT_SIGNATURE      = 1 << 6;
        /// `--import-raw-signature`/`-R`: source the raw RSA signature value
        /// of an externally-computed signature.
        const IMPORT_RAW_SIGNATURE  = 1 << 7;
        /// `--import-signed-attributes`/`-I`: paired with
        /// `IMPORT_RAW_SIGNATURE` to reassemble a `SignedData` signed on
        /// another host.
        const IMPORT_SATTRS         = 1 << 8;
        /// `--export-signed-attributes`/`-E`: export the signed-attribute
        /// `SET OF` for an external signer to sign over.
        const EXPORT_SATTRS         = 1 << 9;
        /// `--export-pubkey`/`-K`.
        const EXPORT_PUBKEY         = 1 << 10;
        /// `--export-cert`/`-C`.
        const EXPORT_CERT           = 1 << 11;
        /// `--daemonize`/`-D`: named at the interface boundary only
        /// (`spec.md` §1); this dispatcher recognizes the flag but does not
        /// implement the IPC mode.
        const DAEMONIZE             = 1 << 12;
    }
}

/// One legal `action_mask` combination, with the arguments each needs.
/// `ActionMask::recognize` is the only place these are constructed.
#[derive(Debug)]
enum RecognizedOperation {
    NothingToDo,
    ComputeAndPrintDigest,
    GenerateAndEmbedSignature,
    GenerateAndExportSignature,
    ExportExistingSignature,
    ImportAndEmbedSignature,
    AssembleAndEmbedFromRaw,
    ExportSignedAttributes,
    RemoveSignature,
    ListSignatures,
    ShowSignature,
    ExportPublicKey,
    ExportCertificate,
    Daemonize,
}

impl ActionMask {
    /// Matches `self` against the fixed table of legal combinations,
    /// per `spec.md` §4.G. Any other combination fails `IncompatibleFlags`
    /// naming the offending flags.
    fn recognize(self) -> Result<RecognizedOperation> {
        use ActionMask as A;
        Ok(match self {
            m if m.is_empty() => RecognizedOperation::NothingToDo,
            A::HASH => RecognizedOperation::ComputeAndPrintDigest,
            A::SIGN => RecognizedOperation::GenerateAndEmbedSignature,
            m if m == A::SIGN | A::EXPORT_SIGNATURE => {
                RecognizedOperation::GenerateAndExportSignature
            }
            A::EXPORT_SIGNATURE => RecognizedOperation::ExportExistingSignature,
            m if m == A::SIGN | A::IMPORT_SIGNATURE => {
                RecognizedOperation::ImportAndEmbedSignature
            }
            m if m == A::IMPORT_RAW_SIGNATURE | A::IMPORT_SATTRS => {
                RecognizedOperation::AssembleAndEmbedFromRaw
            }
            A::EXPORT_SATTRS => RecognizedOperation::ExportSignedAttributes,
            A::REMOVE => RecognizedOperation::RemoveSignature,
            A::LIST => RecognizedOperation::ListSignatures,
            A::SHOW => RecognizedOperation::ShowSignature,
            A::EXPORT_PUBKEY => RecognizedOperation::ExportPublicKey,
            A::EXPORT_CERT => RecognizedOperation::ExportCertificate,
            A::DAEMONIZE => RecognizedOperation::Daemonize,
            other => {
                return Err(Error::IncompatibleFlags(describe_mask(other)));
            }
        })
    }
}

fn describe_mask(mask: ActionMask) -> String {
    let names: Vec<&str> = mask
        .iter_names()
        .map(|(name, _)| name)
        .collect();
    if names.is_empty() {
        format!("{mask:?}")
    } else {
        names.join("|")
    }
}

/// Value constructed by the front end and handed to [`dispatch`]
/// (`spec.md` §3 "Operation Descriptor").
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub action_mask: ActionMask,
    /// Zero-based index of the signature to act on for `--remove`,
    /// `--show`, and `--export-*` actions. Default 0.
    pub signum: usize,
    pub digest_algorithm: DigestAlgorithm,
    /// `--certificate`/`-c`.
    pub signing_nickname: Option<String>,
    /// `--certdir`/`-n`; defaults to [`crate::identity::default_cert_dir`].
    pub cert_dir: Option<PathBuf>,
    pub in_path: PathBuf,
    pub out_path: Option<PathBuf>,
    pub import_signature_path: Option<PathBuf>,
    pub export_signature_path: Option<PathBuf>,
    pub import_raw_signature_path: Option<PathBuf>,
    pub import_sattrs_path: Option<PathBuf>,
    pub export_sattrs_path: Option<PathBuf>,
    pub export_pubkey_path: Option<PathBuf>,
    pub export_cert_path: Option<PathBuf>,
    pub force_overwrite: bool,
    pub ascii_armor: bool,
    pub padding: bool,
}

/// A minimal per-signature summary for `list`/`show` reporting
/// (`spec.md` §12's supplemented `--list-signatures`/`--show-signature`
/// detail).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignatureSummary {
    pub index: usize,
    pub length: usize,
    pub revision: &'static str,
    pub certificate_type: &'static str,
    pub digest_algorithm: &'static str,
    pub pe_digest_hex: String,
    pub signer: String,
}

/// What a dispatched operation produced, for the front end to render.
#[derive(Debug)]
pub enum Outcome {
    NothingToDo,
    Digest {
        algorithm: DigestAlgorithm,
        hex: String,
    },
    Signed,
    Removed,
    Listed(Vec<SignatureSummary>),
    Shown(SignatureSummary),
    Exported {
        path: PathBuf,
    },
    DaemonizeUnsupported,
}

/// Runs `op` to completion, returning a typed [`Outcome`] or a typed
/// [`Error`]. This is the single entry point external front ends call; it
/// never exits a process or prints anything itself (`spec.md` §9's
/// "exit-on-error style" design note: the dispatcher surfaces typed errors,
/// the front end exits exactly once).
pub fn dispatch(op: &OperationDescriptor) -> Result<Outcome> {
    let recognized = op.action_mask.recognize()?;
    let _span = debug_span!("dispatch", action = ?op.action_mask).entered();

    if let Some(out) = &op.out_path {
        if out == &op.in_path {
            return Err(Error::InPlaceUnsupported);
        }
    }

    match recognized {
        RecognizedOperation::NothingToDo => {
            info!("nothing to do");
            Ok(Outcome::NothingToDo)
        }
        RecognizedOperation::ComputeAndPrintDigest => compute_and_print_digest(op),
        RecognizedOperation::GenerateAndEmbedSignature => generate_and_embed_signature(op),
        RecognizedOperation::GenerateAndExportSignature => generate_and_export_signature(op),
        RecognizedOperation::ExportExistingSignature => export_existing_signature(op),
        RecognizedOperation::ImportAndEmbedSignature => import_and_embed_signature(op),
        RecognizedOperation::AssembleAndEmbedFromRaw => assemble_and_embed_from_raw(op),
        RecognizedOperation::ExportSignedAttributes => export_signed_attributes(op),
        RecognizedOperation::RemoveSignature => remove_signature(op),
        RecognizedOperation::ListSignatures => list_signatures(op),
        RecognizedOperation::ShowSignature => show_signature(op),
        RecognizedOperation::ExportPublicKey => export_public_key(op),
        RecognizedOperation::ExportCertificate => export_certificate(op),
        RecognizedOperation::Daemonize => Ok(Outcome::DaemonizeUnsupported),
    }
}

fn padding_mode(image: &PeImage, op: &OperationDescriptor) -> PaddingMode {
    if op.padding {
        PaddingMode::PadToFileAlignment {
            file_alignment: file_alignment(image),
        }
    } else {
        PaddingMode::Strict
    }
}

/// `FileAlignment` isn't tracked on [`crate::pe::PeLayout`] today (nothing
/// but `--padding` needs it); derive it from the first section's pointer,
/// which `SamD2021-lowell`'s fixtures and most real images align to
/// `FileAlignment` exactly.
fn file_alignment(image: &PeImage) -> u32 {
    image
        .layout()
        .sections
        .iter()
        .map(|s| s.pointer_to_raw_data)
        .filter(|&p| p != 0)
        .min()
        .unwrap_or(0x200)
}

fn open_input(op: &OperationDescriptor) -> Result<PeImage> {
    PeImage::open(&op.in_path)
}

/// Opens a writable clone of `image` at `op.out_path`, enforcing the
/// existing-output/`--force` precondition before any byte is written
/// (`spec.md` §4.G: "Existing outputs are refused unless force_overwrite is
/// set").
fn open_output(op: &OperationDescriptor, image: &PeImage) -> Result<PeImage> {
    let out_path = op
        .out_path
        .as_ref()
        .ok_or_else(|| Error::IncompatibleFlags("this action requires --out".into()))?;
    if out_path.exists() && !op.force_overwrite {
        return Err(Error::OutputExists(out_path.clone()));
    }
    Ok(image.clone_to(out_path))
}

fn resolve_identity(op: &OperationDescriptor) -> Result<impl SigningIdentity> {
    let nickname = op
        .signing_nickname
        .as_ref()
        .ok_or_else(|| Error::CertificateNotFound {
            nickname: String::new(),
            certdir: op.cert_dir.clone().unwrap_or_default(),
        })?;
    let dir = op
        .cert_dir
        .clone()
        .unwrap_or_else(crate::identity::default_cert_dir);
    FileSystemIdentityStore::new(dir).find(nickname)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io(path, e))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|e| Error::io(path, e))
}

/// Wraps `der` in a `-----BEGIN <label>-----`/`-----END <label>-----` PEM
/// block when `armor` is set, else returns it as-is (`spec.md` §6).
fn maybe_armor(der: Vec<u8>, armor: bool, label: &str) -> Vec<u8> {
    if armor {
        pem::encode(&pem::Pem {
            tag: label.to_string(),
            contents: der,
        })
        .into_bytes()
    } else {
        der
    }
}

/// Accepts either PEM or raw DER on import, trying a PEM parse first and
/// falling back to the bytes as-is (`spec.md` §12: "transparent PEM-or-DER
/// detection on import").
fn maybe_unarmor(bytes: Vec<u8>) -> Vec<u8> {
    pem::parse(&bytes)
        .map(|p| p.into_contents())
        .unwrap_or(bytes)
}

fn compute_and_print_digest(op: &OperationDescriptor) -> Result<Outcome> {
    let image = open_input(op)?;
    let padding = padding_mode(&image, op);
    let entry = authenticode::digest_image(&image, op.digest_algorithm, padding)?;
    Ok(Outcome::Digest {
        algorithm: entry.algorithm,
        hex: entry.hex(),
    })
}

/// Digests `image`, reserves exactly enough certificate-table space for a
/// signature over that digest, then re-digests — the "double-digest"
/// variant `spec.md` §9 calls authoritative, so the signature embeds the
/// digest of the *final* file layout rather than the pre-reservation one.
fn digest_after_reservation(
    image: &mut PeImage,
    algorithm: DigestAlgorithm,
    identity: &dyn SigningIdentity,
) -> Result<DigestEntry> {
    let first = authenticode::digest_image(image, algorithm, PaddingMode::Strict)?;
    let extra = CertificateTable::estimate_size(&first, identity)?;
    CertificateTable::allocate_space(image, extra)?;
    authenticode::digest_image(image, algorithm, PaddingMode::Strict)
}

fn generate_and_embed_signature(op: &OperationDescriptor) -> Result<Outcome> {
    let input = open_input(op)?;
    let identity = resolve_identity(op)?;
    let mut output = open_output(op, &input)?;

    let mut table = CertificateTable::default();
    table.write_to(&mut output)?;

    let digest = digest_after_reservation(&mut output, op.digest_algorithm, &identity)?;
    let der = cms::build_signed_data(&digest, &identity)?;

    let mut table = CertificateTable::default();
    let at_index = table.len();
    table.insert(CertificateEntry::new_signed_data(der), at_index);
    table.write_to(&mut output)?;
    output.update_checksum()?;
    output.save()?;

    Ok(Outcome::Signed)
}

fn generate_and_export_signature(op: &OperationDescriptor) -> Result<Outcome> {
    let input = open_input(op)?;
    let identity = resolve_identity(op)?;
    let export_path = op.export_signature_path.as_ref().ok_or_else(|| {
        Error::IncompatibleFlags("--export-signature requires a path".into())
    })?;
    if export_path.exists() && !op.force_overwrite {
        return Err(Error::OutputExists(export_path.clone()));
    }

    let digest = authenticode::digest_image(&input, op.digest_algorithm, PaddingMode::Strict)?;
    let der = cms::build_signed_data(&digest, &identity)?;
    let bytes = maybe_armor(der, op.ascii_armor, "SIGNATURE");
    write_file(export_path, &bytes)?;

    Ok(Outcome::Exported {
        path: export_path.clone(),
    })
}

/// Standalone `--export-signature`/`-e` (no `--sign`): extracts the raw DER
/// payload of an *existing* WIN_CERTIFICATE entry at `--signature-number`
/// and writes it out, the same table-parse-then-index pattern
/// [`show_signature`] uses (`spec.md` §8 scenario 5: `pesign -i signed.efi
/// -e sig.der -u 0` "writes the raw DER of the first WIN_CERTIFICATE
/// payload").
fn export_existing_signature(op: &OperationDescriptor) -> Result<Outcome> {
    let image = open_input(op)?;
    let export_path = op.export_signature_path.as_ref().ok_or_else(|| {
        Error::IncompatibleFlags("--export-signature requires a path".into())
    })?;
    if export_path.exists() && !op.force_overwrite {
        return Err(Error::OutputExists(export_path.clone()));
    }

    let table = CertificateTable::parse(&image)?;
    let entry = table
        .entries
        .get(op.signum)
        .ok_or(Error::InvalidSignatureNumber {
            index: op.signum,
            count: table.len(),
        })?;
    let bytes = maybe_armor(entry.payload.clone(), op.ascii_armor, "SIGNATURE");
    write_file(export_path, &bytes)?;

    Ok(Outcome::Exported {
        path: export_path.clone(),
    })
}

fn import_and_embed_signature(op: &OperationDescriptor) -> Result<Outcome> {
    let input = open_input(op)?;
    let mut output = open_output(op, &input)?;
    let import_path = op.import_signature_path.as_ref().ok_or_else(|| {
        Error::IncompatibleFlags("--import-signature requires a path".into())
    })?;
    let der = maybe_unarmor(read_file(import_path)?);
    // Validate it actually decodes before touching the output image.
    cms::parse_signed_data(&der)?;

    let mut table = CertificateTable::parse(&output)?;
    let at_index = table.len();
    table.insert(CertificateEntry::new_signed_data(der), at_index);
    table.write_to(&mut output)?;
    output.update_checksum()?;
    output.save()?;

    Ok(Outcome::Signed)
}

/// Reassembles a `SignedData` from a raw RSA signature and a previously
/// exported signed-attribute `SET OF` (`spec.md` §4.D/§4.F disaggregated
/// flow: hash on one host, sign the exported attributes on another that
/// holds the key but not this tool, re-embed on a third).
fn assemble_and_embed_from_raw(op: &OperationDescriptor) -> Result<Outcome> {
    let input = open_input(op)?;
    let identity = resolve_identity(op)?;
    let mut output = open_output(op, &input)?;

    let sattrs_path = op.import_sattrs_path.as_ref().ok_or_else(|| {
        Error::IncompatibleFlags("--import-signed-attributes requires a path".into())
    })?;
    let raw_sig_path = op.import_raw_signature_path.as_ref().ok_or_else(|| {
        Error::IncompatibleFlags("--import-raw-signature requires a path".into())
    })?;
    let sattrs_der = maybe_unarmor(read_file(sattrs_path)?);
    let signature = maybe_unarmor(read_file(raw_sig_path)?);

    let digest = authenticode::digest_image(&output, op.digest_algorithm, PaddingMode::Strict)?;
    let der =
        cms::assemble_signed_data_from_raw(&digest, &sattrs_der, &signature, &identity)?;

    let mut table = CertificateTable::parse(&output)?;
    let at_index = table.len();
    table.insert(CertificateEntry::new_signed_data(der), at_index);
    table.write_to(&mut output)?;
    output.update_checksum()?;
    output.save()?;

    Ok(Outcome::Signed)
}

fn export_signed_attributes(op: &OperationDescriptor) -> Result<Outcome> {
    let input = open_input(op)?;
    let export_path = op.export_sattrs_path.as_ref().ok_or_else(|| {
        Error::IncompatibleFlags("--export-signed-attributes requires a path".into())
    })?;
    if export_path.exists() && !op.force_overwrite {
        return Err(Error::OutputExists(export_path.clone()));
    }

    let digest = authenticode::digest_image(&input, op.digest_algorithm, PaddingMode::Strict)?;
    let der = cms::signed_attributes_der(&digest)?;
    let bytes = maybe_armor(der, op.ascii_armor, "SIGNED ATTRIBUTES");
    write_file(export_path, &bytes)?;

    Ok(Outcome::Exported {
        path: export_path.clone(),
    })
}

fn remove_signature(op: &OperationDescriptor) -> Result<Outcome> {
    let input = open_input(op)?;
    let mut output = open_output(op, &input)?;

    let mut table = CertificateTable::parse(&output)?;
    table.remove(op.signum)?;
    table.write_to(&mut output)?;
    output.update_checksum()?;
    output.save()?;

    Ok(Outcome::Removed)
}

fn summarize(index: usize, entry: &CertificateEntry) -> Result<SignatureSummary> {
    let decoded = cms::parse_signed_data(&entry.payload)?;
    Ok(SignatureSummary {
        index,
        length: entry.padded_len(),
        revision: "2.0",
        certificate_type: "PKCS_SIGNED_DATA",
        digest_algorithm: decoded.digest_algorithm.name(),
        pe_digest_hex: hex::encode(&decoded.pe_digest),
        signer: decoded.signer_description(),
    })
}

fn list_signatures(op: &OperationDescriptor) -> Result<Outcome> {
    let image = open_input(op)?;
    let table = CertificateTable::parse(&image)?;
    let summaries = table
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| summarize(i, e))
        .collect::<Result<Vec<_>>>()?;
    Ok(Outcome::Listed(summaries))
}

fn show_signature(op: &OperationDescriptor) -> Result<Outcome> {
    let image = open_input(op)?;
    let table = CertificateTable::parse(&image)?;
    let entry = table
        .entries
        .get(op.signum)
        .ok_or(Error::InvalidSignatureNumber {
            index: op.signum,
            count: table.len(),
        })?;
    Ok(Outcome::Shown(summarize(op.signum, entry)?))
}

fn export_public_key(op: &OperationDescriptor) -> Result<Outcome> {
    let _input = open_input(op)?;
    let identity = resolve_identity(op)?;
    let export_path = op
        .export_pubkey_path
        .as_ref()
        .ok_or_else(|| Error::IncompatibleFlags("--export-pubkey requires a path".into()))?;
    if export_path.exists() && !op.force_overwrite {
        return Err(Error::OutputExists(export_path.clone()));
    }
    let der = identity.public_key_der()?;
    write_file(export_path, &maybe_armor(der, op.ascii_armor, "PUBLIC KEY"))?;
    Ok(Outcome::Exported {
        path: export_path.clone(),
    })
}

fn export_certificate(op: &OperationDescriptor) -> Result<Outcome> {
    let _input = open_input(op)?;
    let identity = resolve_identity(op)?;
    let export_path = op
        .export_cert_path
        .as_ref()
        .ok_or_else(|| Error::IncompatibleFlags("--export-cert requires a path".into()))?;
    if export_path.exists() && !op.force_overwrite {
        return Err(Error::OutputExists(export_path.clone()));
    }
    let der = identity.certificate_der().to_vec();
    write_file(export_path, &maybe_armor(der, op.ascii_armor, "CERTIFICATE"))?;
    Ok(Outcome::Exported {
        path: export_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::minimal_pe_image;
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::RsaPrivateKey;
    use std::io::Write as _;

    fn write_fixture_identity(dir: &Path, nickname: &str) {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let key_pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        fs::write(dir.join(format!("{nickname}.key")), key_pem.as_bytes()).unwrap();

        let cert_der = crate::test_support::self_signed_certificate_der(&key);
        let cert_pem = pem::encode(&pem::Pem {
            tag: "CERTIFICATE".to_string(),
            contents: cert_der,
        });
        let mut f = fs::File::create(dir.join(format!("{nickname}.crt"))).unwrap();
        f.write_all(cert_pem.as_bytes()).unwrap();
    }

    fn write_input(dir: &Path) -> PathBuf {
        let path = dir.join("input.efi");
        fs::write(&path, minimal_pe_image()).unwrap();
        path
    }

    fn base_descriptor(in_path: PathBuf) -> OperationDescriptor {
        OperationDescriptor {
            action_mask: ActionMask::empty(),
            signum: 0,
            digest_algorithm: DigestAlgorithm::Sha256,
            signing_nickname: None,
            cert_dir: None,
            in_path,
            out_path: None,
            import_signature_path: None,
            export_signature_path: None,
            import_raw_signature_path: None,
            import_sattrs_path: None,
            export_sattrs_path: None,
            export_pubkey_path: None,
            export_cert_path: None,
            force_overwrite: false,
            ascii_armor: false,
            padding: false,
        }
    }

    #[test]
    fn empty_mask_reports_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = write_input(dir.path());
        let outcome = dispatch(&base_descriptor(in_path)).unwrap();
        assert!(matches!(outcome, Outcome::NothingToDo));
    }

    #[test]
    fn unrecognized_combination_is_incompatible_flags() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = write_input(dir.path());
        let mut op = base_descriptor(in_path);
        op.action_mask = ActionMask::LIST | ActionMask::REMOVE;
        let err = dispatch(&op).unwrap_err();
        assert!(matches!(err, Error::IncompatibleFlags(_)));
    }

    #[test]
    fn in_place_editing_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = write_input(dir.path());
        let mut op = base_descriptor(in_path.clone());
        op.action_mask = ActionMask::SIGN;
        op.out_path = Some(in_path);
        let err = dispatch(&op).unwrap_err();
        assert!(matches!(err, Error::InPlaceUnsupported));
    }

    #[test]
    fn hash_then_sign_then_list_then_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = write_input(dir.path());
        write_fixture_identity(dir.path(), "test-ca");

        let mut hash_op = base_descriptor(in_path.clone());
        hash_op.action_mask = ActionMask::HASH;
        let Outcome::Digest { hex, .. } = dispatch(&hash_op).unwrap() else {
            panic!("expected a digest");
        };
        assert_eq!(hex.len(), 64);

        let signed_path = dir.path().join("signed.efi");
        let mut sign_op = base_descriptor(in_path.clone());
        sign_op.action_mask = ActionMask::SIGN;
        sign_op.out_path = Some(signed_path.clone());
        sign_op.signing_nickname = Some("test-ca".to_string());
        sign_op.cert_dir = Some(dir.path().to_path_buf());
        assert!(matches!(dispatch(&sign_op).unwrap(), Outcome::Signed));

        let mut list_op = base_descriptor(signed_path.clone());
        list_op.action_mask = ActionMask::LIST;
        let Outcome::Listed(sigs) = dispatch(&list_op).unwrap() else {
            panic!("expected a listing");
        };
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].pe_digest_hex, hex);

        let stripped_path = dir.path().join("stripped.efi");
        let mut remove_op = base_descriptor(signed_path);
        remove_op.action_mask = ActionMask::REMOVE;
        remove_op.out_path = Some(stripped_path.clone());
        assert!(matches!(dispatch(&remove_op).unwrap(), Outcome::Removed));

        let mut list_again = base_descriptor(stripped_path);
        list_again.action_mask = ActionMask::LIST;
        let Outcome::Listed(sigs) = dispatch(&list_again).unwrap() else {
            panic!("expected a listing");
        };
        assert!(sigs.is_empty());
    }

    /// `spec.md` §8 scenario 5: `pesign -i signed.efi -e sig.der -u 0`
    /// extracts the existing WIN_CERTIFICATE payload, rather than building a
    /// new signature (that's `--sign --export-signature`, a different mask).
    #[test]
    fn standalone_export_signature_extracts_the_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = write_input(dir.path());
        write_fixture_identity(dir.path(), "test-ca");

        let signed_path = dir.path().join("signed.efi");
        let mut sign_op = base_descriptor(in_path);
        sign_op.action_mask = ActionMask::SIGN;
        sign_op.out_path = Some(signed_path.clone());
        sign_op.signing_nickname = Some("test-ca".to_string());
        sign_op.cert_dir = Some(dir.path().to_path_buf());
        assert!(matches!(dispatch(&sign_op).unwrap(), Outcome::Signed));

        let exported_path = dir.path().join("sig.der");
        let mut export_op = base_descriptor(signed_path.clone());
        export_op.action_mask = ActionMask::EXPORT_SIGNATURE;
        export_op.export_signature_path = Some(exported_path.clone());
        export_op.signum = 0;
        assert!(matches!(
            dispatch(&export_op).unwrap(),
            Outcome::Exported { .. }
        ));

        let exported_der = fs::read(&exported_path).unwrap();
        let table = CertificateTable::parse(&PeImage::open(&signed_path).unwrap()).unwrap();
        assert_eq!(exported_der, table.entries[0].payload);

        let mut bad_index = base_descriptor(signed_path);
        bad_index.action_mask = ActionMask::EXPORT_SIGNATURE;
        bad_index.export_signature_path = Some(dir.path().join("missing.der"));
        bad_index.signum = 1;
        let err = dispatch(&bad_index).unwrap_err();
        assert!(matches!(err, Error::InvalidSignatureNumber { index: 1, .. }));
    }

    #[test]
    fn existing_output_is_refused_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = write_input(dir.path());
        write_fixture_identity(dir.path(), "test-ca");
        let out_path = dir.path().join("out.efi");
        fs::write(&out_path, b"anything").unwrap();

        let mut op = base_descriptor(in_path);
        op.action_mask = ActionMask::SIGN;
        op.out_path = Some(out_path);
        op.signing_nickname = Some("test-ca".to_string());
        op.cert_dir = Some(dir.path().to_path_buf());
        let err = dispatch(&op).unwrap_err();
        assert!(matches!(err, Error::OutputExists(_)));
    }
}
