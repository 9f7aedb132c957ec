//! Signing Identity Provider (`spec.md` §4.F): resolves a nickname to a
//! certificate and private key, and produces raw PKCS#1v1.5 signatures over
//! caller-supplied bytes.
//!
//! Real credential storage (NSS-style `cert8.db`/`key3.db` databases) is an
//! external collaborator per `spec.md` §1 — out of scope here. The default
//! implementation instead reads a `<nickname>.crt`/`<nickname>.key` PEM pair
//! from a directory, the same shape `other_examples` signing tools
//! (`TrustEdge-Labs-trustedge`, `galihlasahido-rust-pdf`) load their test
//! keys from.

use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use rand::rngs::OsRng;
use rasn_cms::IssuerAndSerialNumber;
use rasn_pkix::Certificate;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use tracing::debug;

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

/// `find(nickname) -> identity` plus the per-identity operations `spec.md`
/// §4.F names: `sign`, `certificate`, `public_key`.
pub trait SigningIdentity {
    fn certificate_der(&self) -> &[u8];
    fn public_key_der(&self) -> Result<Vec<u8>>;
    fn issuer_and_serial(&self) -> Result<IssuerAndSerialNumber>;
    /// Hashes `message` with `digest_algorithm` and signs the digest with
    /// PKCS#1v1.5 padding.
    fn sign(&self, digest_algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>>;
}

/// The default directory `pesign` searches for signing identities: the
/// `PESIGN_CERT_DIR` environment variable if set, else a fixed system path.
pub fn default_cert_dir() -> PathBuf {
    std::env::var_os("PESIGN_CERT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/pki/pesign"))
}

/// A resolved signing identity backed by a PEM certificate and RSA key pair.
pub struct FileSystemIdentity {
    nickname: String,
    certificate: Certificate,
    certificate_der: Vec<u8>,
    private_key: RsaPrivateKey,
}

impl FileSystemIdentity {
    fn load(dir: &Path, nickname: &str) -> Result<Self> {
        let cert_path = dir.join(format!("{nickname}.crt"));
        let key_path = dir.join(format!("{nickname}.key"));

        let cert_pem = fs::read_to_string(&cert_path).map_err(|_| Error::CertificateNotFound {
            nickname: nickname.to_string(),
            certdir: dir.to_path_buf(),
        })?;
        let pem_block = pem::parse(cert_pem.as_bytes()).map_err(|_| Error::CertificateNotFound {
            nickname: nickname.to_string(),
            certdir: dir.to_path_buf(),
        })?;
        let certificate_der = pem_block.into_contents();
        let certificate: Certificate = rasn::der::decode(&certificate_der).map_err(|e| {
            Error::CertificateNotFound {
                nickname: format!("{nickname} (malformed certificate: {e})"),
                certdir: dir.to_path_buf(),
            }
        })?;

        let key_pem = fs::read_to_string(&key_path).map_err(|e| {
            Error::PrivateKeyUnavailable {
                nickname: nickname.to_string(),
                reason: e.to_string(),
            }
        })?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&key_pem))
            .map_err(|e| Error::PrivateKeyUnavailable {
                nickname: nickname.to_string(),
                reason: e.to_string(),
            })?;

        debug!(nickname, certdir = %dir.display(), "resolved signing identity");
        Ok(Self {
            nickname: nickname.to_string(),
            certificate,
            certificate_der,
            private_key,
        })
    }
}

impl SigningIdentity for FileSystemIdentity {
    fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    fn public_key_der(&self) -> Result<Vec<u8>> {
        rasn::der::encode(&self.certificate.tbs_certificate.subject_public_key_info)
            .map_err(|e| Error::SigningFailed(format!("failed to encode public key: {e}")))
    }

    fn issuer_and_serial(&self) -> Result<IssuerAndSerialNumber> {
        Ok(IssuerAndSerialNumber {
            issuer: self.certificate.tbs_certificate.issuer.clone(),
            serial_number: self.certificate.tbs_certificate.serial_number.clone(),
        })
    }

    fn sign(&self, digest_algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        let hashed = digest_algorithm.digest_chunks(std::iter::once(message));
        let mut rng = OsRng;
        let sig_err = |e: rsa::Error| Error::SigningFailed(format!("{} signing nickname {:?}: {e}", digest_algorithm.name(), self.nickname));
        match digest_algorithm {
            DigestAlgorithm::Sha1 => self
                .private_key
                .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha1>(), &hashed)
                .map_err(sig_err),
            DigestAlgorithm::Sha224 => self
                .private_key
                .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha224>(), &hashed)
                .map_err(sig_err),
            DigestAlgorithm::Sha256 => self
                .private_key
                .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha256>(), &hashed)
                .map_err(sig_err),
            DigestAlgorithm::Sha384 => self
                .private_key
                .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha384>(), &hashed)
                .map_err(sig_err),
            DigestAlgorithm::Sha512 => self
                .private_key
                .sign_with_rng(&mut rng, Pkcs1v15Sign::new::<Sha512>(), &hashed)
                .map_err(sig_err),
        }
    }
}

/// Directory-backed identity store: one `.crt`/`.key` PEM pair per nickname.
pub struct FileSystemIdentityStore {
    dir: PathBuf,
}

impl FileSystemIdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn find(&self, nickname: &str) -> Result<FileSystemIdentity> {
        match FileSystemIdentity::load(&self.dir, nickname) {
            Ok(identity) => Ok(identity),
            Err(_) if self.probe_cert_db() => FileSystemIdentity::load(&self.dir, nickname),
            Err(err) => Err(err),
        }
    }

    /// `spec.md` §7: "missing credential store is retried with a glob-based
    /// probe for `cert*.db` under the configured directory before failing."
    fn probe_cert_db(&self) -> bool {
        let pattern = self.dir.join("cert*.db");
        match glob(&pattern.to_string_lossy()) {
            Ok(mut matches) => matches.next().is_some(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn probe_cert_db_finds_glob_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemIdentityStore::new(dir.path());
        assert!(!store.probe_cert_db());
        fs::write(dir.path().join("cert9.db"), b"").unwrap();
        assert!(store.probe_cert_db());
    }

    #[test]
    fn missing_nickname_reports_certificate_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemIdentityStore::new(dir.path());
        let err = store.find("no-such-identity").unwrap_err();
        assert!(matches!(err, Error::CertificateNotFound { .. }));
    }
}
