//! Digest algorithms recognized for Authenticode signing and the Digest Set
//! data model (`spec.md` §3): one `(algorithm_oid, digest_bytes)` pair per
//! supported algorithm, plus a `selected` marker for the active one.

use rasn::types::ObjectIdentifier;
use rasn_pkix::AlgorithmIdentifier;
use sha1::Sha1;
use sha2::{Digest as _, Sha224, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};

/// One of the five digest algorithms `pesign` recognizes via `--digest_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Parses the `--digest_type`/`-d` argument value.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// The full list, in the order `--digest_type help` prints them.
    pub const ALL: [DigestAlgorithm; 5] = [
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    pub fn output_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Digests `chunks` in order with this algorithm.
    pub fn digest_chunks<'a>(self, chunks: impl Iterator<Item = &'a [u8]>) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                let mut h = Sha1::new();
                chunks.for_each(|c| h.update(c));
                h.finalize().to_vec()
            }
            Self::Sha224 => {
                let mut h = Sha224::new();
                chunks.for_each(|c| h.update(c));
                h.finalize().to_vec()
            }
            Self::Sha256 => {
                let mut h = Sha256::new();
                chunks.for_each(|c| h.update(c));
                h.finalize().to_vec()
            }
            Self::Sha384 => {
                let mut h = Sha384::new();
                chunks.for_each(|c| h.update(c));
                h.finalize().to_vec()
            }
            Self::Sha512 => {
                let mut h = Sha512::new();
                chunks.for_each(|c| h.update(c));
                h.finalize().to_vec()
            }
        }
    }

    /// The `digestAlgorithm` OID per RFC 3279 / NIST.
    pub fn oid(self) -> ObjectIdentifier {
        let arcs: &[u32] = match self {
            Self::Sha1 => &[1, 3, 14, 3, 2, 26],
            Self::Sha224 => &[2, 16, 840, 1, 101, 3, 4, 2, 4],
            Self::Sha256 => &[2, 16, 840, 1, 101, 3, 4, 2, 1],
            Self::Sha384 => &[2, 16, 840, 1, 101, 3, 4, 2, 2],
            Self::Sha512 => &[2, 16, 840, 1, 101, 3, 4, 2, 3],
        };
        ObjectIdentifier::new(arcs.to_vec()).expect("static digest OID arcs are valid")
    }

    pub fn algorithm_identifier(self) -> AlgorithmIdentifier {
        AlgorithmIdentifier {
            algorithm: self.oid(),
            parameters: None,
        }
    }

    /// Recovers the algorithm from a decoded OID, e.g. when parsing an
    /// imported CMS SignedData.
    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.oid() == *oid)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("{oid}")))
    }
}

/// One entry of the Digest Set: an algorithm and its computed digest.
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub algorithm: DigestAlgorithm,
    pub digest: Vec<u8>,
}

impl DigestEntry {
    pub fn hex(&self) -> String {
        hex::encode(&self.digest)
    }
}
