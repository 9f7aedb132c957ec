//! Typed error kinds shared by every component.
//!
//! Each variant corresponds to one of the error kinds in the Authenticode
//! signing specification's error-handling design: callers map these to a
//! single-line diagnostic and a process exit code of 1, but never need to
//! inspect anything beyond the variant and its message to do so.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed PE image: {0}")]
    MalformedImage(String),

    #[error("malformed certificate table: {0}")]
    MalformedCertTable(String),

    #[error("malformed CMS SignedData: {0}")]
    MalformedCms(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported CMS content type: {0}")]
    UnsupportedContentType(String),

    #[error("certificate not found for nickname {nickname:?} in {certdir:?}")]
    CertificateNotFound { nickname: String, certdir: PathBuf },

    #[error("private key unavailable for nickname {nickname:?}: {reason}")]
    PrivateKeyUnavailable { nickname: String, reason: String },

    #[error("signing operation failed: {0}")]
    SigningFailed(String),

    #[error("signature number {index} out of range (have {count})")]
    InvalidSignatureNumber { index: usize, count: usize },

    #[error("incompatible flags: {0}")]
    IncompatibleFlags(String),

    #[error("in-place file editing is not supported (--in and --out refer to the same path)")]
    InPlaceUnsupported,

    #[error("output file {0:?} already exists (use --force to overwrite)")]
    OutputExists(PathBuf),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
