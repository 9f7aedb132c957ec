// SPDX-License-Identifier: MIT OR Apache-2.0
//! The external command-line front end `spec.md` §1 names as an external
//! collaborator: argument parsing and translation into an
//! [`OperationDescriptor`], then a single call into
//! `pesign_core::dispatcher::dispatch`. Exactly one action per invocation;
//! `spec.md` §6's flag surface is reproduced here one field per flag,
//! matched against `ActionMask` the way `pesign`'s own front end would.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use pesign_core::digest::DigestAlgorithm;
use pesign_core::dispatcher::{self, ActionMask, OperationDescriptor, Outcome};

use crate::output::{self, OutputFormat};

#[derive(Parser, Debug)]
#[command(
    name = "pesign",
    version,
    about = "Sign, verify, inspect, and manipulate Authenticode signatures on PE/COFF binaries"
)]
pub struct Cli {
    /// Input PE file
    #[arg(long = "in", short = 'i', value_name = "PATH")]
    input: Option<PathBuf>,
    /// Output PE file
    #[arg(long = "out", short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Nickname of the signing certificate
    #[arg(long = "certificate", short = 'c', value_name = "NICKNAME")]
    certificate: Option<String>,
    /// Directory to search for the signing certificate/key
    #[arg(long = "certdir", short = 'n', value_name = "DIR")]
    certdir: Option<PathBuf>,

    /// Generate a signature
    #[arg(long = "sign", short = 's')]
    sign: bool,
    /// Print the Authenticode digest of the input file
    #[arg(long = "hash", short = 'h')]
    hash: bool,
    /// Remove a signature
    #[arg(long = "remove-signature", short = 'r')]
    remove_signature: bool,
    /// List the signatures present in the input file
    #[arg(long = "list-signatures", short = 'l')]
    list_signatures: bool,
    /// Show details of one signature
    #[arg(long = "show-signature", short = 'S')]
    show_signature: bool,

    /// Import a complete signature (ContentInfo/SignedData) and embed it
    #[arg(long = "import-signature", short = 'm', value_name = "FILE")]
    import_signature: Option<PathBuf>,
    /// Export the generated signature instead of embedding it
    #[arg(long = "export-signature", short = 'e', value_name = "FILE")]
    export_signature: Option<PathBuf>,

    /// Import a raw RSA signature value computed on another host
    #[arg(long = "import-raw-signature", short = 'R', value_name = "FILE")]
    import_raw_signature: Option<PathBuf>,
    /// Import a previously exported signed-attribute SET OF
    #[arg(long = "import-signed-attributes", short = 'I', value_name = "FILE")]
    import_signed_attributes: Option<PathBuf>,
    /// Export the signed-attribute SET OF for an external signer
    #[arg(long = "export-signed-attributes", short = 'E', value_name = "FILE")]
    export_signed_attributes: Option<PathBuf>,

    /// Export the signing certificate's public key
    #[arg(long = "export-pubkey", short = 'K', value_name = "FILE")]
    export_pubkey: Option<PathBuf>,
    /// Export the signing certificate
    #[arg(long = "export-cert", short = 'C', value_name = "FILE")]
    export_cert: Option<PathBuf>,

    /// Zero-based index of the signature to act on
    #[arg(long = "signature-number", short = 'u', default_value_t = 0, value_name = "N")]
    signature_number: usize,

    /// Digest algorithm: sha1, sha224, sha256, sha384, sha512, or "help"
    #[arg(long = "digest_type", short = 'd', default_value = "sha256", value_name = "NAME")]
    digest_type: String,

    /// Overwrite an existing output file
    #[arg(long = "force", short = 'f')]
    force: bool,
    /// PEM-encode exported signatures/certificates/keys
    #[arg(long = "ascii-armor", short = 'a')]
    ascii_armor: bool,
    /// Zero-pad truncated section data to FileAlignment when hashing
    #[arg(long = "padding", short = 'P')]
    padding: bool,
    /// Increase logging verbosity (repeatable); overridden entirely by
    /// `RUST_LOG` if set
    #[arg(long = "verbose", short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
    /// Run as a daemon accepting IPC requests (not implemented by this
    /// build — `spec.md` §1 names the daemon mode as an external
    /// collaborator)
    #[arg(long = "daemonize", short = 'D')]
    daemonize: bool,
    /// Do not fork when daemonizing
    #[arg(long = "nofork", short = 'N')]
    nofork: bool,

    /// Output format for `--list-signatures`/`--show-signature`/`--hash`
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Builds the `ActionMask` `spec.md` §4.G matches against its fixed
    /// table of legal combinations, one bit per flag that was actually
    /// given — no flag implies another; `--sign --export-signature` and
    /// `--export-signature` alone are different masks, and only the first
    /// is recognized.
    fn action_mask(&self) -> ActionMask {
        let mut mask = ActionMask::empty();
        mask.set(ActionMask::HASH, self.hash);
        mask.set(ActionMask::SIGN, self.sign);
        mask.set(ActionMask::REMOVE, self.remove_signature);
        mask.set(ActionMask::LIST, self.list_signatures);
        mask.set(ActionMask::SHOW, self.show_signature);
        mask.set(ActionMask::IMPORT_SIGNATURE, self.import_signature.is_some());
        mask.set(ActionMask::EXPORT_SIGNATURE, self.export_signature.is_some());
        mask.set(
            ActionMask::IMPORT_RAW_SIGNATURE,
            self.import_raw_signature.is_some(),
        );
        mask.set(
            ActionMask::IMPORT_SATTRS,
            self.import_signed_attributes.is_some(),
        );
        mask.set(
            ActionMask::EXPORT_SATTRS,
            self.export_signed_attributes.is_some(),
        );
        mask.set(ActionMask::EXPORT_PUBKEY, self.export_pubkey.is_some());
        mask.set(ActionMask::EXPORT_CERT, self.export_cert.is_some());
        mask.set(ActionMask::DAEMONIZE, self.daemonize);
        mask
    }

    pub fn run(self) -> Result<()> {
        if self.digest_type.eq_ignore_ascii_case("help") {
            output::print_digest_help();
            return Ok(());
        }
        if self.nofork && !self.daemonize {
            bail!("--nofork only applies together with --daemonize");
        }

        let digest_algorithm =
            DigestAlgorithm::parse(&self.digest_type).map_err(anyhow::Error::new)?;
        let in_path = self
            .input
            .clone()
            .context("--in/-i is required for this action")?;

        let op = OperationDescriptor {
            action_mask: self.action_mask(),
            signum: self.signature_number,
            digest_algorithm,
            signing_nickname: self.certificate.clone(),
            cert_dir: self.certdir.clone(),
            in_path,
            out_path: self.output.clone(),
            import_signature_path: self.import_signature.clone(),
            export_signature_path: self.export_signature.clone(),
            import_raw_signature_path: self.import_raw_signature.clone(),
            import_sattrs_path: self.import_signed_attributes.clone(),
            export_sattrs_path: self.export_signed_attributes.clone(),
            export_pubkey_path: self.export_pubkey.clone(),
            export_cert_path: self.export_cert.clone(),
            force_overwrite: self.force,
            ascii_armor: self.ascii_armor,
            padding: self.padding,
        };

        match dispatcher::dispatch(&op)? {
            Outcome::NothingToDo => {
                eprintln!("pesign: nothing to do");
                Ok(())
            }
            Outcome::DaemonizeUnsupported => {
                bail!("daemon mode is not implemented in this build")
            }
            other => output::print(other, self.format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::CommandFactory;

    #[test]
    fn cli_ok() {
        Cli::command().debug_assert();
    }
}
