// SPDX-License-Identifier: MIT OR Apache-2.0
//! Renders a dispatcher [`Outcome`] to stdout, the way
//! `lowell-cli::cli::inspect::uki::print_human` renders a `Report` — plain
//! text by default, or the `serde`-derived JSON form `--format json` asks
//! for, mirroring that module's own `Output::Human`/`Output::Json` split.

use std::io::{self, Write};

use anyhow::Result;
use clap::ValueEnum;
use pesign_core::digest::DigestAlgorithm;
use pesign_core::dispatcher::{Outcome, SignatureSummary};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

/// `--digest_type help`: `spec.md` §6 says this "prints the list and exits
/// 0".
pub fn print_digest_help() {
    println!("supported digest algorithms:");
    for algo in DigestAlgorithm::ALL {
        println!("  {}", algo.name());
    }
}

/// Renders every [`Outcome`] except [`Outcome::NothingToDo`] and
/// [`Outcome::DaemonizeUnsupported`], which the caller handles itself
/// (the former isn't an error, the latter is).
pub fn print(outcome: Outcome, format: OutputFormat) -> Result<()> {
    let mut out = io::BufWriter::new(io::stdout());
    match (outcome, format) {
        // `spec.md` §8 scenario 1: `pesign -i unsigned.efi -d sha256 -h`
        // "prints `hash: ab…\n`" — unconditionally, even under
        // `--format json`, since the scenario pins this exact line.
        (Outcome::Digest { hex, .. }, _) => writeln!(out, "hash: {hex}")?,
        (Outcome::Signed, _) | (Outcome::Removed, _) => {}
        (Outcome::Exported { path }, _) => writeln!(out, "wrote {}", path.display())?,
        (Outcome::Listed(summaries), OutputFormat::Human) => print_list(&mut out, &summaries)?,
        (Outcome::Listed(summaries), OutputFormat::Json) => {
            serde_json::to_writer(&mut out, &summaries)?;
            writeln!(out)?;
        }
        (Outcome::Shown(summary), OutputFormat::Human) => print_detail(&mut out, &summary)?,
        (Outcome::Shown(summary), OutputFormat::Json) => {
            serde_json::to_writer(&mut out, &summary)?;
            writeln!(out)?;
        }
        (Outcome::NothingToDo, _) | (Outcome::DaemonizeUnsupported, _) => {
            unreachable!("handled by the caller before reaching print()")
        }
    }
    out.flush()?;
    Ok(())
}

fn print_list(out: &mut impl Write, summaries: &[SignatureSummary]) -> Result<()> {
    if summaries.is_empty() {
        writeln!(out, "no signatures")?;
        return Ok(());
    }
    for s in summaries {
        writeln!(
            out,
            "signature #{index}: {alg} digest {digest}, {bytes} bytes, signer {signer}",
            index = s.index,
            alg = s.digest_algorithm,
            digest = s.pe_digest_hex,
            bytes = s.length,
            signer = s.signer,
        )?;
    }
    Ok(())
}

fn print_detail(out: &mut impl Write, s: &SignatureSummary) -> Result<()> {
    writeln!(out, "signature #{}", s.index)?;
    writeln!(out, "  revision         : {}", s.revision)?;
    writeln!(out, "  certificate type : {}", s.certificate_type)?;
    writeln!(out, "  digest algorithm : {}", s.digest_algorithm)?;
    writeln!(out, "  message digest   : {}", s.pe_digest_hex)?;
    writeln!(out, "  length           : {} bytes", s.length)?;
    writeln!(out, "  signer           : {}", s.signer)?;
    Ok(())
}
