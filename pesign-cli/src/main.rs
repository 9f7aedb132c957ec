// SPDX-License-Identifier: MIT OR Apache-2.0
use std::process::ExitCode;

mod cli;
mod output;
mod tracing_init;

use cli::Cli;

/// `spec.md` §9's exit-on-error design note: the dispatcher surfaces typed
/// errors and never exits a process itself; this is the one place that
/// maps `Ok`/`Err` to a process exit code (0/1, per `spec.md` §6).
fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = tracing_init::init(&cli) {
        eprintln!("pesign: {e}");
        return ExitCode::FAILURE;
    }
    match cli.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pesign: {e}");
            ExitCode::FAILURE
        }
    }
}
