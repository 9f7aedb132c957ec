// SPDX-License-Identifier: MIT OR Apache-2.0
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Cli;

/// Mirrors `lowell-cli::tracing_init::init` exactly: honor `RUST_LOG`
/// entirely if set, otherwise derive a filter from `-v`/`--verbose` and
/// quiet `goblin`'s own debug churn (`spec.md` §11.1).
pub fn init(cli: &Cli) -> Result<()> {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(cli.log_level()).add_directive("goblin=warn".parse().unwrap())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}
