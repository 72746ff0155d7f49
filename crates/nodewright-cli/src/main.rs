//! nodewright CLI
//!
//! Runs the trust bundle, mirror and bootstrap engines against local files or
//! a live cluster.

use clap::Parser;

use nodewright_cli::{Cli, Result};
use nodewright_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format.parse()?,
        default_filter: None,
    })?;

    cli.run().await
}
