//! flagship
//!
//! Operator CLI for provisioning Unleash instances.

use clap::Parser;
use flagship::Cli;
use flagship_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.global.log_json,
        default_filter: None,
    })?;

    cli.run().await?;
    Ok(())
}
