use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::workloads::WorkloadsConfig;

mod logging;
mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Run the full tracing machinery, discarding its output.
    #[arg(long)]
    tracing: bool,

    /// Report cache metrics to a local statsd sink.
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let workloads_file =
        std::fs::File::open(cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let guard = logging::init(logging::Config {
        tracing: cli.tracing,
        metrics: cli.metrics,
    });
    if let Some(udp_sink) = guard.udp_sink {
        tokio::spawn(udp_sink);
    }

    stresstest::perform_stresstest(workloads, guard.statsd, cli.duration).await
}
