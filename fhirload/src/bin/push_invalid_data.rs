use std::{path::PathBuf, sync::Arc, time::Instant};

use clap::Parser;
use fhirload::{
    FanOutExecutor, HttpInvoker,
    cli::{self, CommonArgs},
    files,
    report::{ReportKind, RunReport},
};

/// POST invalid resources and check that the server rejects them with a 4xx.
///
/// Any other failure (5xx, unreachable server) means the server or the setup is
/// broken: the run stops at the offending file without a report.
#[derive(Parser, Debug)]
#[command(name = "push-invalid-data", version)]
struct Cli {
    /// Base URL of the FHIR server
    #[arg(long, env = "FHIR_SERVER_URL")]
    server_url: String,

    /// Comma-separated list of NDJSON files to process,
    /// e.g. invalid-data/Condition.ndjson,invalid-data/Encounter.ndjson
    #[arg(long, env = "FHIRLOAD_FILES", value_delimiter = ',', required = true)]
    files: Vec<PathBuf>,

    /// Number of concurrent requests within a single file
    #[arg(long, env = "FHIRLOAD_THREADS", default_value_t = 1, value_parser = cli::concurrency())]
    threads: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_tracing();
    let cli = Cli::parse();

    // Probes are never authenticated.
    let invoker = Arc::new(HttpInvoker::new(
        cli.common.invoker_config(&cli.server_url, None),
    )?);
    let executor = FanOutExecutor::builder().ceiling(cli.threads).build();

    let start = Instant::now();
    let totals = files::probe_files(&cli.files, invoker, &executor).await?;

    let report = RunReport::new(ReportKind::Probe, &totals, start.elapsed());
    cli.common.emit(&report).await?;
    Ok(())
}
