use std::{path::PathBuf, sync::Arc, time::Instant};

use clap::Parser;
use fhirload::{
    FanOutExecutor, HttpInvoker,
    cli::{self, CommonArgs},
    files,
    report::{ReportKind, RunReport},
};

/// Upload NDJSON resources with PUT, one file after another.
#[derive(Parser, Debug)]
#[command(name = "push-data", version)]
struct Cli {
    /// Base URL of the FHIR server
    #[arg(long, env = "FHIR_SERVER_URL")]
    server_url: String,

    /// Bearer token for authorization
    #[arg(long, env = "FHIR_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Comma-separated list of NDJSON files to upload
    #[arg(long, env = "FHIRLOAD_FILES", value_delimiter = ',', required = true)]
    files: Vec<PathBuf>,

    /// Number of concurrent requests within a single file
    #[arg(long, env = "FHIRLOAD_THREADS", default_value_t = 2, value_parser = cli::concurrency())]
    threads: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_tracing();
    let cli = Cli::parse();

    let invoker = Arc::new(HttpInvoker::new(
        cli.common
            .invoker_config(&cli.server_url, cli.bearer_token.clone()),
    )?);
    let executor = FanOutExecutor::builder().ceiling(cli.threads).build();

    let start = Instant::now();
    let totals = files::upload_files(&cli.files, invoker, &executor).await?;

    let report = RunReport::new(ReportKind::Upload, &totals, start.elapsed());
    cli.common.emit(&report).await?;
    Ok(())
}
