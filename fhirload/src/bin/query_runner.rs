use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use clap::Parser;
use fhirload::{
    Batch, HttpInvoker, QueueExecutor,
    cli::{self, CommonArgs},
    config,
    report::{ReportKind, RunReport},
    task,
};

/// Replay configured queries against a FHIR server in random order.
#[derive(Parser, Debug)]
#[command(name = "query-runner", version)]
struct Cli {
    /// Path to the YAML query configuration
    #[arg(long, env = "FHIRLOAD_CONFIG", default_value = "queries.yaml")]
    config: PathBuf,

    /// Number of concurrent workers
    #[arg(long, env = "FHIRLOAD_THREADS", default_value_t = 10, value_parser = cli::concurrency())]
    threads: usize,

    /// Base URL of the FHIR server
    #[arg(long, env = "FHIR_SERVER_URL", default_value = "http://localhost:8080/fhir")]
    server_url: String,

    /// Bearer token for authorization
    #[arg(long, env = "FHIR_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Directory receiving one NDJSON file per worker
    #[arg(long, env = "FHIRLOAD_OUTPUT_DIR", default_value = "./query-output")]
    output_dir: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_tracing();
    let cli = Cli::parse();
    let start = Instant::now();

    let queries = config::load_queries(&cli.config)
        .await
        .context("Error reading YAML configuration")?;
    let mut items = task::load_query_items(&queries).await;
    task::shuffle(&mut items);
    tracing::info!("{} requests queued from {} queries", items.len(), queries.len());

    let invoker = Arc::new(HttpInvoker::new(
        cli.common
            .invoker_config(&cli.server_url, cli.bearer_token.clone()),
    )?);
    let executor = QueueExecutor::builder()
        .workers(cli.threads)
        .output_dir(cli.output_dir.clone())
        .build();

    let counters = Batch::builder()
        .name("query replay")
        .items(items)
        .invoker(invoker)
        .build()
        .run(&executor)
        .await
        .with_context(|| format!("replaying queries into {}", cli.output_dir.display()))?;

    let report = RunReport::new(ReportKind::Query, &counters, start.elapsed());
    cli.common.emit(&report).await?;
    Ok(())
}
