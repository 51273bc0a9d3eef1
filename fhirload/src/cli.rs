//! Plumbing shared by the three binaries: common flags, logging setup and
//! report output.

use std::time::Duration;

use clap::{Args, ValueEnum, builder::RangedU64ValueParser};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::InvokerConfig,
    error::Result,
    report::{JsonReporter, Reporter, RunReport, StdoutReporter},
};

/// Upper bound accepted for `--threads`.
pub const MAX_CONCURRENCY: u64 = 65_536;

/// Parser for `--threads`: rejects 0 and anything above [`MAX_CONCURRENCY`].
pub fn concurrency() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..=MAX_CONCURRENCY)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Flags every tool accepts.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Per-request timeout in seconds
    #[arg(long, env = "FHIRLOAD_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Final report format
    #[arg(long, env = "FHIRLOAD_REPORT", value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

impl CommonArgs {
    pub fn invoker_config(&self, base_url: &str, bearer_token: Option<String>) -> InvokerConfig {
        InvokerConfig::builder()
            .base_url(base_url)
            .bearer_token(bearer_token.filter(|token| !token.is_empty()))
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
    }

    pub async fn emit(&self, report: &RunReport) -> Result<()> {
        match self.report {
            ReportFormat::Text => StdoutReporter.report(report).await,
            ReportFormat::Json => JsonReporter.report(report).await,
        }
    }
}

/// Logs go to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
