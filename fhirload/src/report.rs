use std::{collections::BTreeMap, fmt, future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{aggregate::Counters, error::Result};

/// Which tool produced a report. Decides the wording of the text form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Upload,
    Probe,
    Query,
}

/// The processed form of a run's [`Counters`].
///
/// Pure data: everything a reporter prints is derived here, reporters only format
/// and write it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub kind: ReportKind,
    pub elapsed: Duration,
    pub total: u64,
    pub succeeded: u64,
    pub rejected: u64,
    pub errored: u64,
    pub skipped: u64,
    /// Mean latency over dispatched calls, zero when nothing was dispatched.
    pub average_latency: Duration,
    pub status_codes: BTreeMap<u16, u64>,
}

impl RunReport {
    pub fn new(kind: ReportKind, counters: &Counters, elapsed: Duration) -> Self {
        let average_latency = match u32::try_from(counters.dispatched) {
            Ok(0) => Duration::ZERO,
            Ok(n) => counters.total_latency / n,
            Err(_) => counters
                .total_latency
                .div_f64(counters.dispatched as f64),
        };
        Self {
            kind,
            elapsed,
            total: counters.total(),
            succeeded: counters.succeeded,
            rejected: counters.rejected,
            errored: counters.errored,
            skipped: counters.skipped,
            average_latency,
            status_codes: counters.status_codes.clone(),
        }
    }

    pub fn failed(&self) -> u64 {
        self.rejected + self.errored
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Completed in {:?}: {} processed, {} succeeded, {} failed",
            self.elapsed,
            self.total,
            self.succeeded,
            self.failed()
        )?;
        match self.kind {
            ReportKind::Upload => {
                write!(
                    f,
                    "Successfully uploaded {} resources with {} errors",
                    self.succeeded,
                    self.failed()
                )?;
            }
            ReportKind::Probe => {
                write!(
                    f,
                    "The server rejected {} out of {} resources as expected.",
                    self.rejected, self.total
                )?;
                for (code, count) in &self.status_codes {
                    write!(f, "\nStatus code {code}: {count} times")?;
                }
            }
            ReportKind::Query => {
                write!(
                    f,
                    "Total requests sent: {}, total errors: {}",
                    self.total - self.skipped,
                    self.failed()
                )?;
            }
        }
        if self.skipped > 0 {
            write!(f, "\n{} items were not dispatched", self.skipped)?;
        }
        write!(f, "\nAverage latency: {:?}", self.average_latency)
    }
}

/// Consumes a [`RunReport`] and sends it somewhere.
pub trait Reporter {
    fn report(&self, report: &RunReport) -> impl Future<Output = Result<()>>;
}

/// Prints the human-readable text to stdout.
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<()> {
        println!("{report}");
        Ok(())
    }
}

/// Prints the report as one pretty JSON document to stdout.
pub struct JsonReporter;

impl Reporter for JsonReporter {
    async fn report(&self, report: &RunReport) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}
