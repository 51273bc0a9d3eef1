//! fhirload: bulk-data load tools for FHIR servers.
//!
//! Three tools share this library: `push-data` uploads NDJSON resources,
//! `push-invalid-data` checks that a server rejects invalid resources, and
//! `query-runner` replays randomized queries. They differ in what they send and how
//! they read the answers, but all of them push a large, finite set of independent
//! requests through a bounded pool and count what came back.
//!
//! # Architecture
//!
//! - [`task`]: the Task Source. Turns NDJSON lines or identifier pools into
//!   [`WorkItem`]s, one per request, and shuffles them for replay.
//! - [`Invoker`]: performs one call per item and classifies it as an [`Outcome`].
//!   [`HttpInvoker`] is the `reqwest` implementation.
//! - [`Executor`]: dispatches a [`Batch`] of items under a hard concurrency ceiling
//!   and waits for all of them. [`FanOutExecutor`] gates one task per item with a
//!   semaphore, [`QueueExecutor`] runs persistent workers over a shared queue.
//! - [`Aggregator`]: lock-protected [`Counters`] shared by every worker.
//! - [`sink`]: per-worker output files for response bodies.
//! - [`files`]: runs one batch per NDJSON file and sums the counters.
//! - [`report`]: turns final counters into a [`RunReport`] and prints it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fhirload::{Batch, HttpInvoker, InvokerConfig, QueueExecutor, task};
//!
//! #[tokio::main]
//! async fn main() -> fhirload::Result<()> {
//!     let queries = fhirload::config::load_queries("queries.yaml".as_ref()).await?;
//!     let mut items = task::load_query_items(&queries).await;
//!     task::shuffle(&mut items);
//!
//!     let invoker = HttpInvoker::new(
//!         InvokerConfig::builder()
//!             .base_url("http://localhost:8080/fhir")
//!             .build(),
//!     )?;
//!     let counters = Batch::builder()
//!         .name("replay")
//!         .items(items)
//!         .invoker(Arc::new(invoker))
//!         .build()
//!         .run(
//!             &QueueExecutor::builder()
//!                 .workers(10)
//!                 .output_dir("query-output")
//!                 .build(),
//!         )
//!         .await?;
//!
//!     println!("{} requests, {} errors", counters.dispatched, counters.failed());
//!     Ok(())
//! }
//! ```

/// Shared outcome counters
pub mod aggregate;
/// A batch of work and the pieces needed to run it
pub mod batch;
/// Flags, logging and report output shared by the binaries
pub mod cli;
/// Configuration types and loaders
pub mod config;
/// Error type
pub mod error;
/// Bounded-concurrency execution strategies
pub mod executor;
/// One batch per input file, for the upload and probe tools
pub mod files;
/// HTTP invocation of single work items
pub mod invoker;
/// Outcome classification
pub mod outcome;
/// Final reports and reporters
pub mod report;
/// Per-worker output partitions
pub mod sink;
/// Work item sources
pub mod task;

pub use aggregate::{Aggregator, Counters};
pub use batch::Batch;
pub use config::InvokerConfig;
pub use error::{Error, Result};
pub use executor::{Executor, FailurePolicy, FanOutExecutor, QueueExecutor};
pub use invoker::{HttpInvoker, Invoker};
pub use outcome::{FailureReason, Invocation, Outcome};
pub use report::{Reporter, RunReport};
pub use task::{Target, WorkItem};
