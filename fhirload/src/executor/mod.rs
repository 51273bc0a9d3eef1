//! Executor: bounded-concurrency dispatch of a [`Batch`].
//!
//! An `Executor` takes every [`WorkItem`] of a batch, hands each one to the batch's
//! [`Invoker`] exactly once, and records every [`Outcome`] in the batch's
//! [`Aggregator`]. Two strategies share that contract:
//!
//! - [`FanOutExecutor`]: one short-lived task per item, each holding a ticket from a
//!   semaphore sized to the ceiling. Used by the upload and probe tools.
//! - [`QueueExecutor`]: a fixed set of long-lived workers draining one shared,
//!   closable queue, each optionally owning an output partition. Used by the
//!   query replay tool.
//!
//! # Guarantees
//! - No more than the configured ceiling of invocations are in flight at any time.
//! - Every item produces exactly one recorded outcome, or is counted as skipped
//!   when the batch was cancelled before it could be dispatched. Hence
//!   `succeeded + failed + skipped == items` once `exec` returns.
//! - `exec` returns only after every dispatched item has been recorded; the
//!   returned [`Counters`] are a snapshot taken after that join barrier.
//!
//! # Failure policy
//! Under [`FailurePolicy::Continue`] a failed item never affects its siblings.
//! Under [`FailurePolicy::Abort`] the first [`Outcome::Failure`] cancels the batch:
//! items in flight complete and are recorded, nothing new is dispatched, and `exec`
//! returns [`Error::Escalated`]. Client rejections never cancel anything.
//!
//! # Panics
//! An invoker that panics is caught at the dispatch boundary and recorded as
//! [`FailureReason::Panicked`]; its ticket is released like any other.
pub mod fan_out;
pub mod queue;

pub use fan_out::FanOutExecutor;
pub use queue::QueueExecutor;

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    aggregate::{Aggregator, Counters},
    batch::Batch,
    error::{Error, Result},
    invoker::Invoker,
    outcome::{FailureReason, Invocation, Outcome},
    task::WorkItem,
};

/// What a batch does when an item fails for a reason other than a client rejection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and keep going.
    #[default]
    Continue,
    /// Record the failure and stop dispatching.
    Abort,
}

/// Runs a [`Batch`] to completion.
pub trait Executor: Send + Sync {
    /// Dispatch every item and return the final counters.
    fn exec<I: Invoker + 'static>(
        &self,
        batch: Batch<I>,
    ) -> impl Future<Output = Result<Counters>> + Send;
}

/// State shared by every task of one batch.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub aggregator: Aggregator,
    policy: FailurePolicy,
    cancel: Arc<watch::Sender<bool>>,
    escalation: Arc<Mutex<Option<(usize, FailureReason)>>>,
}

impl ExecutionContext {
    pub fn new(aggregator: Aggregator, policy: FailurePolicy) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            aggregator,
            policy,
            cancel: Arc::new(cancel),
            escalation: Arc::new(Mutex::new(None)),
        }
    }

    /// A receiver that flips to `true` once the batch is cancelled.
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Records the invocation and applies the failure policy.
    pub fn settle(&self, invocation: &Invocation) {
        self.aggregator
            .record(&invocation.outcome, invocation.latency);

        match &invocation.outcome {
            Outcome::Success(_) => {}
            Outcome::ClientRejected(code) => {
                tracing::debug!("Item {} rejected with {code}", invocation.index);
            }
            Outcome::Failure(reason) => {
                tracing::warn!("Item {} failed: {reason}", invocation.index);
                if self.policy == FailurePolicy::Abort {
                    self.escalation
                        .lock()
                        .get_or_insert_with(|| (invocation.index, reason.clone()));
                    self.cancel.send_replace(true);
                }
            }
        }
    }

    /// Final counters, or the escalation that cancelled the batch.
    pub fn finish(self, batch: &str) -> Result<Counters> {
        let counters = self.aggregator.snapshot();
        match self.escalation.lock().take() {
            Some((index, reason)) => Err(Error::Escalated {
                batch: batch.to_owned(),
                index,
                reason,
            }),
            None => Ok(counters),
        }
    }
}

/// Invokes one item and settles its outcome. A panicking invoker becomes a failure.
pub(crate) async fn dispatch<I: Invoker>(
    ctx: &ExecutionContext,
    invoker: &I,
    item: &WorkItem,
) -> Invocation {
    let invocation = match AssertUnwindSafe(invoker.invoke(item)).catch_unwind().await {
        Ok(invocation) => invocation,
        Err(_) => {
            tracing::error!("Invoker panicked on item {}", item.index);
            Invocation::new(
                item.index,
                Outcome::Failure(FailureReason::Panicked),
                Duration::ZERO,
            )
        }
    };
    ctx.settle(&invocation);
    invocation
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use parking_lot::Mutex;

    use crate::{
        invoker::Invoker,
        outcome::{FailureReason, Invocation, Outcome},
        task::{Target, WorkItem},
    };

    /// Invoker that tracks how many calls overlap and which items it saw.
    #[derive(Default)]
    pub struct Instrumented {
        pub delay: Duration,
        /// Scripted outcomes by item index; anything else succeeds with 201.
        pub script: HashMap<usize, Outcome>,
        /// Item indices whose invocation panics.
        pub panics_on: Vec<usize>,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
        pub seen: Mutex<Vec<usize>>,
    }

    impl Instrumented {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        /// Indices in the order their invocation started.
        pub fn seen(&self) -> Vec<usize> {
            self.seen.lock().clone()
        }
    }

    impl Invoker for Instrumented {
        async fn invoke(&self, item: &WorkItem) -> Invocation {
            self.seen.lock().push(item.index);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panics_on.contains(&item.index) {
                panic!("scripted panic on item {}", item.index);
            }
            let outcome = self
                .script
                .get(&item.index)
                .cloned()
                .unwrap_or(Outcome::Success(201));
            Invocation::new(item.index, outcome, self.delay)
        }
    }

    pub fn uploads(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|index| WorkItem {
                index,
                target: Target::Upload {
                    resource_type: "Patient".into(),
                    id: format!("p{index}"),
                },
                payload: Some(format!(r#"{{"resourceType":"Patient","id":"p{index}"}}"#)),
            })
            .collect()
    }

    pub fn server_error() -> Outcome {
        Outcome::Failure(FailureReason::Status(500))
    }
}
