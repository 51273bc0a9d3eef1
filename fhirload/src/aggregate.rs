use std::{collections::BTreeMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::outcome::Outcome;

/// Outcome counters for one batch (or, once merged, for a whole run).
///
/// `Counters` only stores raw, mergeable data: counts, a per-status tally and the
/// summed latency. Derived values such as the average latency belong to
/// [`crate::report::RunReport`].
///
/// Every dispatched item lands in exactly one of `succeeded`, `rejected` or
/// `errored`, so `dispatched == succeeded + rejected + errored`. Items that were
/// never dispatched because their batch was cancelled are counted in `skipped`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub dispatched: u64,
    pub succeeded: u64,
    pub rejected: u64,
    pub errored: u64,
    pub skipped: u64,
    pub total_latency: Duration,
    /// Occurrences of every HTTP status received.
    pub status_codes: BTreeMap<u16, u64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incorporate a single outcome.
    pub fn consume(&mut self, outcome: &Outcome, latency: Duration) {
        self.dispatched += 1;
        self.total_latency += latency;
        match outcome {
            Outcome::Success(_) => self.succeeded += 1,
            Outcome::ClientRejected(_) => self.rejected += 1,
            Outcome::Failure(_) => self.errored += 1,
        }
        if let Some(code) = outcome.status() {
            *self.status_codes.entry(code).or_default() += 1;
        }
    }

    /// Combine two counter sets. Associative and commutative.
    pub fn merge(&mut self, other: Self) {
        self.dispatched += other.dispatched;
        self.succeeded += other.succeeded;
        self.rejected += other.rejected;
        self.errored += other.errored;
        self.skipped += other.skipped;
        self.total_latency += other.total_latency;
        for (code, count) in other.status_codes {
            *self.status_codes.entry(code).or_default() += count;
        }
    }

    /// Client rejections plus every other failure.
    pub fn failed(&self) -> u64 {
        self.rejected + self.errored
    }

    /// Every item of the batch, dispatched or not.
    pub fn total(&self) -> u64 {
        self.dispatched + self.skipped
    }
}

/// Counter set shared by every worker of a batch.
///
/// Cloning is cheap and yields a handle to the same counters. [`Aggregator::record`]
/// holds the lock only for the increment, so it is safe to call from any number of
/// workers at once and never blocks across a network call.
#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    inner: Arc<Mutex<Counters>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome, latency: Duration) {
        self.inner.lock().consume(outcome, latency);
    }

    /// Account for items that will never be dispatched.
    pub fn skip(&self, count: u64) {
        if count > 0 {
            self.inner.lock().skipped += count;
        }
    }

    /// A copy of the counters as they are right now.
    ///
    /// Only meaningful as a final result once the executor has returned.
    pub fn snapshot(&self) -> Counters {
        self.inner.lock().clone()
    }
}
