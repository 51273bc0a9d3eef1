use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use typed_builder::TypedBuilder;

use super::{ExecutionContext, Executor, dispatch};
use crate::{
    aggregate::Counters,
    batch::Batch,
    error::{Error, Result},
    invoker::Invoker,
};

/// Semaphore-gated fan-out: one task per item, at most `ceiling` of them invoking
/// at once.
///
/// Items are admitted in batch order. A ticket (semaphore permit) is acquired
/// before the task is spawned and moves into it, so the ticket is released when
/// the task ends whatever the outcome. Waiting for a ticket is the only place the
/// dispatch loop suspends; cancellation interrupts that wait.
#[derive(Clone, Debug, TypedBuilder)]
pub struct FanOutExecutor {
    /// Maximum number of concurrent invocations.
    #[builder(default = 2)]
    pub ceiling: usize,
}

impl Executor for FanOutExecutor {
    async fn exec<I: Invoker + 'static>(&self, batch: Batch<I>) -> Result<Counters> {
        let Batch {
            name,
            items,
            invoker,
            aggregator,
            policy,
        } = batch;
        if self.ceiling == 0 || self.ceiling > Semaphore::MAX_PERMITS {
            return Err(Error::InvalidConfig(format!(
                "concurrency ceiling must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                self.ceiling
            )));
        }

        let ctx = ExecutionContext::new(aggregator, policy);
        let tickets = Arc::new(Semaphore::new(self.ceiling));
        let mut cancelled = ctx.cancelled();
        let total = items.len();
        tracing::info!(
            "Dispatching {total} items of {name} with {} concurrent slots",
            self.ceiling
        );

        let mut handles = Vec::with_capacity(total);
        for (position, item) in items.into_iter().enumerate() {
            let ticket = tokio::select! {
                biased;
                _ = cancelled.wait_for(|c| *c) => None,
                ticket = tickets.clone().acquire_owned() => ticket.ok(),
            };
            let Some(ticket) = ticket else {
                let remaining = total - position;
                tracing::warn!("{name} cancelled, {remaining} items not dispatched");
                ctx.aggregator.skip(remaining as u64);
                break;
            };

            let ctx = ctx.clone();
            let invoker = invoker.clone();
            handles.push(tokio::spawn(async move {
                dispatch(&ctx, invoker.as_ref(), &item).await;
                drop(ticket);
            }));
        }

        // Join barrier: every spawned item has settled once this returns.
        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Dispatch task of {name} failed: {e}");
            }
        }

        let result = ctx.finish(&name);
        if let Ok(counters) = &result {
            tracing::info!(
                "Done with {name}: {} succeeded, {} failed",
                counters.succeeded,
                counters.failed()
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, path_regex},
    };

    use super::*;
    use crate::{
        aggregate::Aggregator,
        config::InvokerConfig,
        executor::{
            FailurePolicy,
            testing::{Instrumented, server_error, uploads},
        },
        invoker::HttpInvoker,
        outcome::{FailureReason, Outcome},
        task::probe_items,
    };

    fn executor(ceiling: usize) -> FanOutExecutor {
        FanOutExecutor::builder().ceiling(ceiling).build()
    }

    #[tokio::test]
    async fn empty_batch_returns_zeroed_counters() {
        let counters = Batch::builder()
            .name("empty")
            .items(vec![])
            .invoker(Arc::new(Instrumented::default()))
            .build()
            .run(&executor(2))
            .await
            .unwrap();
        assert_eq!(counters, Counters::default());
    }

    #[tokio::test]
    async fn out_of_range_ceilings_are_rejected() {
        for ceiling in [0, Semaphore::MAX_PERMITS + 1, usize::MAX] {
            let invoker = Arc::new(Instrumented::default());
            let err = Batch::builder()
                .name("p")
                .items(uploads(3))
                .invoker(invoker.clone())
                .build()
                .run(&executor(ceiling))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "ceiling {ceiling}");
            assert!(invoker.seen().is_empty());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_item_is_recorded_once_and_ceiling_holds() {
        for ceiling in [1, 2, 7] {
            for k in [1, 5, 40] {
                let invoker = Arc::new(Instrumented::with_delay(Duration::from_millis(2)));
                let counters = Batch::builder()
                    .name("Patient")
                    .items(uploads(k))
                    .invoker(invoker.clone())
                    .build()
                    .run(&executor(ceiling))
                    .await
                    .unwrap();

                assert_eq!(counters.succeeded + counters.failed(), k as u64);
                assert!(invoker.peak() <= ceiling, "peak {} > {ceiling}", invoker.peak());

                let seen = invoker.seen();
                let unique: HashSet<_> = seen.iter().copied().collect();
                assert_eq!(seen.len(), k);
                assert_eq!(unique, (0..k).collect::<HashSet<_>>());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saturates_the_ceiling_under_load() {
        let invoker = Arc::new(Instrumented::with_delay(Duration::from_millis(20)));
        Batch::builder()
            .name("Patient")
            .items(uploads(30))
            .invoker(invoker.clone())
            .build()
            .run(&executor(3))
            .await
            .unwrap();
        assert_eq!(invoker.peak(), 3);
    }

    #[tokio::test]
    async fn failures_do_not_cancel_siblings() {
        let mut invoker = Instrumented::default();
        invoker.script.insert(1, server_error());
        invoker.script.insert(2, Outcome::ClientRejected(409));
        let counters = Batch::builder()
            .name("Patient")
            .items(uploads(6))
            .invoker(Arc::new(invoker))
            .build()
            .run(&executor(2))
            .await
            .unwrap();
        assert_eq!(counters.succeeded, 4);
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.errored, 1);
        assert_eq!(counters.skipped, 0);
    }

    #[tokio::test]
    async fn panicking_invoker_is_counted_and_releases_its_ticket() {
        let invoker = Instrumented {
            panics_on: vec![0, 3],
            ..Instrumented::default()
        };
        let counters = Batch::builder()
            .name("Patient")
            .items(uploads(5))
            .invoker(Arc::new(invoker))
            .build()
            .run(&executor(1))
            .await
            .unwrap();
        assert_eq!(counters.succeeded, 3);
        assert_eq!(counters.errored, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn abort_with_several_slots_settles_in_flight_items() {
        let mut invoker = Instrumented::with_delay(Duration::from_millis(20));
        invoker.script.insert(4, server_error());
        let invoker = Arc::new(invoker);
        let aggregator = Aggregator::new();
        let err = Batch::builder()
            .name("Condition")
            .items(uploads(30))
            .invoker(invoker.clone())
            .aggregator(aggregator.clone())
            .policy(FailurePolicy::Abort)
            .build()
            .run(&executor(3))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Escalated { index: 4, .. }));
        let counters = aggregator.snapshot();
        // Everything that started was recorded, the rest was skipped.
        assert_eq!(counters.dispatched, invoker.seen().len() as u64);
        assert_eq!(counters.succeeded + counters.failed() + counters.skipped, 30);
        assert_eq!(counters.errored, 1);
        assert!(counters.skipped > 0);
        assert!(invoker.peak() <= 3);
        assert_eq!(invoker.in_flight.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn end_to_end_upload_with_one_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/Patient/p3"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path_regex(r"^/Patient/p\d+$"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(30)))
            .mount(&server)
            .await;

        let invoker = HttpInvoker::new(InvokerConfig::builder().base_url(server.uri()).build())
            .unwrap();
        let counters = Batch::builder()
            .name("Patient")
            .items(uploads(5))
            .invoker(Arc::new(invoker))
            .build()
            .run(&executor(2))
            .await
            .unwrap();

        assert_eq!(counters.succeeded, 4);
        assert_eq!(counters.failed(), 1);
        assert_eq!(counters.status_codes[&500], 1);
        // The barrier only lifted after every request reached the server.
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn probe_rejections_are_tallied_not_escalated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Condition"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let invoker = HttpInvoker::new(InvokerConfig::builder().base_url(server.uri()).build())
            .unwrap();
        let counters = Batch::builder()
            .name("Condition")
            .items(probe_items("Condition", "{}\n{\"x\":1}\n[]\n"))
            .invoker(Arc::new(invoker))
            .policy(FailurePolicy::Abort)
            .build()
            .run(&executor(1))
            .await
            .unwrap();

        assert_eq!(counters.rejected, 3);
        assert_eq!(counters.status_codes[&422], 3);
    }

    #[tokio::test]
    async fn probe_server_error_aborts_the_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::body_string("boom"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let aggregator = Aggregator::new();
        let invoker = HttpInvoker::new(InvokerConfig::builder().base_url(server.uri()).build())
            .unwrap();
        let err = Batch::builder()
            .name("Condition")
            .items(probe_items("Condition", "a\nboom\nc\nd\ne\n"))
            .invoker(Arc::new(invoker))
            .aggregator(aggregator.clone())
            .policy(FailurePolicy::Abort)
            .build()
            .run(&executor(1))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Escalated {
                index: 1,
                reason: FailureReason::Status(500),
                ..
            }
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        let counters = aggregator.snapshot();
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.errored, 1);
        assert_eq!(counters.skipped, 3);
        assert_eq!(counters.total(), 5);
    }
}
