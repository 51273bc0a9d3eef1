use std::{path::PathBuf, sync::Arc};

use async_channel::Receiver;
use futures::future::join_all;
use tokio::task::JoinHandle;
use typed_builder::TypedBuilder;

use super::{ExecutionContext, Executor, dispatch};
use crate::{
    aggregate::Counters,
    batch::Batch,
    error::{Error, Result},
    invoker::Invoker,
    sink::{OutputPartition, create_partitions},
    task::WorkItem,
};

/// Persistent worker pool draining one shared queue.
///
/// `workers` long-lived tasks are spawned up front. The producer enqueues every
/// item in batch order and then closes the queue; closing means "no more work",
/// so workers keep draining until the queue is both closed and empty. Workers
/// block on the queue, they never poll.
///
/// When `output_dir` is set, worker `i` owns `{output_dir}/worker_{i}_output.ndjson`
/// and appends the body of every successful response to it. Partitions are
/// created before any worker starts: failing to create one aborts the run.
#[derive(Clone, Debug, TypedBuilder)]
pub struct QueueExecutor {
    #[builder(default = 10)]
    pub workers: usize,
    #[builder(default, setter(strip_option, into))]
    pub output_dir: Option<PathBuf>,
}

impl Executor for QueueExecutor {
    async fn exec<I: Invoker + 'static>(&self, batch: Batch<I>) -> Result<Counters> {
        let Batch {
            name,
            items,
            invoker,
            aggregator,
            policy,
        } = batch;
        if self.workers == 0 {
            return Err(Error::InvalidConfig(
                "worker pool needs at least 1 worker".into(),
            ));
        }

        let partitions: Vec<Option<OutputPartition>> = match &self.output_dir {
            Some(dir) => create_partitions(dir, self.workers)
                .await?
                .into_iter()
                .map(Some)
                .collect(),
            None => (0..self.workers).map(|_| None).collect(),
        };

        let ctx = ExecutionContext::new(aggregator, policy);
        let (queue, jobs) = async_channel::unbounded::<WorkItem>();

        tracing::info!("Spawning {} workers for {name}...", self.workers);
        let handles = spawn_workers(&ctx, invoker, &jobs, partitions);

        tracing::info!("Enqueuing {} items...", items.len());
        for item in items {
            // Unbounded and `jobs` is still alive, so this cannot fail.
            if queue.send(item).await.is_err() {
                break;
            }
        }
        queue.close();

        for (worker, result) in join_all(handles).await.into_iter().enumerate() {
            match result {
                Ok(Ok(records)) => tracing::debug!("Worker {worker} wrote {records} records"),
                Ok(Err(e)) => tracing::error!("Worker {worker}: {e}"),
                Err(e) => tracing::error!("Worker {worker} died: {e}"),
            }
        }

        // Left over after cancellation, or if every worker died.
        let mut remaining = 0;
        while jobs.try_recv().is_ok() {
            remaining += 1;
        }
        if remaining > 0 {
            tracing::warn!("{name}: {remaining} items not dispatched");
            ctx.aggregator.skip(remaining);
        }

        let result = ctx.finish(&name);
        if let Ok(counters) = &result {
            tracing::info!(
                "Done with {name}: {} requests, {} failed",
                counters.dispatched,
                counters.failed()
            );
        }
        result
    }
}

/// Spawns one worker per partition slot.
fn spawn_workers<I: Invoker + 'static>(
    ctx: &ExecutionContext,
    invoker: Arc<I>,
    jobs: &Receiver<WorkItem>,
    partitions: Vec<Option<OutputPartition>>,
) -> Vec<JoinHandle<Result<u64>>> {
    partitions
        .into_iter()
        .enumerate()
        .map(|(worker, partition)| {
            tokio::spawn(worker_task(
                worker,
                ctx.clone(),
                invoker.clone(),
                jobs.clone(),
                partition,
            ))
        })
        .collect()
}

/// Drains `jobs` until it is closed and empty, or the batch is cancelled.
/// Returns how many records went to the worker's partition.
async fn worker_task<I: Invoker>(
    worker: usize,
    ctx: ExecutionContext,
    invoker: Arc<I>,
    jobs: Receiver<WorkItem>,
    mut partition: Option<OutputPartition>,
) -> Result<u64> {
    tracing::debug!("Worker {worker} started.");
    let mut cancelled = ctx.cancelled();

    loop {
        let item = tokio::select! {
            biased;
            _ = cancelled.wait_for(|c| *c) => break,
            item = jobs.recv() => match item {
                Ok(item) => item,
                Err(_) => break,
            },
        };

        let invocation = dispatch(&ctx, invoker.as_ref(), &item).await;
        if let (Some(partition), Some(body)) = (partition.as_mut(), invocation.body.as_deref()) {
            // The outcome is already recorded; a lost body is only logged.
            if let Err(e) = partition.append(body).await {
                tracing::warn!("Worker {worker}: {e}");
            }
        }
    }

    tracing::debug!("Worker {worker} shutting down.");
    match partition {
        Some(partition) => partition.finish().await,
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, time::Duration};

    use wiremock::{Mock, MockServer, Request, ResponseTemplate, matchers::method};

    use super::*;
    use crate::{
        aggregate::Aggregator,
        config::{InvokerConfig, QuerySpec},
        executor::{
            FailurePolicy,
            testing::{Instrumented, server_error, uploads},
        },
        invoker::HttpInvoker,
        sink::partition_file_name,
        task::{query_items, shuffle},
    };

    fn pool(workers: usize) -> QueueExecutor {
        QueueExecutor::builder().workers(workers).build()
    }

    #[tokio::test]
    async fn empty_queue_returns_zeroed_counters() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Batch::builder()
            .name("empty")
            .items(vec![])
            .invoker(Arc::new(Instrumented::default()))
            .build()
            .run(
                &QueueExecutor::builder()
                    .workers(3)
                    .output_dir(dir.path())
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(counters, Counters::default());
        for worker in 0..3 {
            let content = std::fs::read_to_string(dir.path().join(partition_file_name(worker)));
            assert_eq!(content.unwrap(), "");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_item_is_recorded_once_and_pool_size_holds() {
        for workers in [1, 3, 10] {
            let k = 60;
            let mut invoker = Instrumented::with_delay(Duration::from_millis(1));
            invoker.script.insert(7, server_error());
            let invoker = Arc::new(invoker);
            let counters = Batch::builder()
                .name("queries")
                .items(uploads(k))
                .invoker(invoker.clone())
                .build()
                .run(&pool(workers))
                .await
                .unwrap();

            assert_eq!(counters.succeeded, (k - 1) as u64);
            assert_eq!(counters.failed(), 1);
            assert!(invoker.peak() <= workers);

            let seen = invoker.seen();
            let unique: HashSet<_> = seen.iter().copied().collect();
            assert_eq!(seen.len(), k);
            assert_eq!(unique.len(), k);
        }
    }

    #[tokio::test]
    async fn single_worker_dispatches_in_queue_order() {
        let mut items = uploads(25);
        shuffle(&mut items);
        let expected: Vec<_> = items.iter().map(|item| item.index).collect();

        let invoker = Arc::new(Instrumented::default());
        Batch::builder()
            .name("ordered")
            .items(items)
            .invoker(invoker.clone())
            .build()
            .run(&pool(1))
            .await
            .unwrap();
        assert_eq!(invoker.seen(), expected);
    }

    #[tokio::test]
    async fn panicking_item_does_not_kill_the_worker() {
        let invoker = Instrumented {
            panics_on: vec![2],
            ..Instrumented::default()
        };
        let counters = Batch::builder()
            .name("queries")
            .items(uploads(8))
            .invoker(Arc::new(invoker))
            .build()
            .run(&pool(1))
            .await
            .unwrap();
        assert_eq!(counters.succeeded, 7);
        assert_eq!(counters.errored, 1);
    }

    #[tokio::test]
    async fn abort_policy_counts_undispatched_items_as_skipped() {
        let mut invoker = Instrumented::default();
        invoker.script.insert(3, server_error());
        let aggregator = Aggregator::new();
        let err = Batch::builder()
            .name("queries")
            .items(uploads(10))
            .invoker(Arc::new(invoker))
            .aggregator(aggregator.clone())
            .policy(FailurePolicy::Abort)
            .build()
            .run(&pool(1))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Escalated { index: 3, .. }));
        let counters = aggregator.snapshot();
        assert_eq!(counters.dispatched, 4);
        assert_eq!(counters.skipped, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn abort_with_several_workers_settles_in_flight_items() {
        let mut invoker = Instrumented::with_delay(Duration::from_millis(20));
        invoker.script.insert(5, server_error());
        let invoker = Arc::new(invoker);
        let aggregator = Aggregator::new();
        let err = Batch::builder()
            .name("queries")
            .items(uploads(40))
            .invoker(invoker.clone())
            .aggregator(aggregator.clone())
            .policy(FailurePolicy::Abort)
            .build()
            .run(&pool(4))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Escalated { index: 5, .. }));
        let counters = aggregator.snapshot();
        assert_eq!(counters.dispatched, invoker.seen().len() as u64);
        assert_eq!(counters.succeeded + counters.failed() + counters.skipped, 40);
        assert_eq!(counters.errored, 1);
        assert!(counters.skipped > 0);
        assert!(invoker.peak() <= 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn successful_bodies_land_in_worker_partitions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(|req: &Request| {
                if req.url.path().ends_with("/missing") {
                    ResponseTemplate::new(404)
                } else {
                    ResponseTemplate::new(200)
                        .set_body_string(format!(r#"{{"path":"{}"}}"#, req.url.path()))
                }
            })
            .mount(&server)
            .await;

        let query = QuerySpec {
            name: "patient".into(),
            query_code: "/Patient/{id}".into(),
            id_pool_file: PathBuf::from("unused"),
        };
        let mut ids: Vec<String> = (0..20).map(|i| format!("p{i}")).collect();
        ids.push("missing".into());
        let mut items = query_items([(&query, ids)]);
        shuffle(&mut items);

        let dir = tempfile::tempdir().unwrap();
        let invoker = HttpInvoker::new(InvokerConfig::builder().base_url(server.uri()).build())
            .unwrap();
        let counters = Batch::builder()
            .name("replay")
            .items(items)
            .invoker(Arc::new(invoker))
            .build()
            .run(
                &QueueExecutor::builder()
                    .workers(4)
                    .output_dir(dir.path())
                    .build(),
            )
            .await
            .unwrap();

        assert_eq!(counters.succeeded, 20);
        assert_eq!(counters.rejected, 1);

        let mut lines = Vec::new();
        for worker in 0..4 {
            let content =
                std::fs::read_to_string(dir.path().join(partition_file_name(worker))).unwrap();
            lines.extend(content.lines().map(str::to_owned));
        }
        lines.sort();
        let mut expected: Vec<_> = (0..20)
            .map(|i| format!(r#"{{"path":"/Patient/p{i}"}}"#))
            .collect();
        expected.sort();
        assert_eq!(lines, expected);
    }
}
