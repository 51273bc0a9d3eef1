use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{
    aggregate::{Aggregator, Counters},
    error::Result,
    executor::{Executor, FailurePolicy},
    invoker::Invoker,
    task::WorkItem,
};

/// Everything an [`Executor`] needs to run one batch: the items, the invoker
/// that executes them and the aggregator that counts the outcomes.
///
/// ```rust,no_run
/// # async fn demo() -> fhirload::Result<()> {
/// use std::sync::Arc;
/// use fhirload::{Batch, FanOutExecutor, HttpInvoker, InvokerConfig, task};
///
/// let invoker = HttpInvoker::new(InvokerConfig::builder().base_url("http://localhost:8080/fhir").build())?;
/// let counters = Batch::builder()
///     .name("Patient")
///     .items(task::upload_items("Patient", r#"{"id":"p1"}"#))
///     .invoker(Arc::new(invoker))
///     .build()
///     .run(&FanOutExecutor::builder().ceiling(2).build())
///     .await?;
/// println!("{} uploaded", counters.succeeded);
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct Batch<I: Invoker> {
    #[builder(setter(into))]
    pub name: String,
    pub items: Vec<WorkItem>,
    pub invoker: Arc<I>,
    /// Pass a clone of an existing aggregator to observe the counters even when
    /// the batch ends in an error.
    #[builder(default)]
    pub aggregator: Aggregator,
    #[builder(default)]
    pub policy: FailurePolicy,
}

impl<I: Invoker + 'static> Batch<I> {
    pub async fn run<E: Executor>(self, executor: &E) -> Result<Counters> {
        executor.exec(self).await
    }
}
