//! Per-file drivers for the upload and probe tools.
//!
//! Both walk their files one after another, run each file as its own batch and
//! sum the counters. They differ in what a bad file does to the run: uploads log
//! it and move on, probes stop at it.

use std::{path::PathBuf, sync::Arc};

use crate::{
    aggregate::Counters,
    batch::Batch,
    error::{Error, Result},
    executor::{Executor, FailurePolicy},
    invoker::Invoker,
    task,
};

/// Uploads every file as one batch and returns the summed counters.
///
/// A file that cannot be read, or whose name yields no resource type, is logged
/// and skipped. Only an executor error (e.g. an invalid ceiling) ends the run.
pub async fn upload_files<I, E>(files: &[PathBuf], invoker: Arc<I>, executor: &E) -> Result<Counters>
where
    I: Invoker + 'static,
    E: Executor,
{
    let mut totals = Counters::new();
    for file in files {
        let Some(resource_type) = task::resource_type_from_path(file) else {
            tracing::error!("Cannot derive a resource type from {}, skipping", file.display());
            continue;
        };
        let ndjson = match tokio::fs::read_to_string(file).await {
            Ok(ndjson) => ndjson,
            Err(e) => {
                tracing::error!("Failed to read file {}: {e}", file.display());
                continue;
            }
        };

        let items = task::upload_items(&resource_type, &ndjson);
        tracing::info!("{}: {} resources to upload", file.display(), items.len());
        let counters = Batch::builder()
            .name(resource_type)
            .items(items)
            .invoker(invoker.clone())
            .build()
            .run(executor)
            .await
            .map_err(|e| Error::file(file, e))?;
        totals.merge(counters);
    }
    Ok(totals)
}

/// Probes every file as one batch under [`FailurePolicy::Abort`].
///
/// The first file that cannot be read, has no resource type, or escalates a
/// failure ends the run with [`Error::File`] naming it. Later files are never
/// touched.
pub async fn probe_files<I, E>(files: &[PathBuf], invoker: Arc<I>, executor: &E) -> Result<Counters>
where
    I: Invoker + 'static,
    E: Executor,
{
    let mut totals = Counters::new();
    for file in files {
        let resource_type = task::resource_type_from_path(file).ok_or_else(|| {
            Error::file(
                file,
                Error::InvalidConfig("cannot derive a resource type from the file name".into()),
            )
        })?;
        let ndjson = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| Error::file(file, Error::io(file, e)))?;

        let counters = Batch::builder()
            .name(resource_type.as_str())
            .items(task::probe_items(&resource_type, &ndjson))
            .invoker(invoker.clone())
            .policy(FailurePolicy::Abort)
            .build()
            .run(executor)
            .await
            .map_err(|e| Error::file(file, e))?;
        tracing::info!(
            "{}: {} of {} rejected",
            file.display(),
            counters.rejected,
            counters.total()
        );
        totals.merge(counters);
    }
    Ok(totals)
}
