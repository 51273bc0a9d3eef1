//! Task Source: turns raw records into [`WorkItem`]s.
//!
//! The builders here are pure: they take already-read text and never touch the
//! network. Malformed records are logged and skipped, they never abort a batch.
//! The whole sequence is materialized before dispatch, which bounds the input
//! size by available memory.

use std::{path::Path, sync::Arc};

use rand::{Rng, seq::SliceRandom};
use reqwest::Method;
use serde::Deserialize;

use crate::{
    config::QuerySpec,
    error::{Error, Result},
};

/// Placeholder replaced by the identifier in query templates.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Where a [`WorkItem`] goes and how it gets there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// `PUT {base}/{resource_type}/{id}`
    Upload { resource_type: String, id: String },
    /// `POST {base}/{resource_type}`, never authenticated.
    Probe { resource_type: String },
    /// `GET {base}{path}`, with the identifier already substituted in `path`.
    Query { name: Arc<str>, path: String },
}

impl Target {
    pub fn method(&self) -> Method {
        match self {
            Self::Upload { .. } => Method::PUT,
            Self::Probe { .. } => Method::POST,
            Self::Query { .. } => Method::GET,
        }
    }

    /// Joins the base URL and the target's path. A trailing `/` on the base is ignored.
    pub fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::Upload { resource_type, id } => format!("{base}/{resource_type}/{id}"),
            Self::Probe { resource_type } => format!("{base}/{resource_type}"),
            Self::Query { path, .. } => format!("{base}{path}"),
        }
    }

    pub fn sends_auth(&self) -> bool {
        !matches!(self, Self::Probe { .. })
    }

    /// Whether the response body should be kept for the output sink.
    pub fn keeps_body(&self) -> bool {
        matches!(self, Self::Query { .. })
    }
}

/// One unit of dispatchable work. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// Position in task-source order. Survives shuffling.
    pub index: usize,
    pub target: Target,
    pub payload: Option<String>,
}

/// The only part of a FHIR resource the uploader needs.
#[derive(Deserialize)]
struct ResourceHeader {
    id: Option<String>,
}

/// File name up to its first `.`: `data/Patient.ndjson` gives `Patient`.
///
/// Every extension is dropped, not only the last one, so
/// `Condition.invalid.ndjson` gives `Condition` rather than `Condition.invalid`.
pub fn resource_type_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('.').next()?;
    (!stem.is_empty()).then(|| stem.to_owned())
}

/// One upload item per NDJSON line, paired with the `id` found in that same line.
///
/// Blank lines are ignored. Lines that are not JSON, or that carry no `id`, are
/// logged and skipped.
pub fn upload_items(resource_type: &str, ndjson: &str) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for (line_no, line) in ndjson.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let id = match serde_json::from_str::<ResourceHeader>(line) {
            Ok(ResourceHeader { id: Some(id) }) if !id.is_empty() => id,
            Ok(_) => {
                tracing::warn!("{resource_type} line {}: resource has no id, skipping", line_no + 1);
                continue;
            }
            Err(e) => {
                tracing::warn!("{resource_type} line {}: malformed JSON ({e}), skipping", line_no + 1);
                continue;
            }
        };
        items.push(WorkItem {
            index: items.len(),
            target: Target::Upload {
                resource_type: resource_type.to_owned(),
                id,
            },
            payload: Some(line.to_owned()),
        });
    }
    items
}

/// One probe item per non-blank line. Lines are sent as-is: they are expected to
/// be invalid, so nothing is parsed.
pub fn probe_items(resource_type: &str, ndjson: &str) -> Vec<WorkItem> {
    ndjson
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| WorkItem {
            index,
            target: Target::Probe {
                resource_type: resource_type.to_owned(),
            },
            payload: Some(line.to_owned()),
        })
        .collect()
}

/// Identifiers of a pool file: one per line, trimmed, blank lines dropped.
pub fn parse_id_pool(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

pub async fn load_id_pool(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    Ok(parse_id_pool(&content))
}

/// One query item per (query, identifier) pair, in query order then pool order.
pub fn query_items<'a, I>(pools: I) -> Vec<WorkItem>
where
    I: IntoIterator<Item = (&'a QuerySpec, Vec<String>)>,
{
    let mut items = Vec::new();
    for (query, ids) in pools {
        let name: Arc<str> = Arc::from(query.name.as_str());
        for id in ids {
            items.push(WorkItem {
                index: items.len(),
                target: Target::Query {
                    name: name.clone(),
                    path: query.query_code.replace(ID_PLACEHOLDER, &id),
                },
                payload: None,
            });
        }
    }
    items
}

/// Loads the identifier pool of every query and builds the replay items.
///
/// A query whose pool cannot be read is logged and left out.
pub async fn load_query_items(queries: &[QuerySpec]) -> Vec<WorkItem> {
    let mut pools = Vec::with_capacity(queries.len());
    for query in queries {
        match load_id_pool(&query.id_pool_file).await {
            Ok(ids) => {
                tracing::info!("Loaded {} identifiers for query {}", ids.len(), query.name);
                pools.push((query, ids));
            }
            Err(e) => tracing::error!("Skipping query {}: {e}", query.name),
        }
    }
    query_items(pools)
}

/// Uniform random permutation with a fresh seed.
pub fn shuffle(items: &mut [WorkItem]) {
    shuffle_with(items, &mut rand::thread_rng());
}

pub fn shuffle_with<R: Rng + ?Sized>(items: &mut [WorkItem], rng: &mut R) {
    items.shuffle(rng);
}
