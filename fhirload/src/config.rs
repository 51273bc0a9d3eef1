use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// Per-call timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared settings for every call made by an [`crate::HttpInvoker`].
#[derive(Clone, Debug, TypedBuilder)]
pub struct InvokerConfig {
    /// Server base URL, e.g. `http://localhost:8080/fhir`.
    #[builder(setter(into))]
    pub base_url: String,
    /// Sent as `Authorization: Bearer {token}` when present.
    #[builder(default, setter(into))]
    pub bearer_token: Option<String>,
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,
}

/// A named replay query, as listed in the query-runner YAML file.
///
/// ```yaml
/// - name: patient-by-id
///   query_code: /Patient/{id}
///   id_pool_file: ids/patients.txt
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    /// Path and query string appended to the base URL; `{id}` is substituted.
    pub query_code: String,
    pub id_pool_file: PathBuf,
}

/// Parses a query configuration. Relative pool paths are resolved against `base_dir`.
pub fn parse_queries(yaml: &str, base_dir: &Path) -> Result<Vec<QuerySpec>> {
    let mut queries: Vec<QuerySpec> = serde_yaml::from_str(yaml)?;
    for query in &mut queries {
        if query.name.is_empty() {
            return Err(Error::InvalidConfig("query without a name".into()));
        }
        if query.id_pool_file.is_relative() {
            query.id_pool_file = base_dir.join(&query.id_pool_file);
        }
    }
    Ok(queries)
}

pub async fn load_queries(path: &Path) -> Result<Vec<QuerySpec>> {
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(path, e))?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    parse_queries(&yaml, base_dir)
}
