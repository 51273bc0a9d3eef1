use std::{future::Future, time::Instant};

use reqwest::{
    Client, RequestBuilder, Url,
    header::{AUTHORIZATION, CONTENT_TYPE},
};

use crate::{
    config::InvokerConfig,
    error::Result,
    outcome::{FailureReason, Invocation, Outcome},
    task::WorkItem,
};

/// Content type of every payload sent to the server.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Performs exactly one call per [`WorkItem`] and classifies the result.
///
/// Invokers never fail: request construction errors and transport errors are
/// folded into [`Outcome::Failure`], so an executor can always account for the item.
///
/// # Example
/// ```rust
/// use fhirload::{Invocation, Invoker, Outcome, WorkItem};
/// use std::time::Duration;
///
/// struct AlwaysCreated;
///
/// impl Invoker for AlwaysCreated {
///     async fn invoke(&self, item: &WorkItem) -> Invocation {
///         Invocation::new(item.index, Outcome::Success(201), Duration::ZERO)
///     }
/// }
/// ```
pub trait Invoker: Send + Sync {
    fn invoke(&self, item: &WorkItem) -> impl Future<Output = Invocation> + Send;
}

/// [`Invoker`] backed by a shared `reqwest` client.
///
/// Build it once per run: the client holds the connection pool.
#[derive(Clone, Debug)]
pub struct HttpInvoker {
    client: Client,
    config: InvokerConfig,
}

impl HttpInvoker {
    pub fn new(config: InvokerConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    fn request(&self, item: &WorkItem) -> std::result::Result<RequestBuilder, FailureReason> {
        let raw = item.target.url(&self.config.base_url);
        let url = Url::parse(&raw)
            .map_err(|e| FailureReason::InvalidRequest(format!("{raw}: {e}")))?;

        let mut request = self.client.request(item.target.method(), url);
        if let Some(payload) = &item.payload {
            request = request
                .header(CONTENT_TYPE, FHIR_JSON)
                .body(payload.clone());
        }
        if let Some(token) = &self.config.bearer_token {
            if item.target.sends_auth() {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
        }
        Ok(request)
    }

    async fn call(&self, item: &WorkItem) -> (Outcome, Option<bytes::Bytes>) {
        let request = match self.request(item) {
            Ok(request) => request,
            Err(reason) => return (Outcome::Failure(reason), None),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return (
                    Outcome::Failure(FailureReason::InvalidRequest(e.to_string())),
                    None,
                );
            }
            Err(e) => return (Outcome::Failure(FailureReason::Transport(e.to_string())), None),
        };

        let outcome = Outcome::classify(response.status().as_u16());
        if !outcome.is_success() {
            tracing::debug!("{} answered {}", response.url(), response.status());
            return (outcome, None);
        }
        if !item.target.keeps_body() {
            return (outcome, None);
        }
        match response.bytes().await {
            Ok(body) => (outcome, Some(body)),
            Err(e) => (
                Outcome::Failure(FailureReason::Transport(format!("reading body: {e}"))),
                None,
            ),
        }
    }
}

impl Invoker for HttpInvoker {
    async fn invoke(&self, item: &WorkItem) -> Invocation {
        let start = Instant::now();
        let (outcome, body) = self.call(item).await;
        let invocation = Invocation::new(item.index, outcome, start.elapsed());
        match body {
            Some(body) => invocation.with_body(body),
            None => invocation,
        }
    }
}
