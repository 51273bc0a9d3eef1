use std::{fmt, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Why a single call did not produce a usable response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The request could not be built (bad URL, bad header value).
    InvalidRequest(String),
    /// Connection refused, timeout, DNS failure, truncated body...
    Transport(String),
    /// The server answered with a status that is neither a success nor a 4xx.
    Status(u16),
    /// The task running the call panicked before recording anything.
    Panicked,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Status(code) => write!(f, "unexpected status {code}"),
            Self::Panicked => f.write_str("worker panicked"),
        }
    }
}

/// The classified result of executing one [`crate::WorkItem`].
///
/// The classification is not a retry signal. What counts as "good" depends on the
/// tool: a [`Outcome::ClientRejected`] is a failure when uploading but exactly what
/// the invalid-data probe expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success(u16),
    ClientRejected(u16),
    Failure(FailureReason),
}

impl Outcome {
    /// 200 and 201 are successes, `[400, 500)` is a client rejection, anything
    /// else is a failure.
    pub fn classify(status: u16) -> Self {
        match status {
            200 | 201 => Self::Success(status),
            400..=499 => Self::ClientRejected(status),
            _ => Self::Failure(FailureReason::Status(status)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The HTTP status behind this outcome, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success(code) | Self::ClientRejected(code) => Some(*code),
            Self::Failure(FailureReason::Status(code)) => Some(*code),
            Self::Failure(_) => None,
        }
    }
}

/// What an [`crate::Invoker`] hands back for one item.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Index of the originating [`crate::WorkItem`].
    pub index: usize,
    pub outcome: Outcome,
    /// Wall-clock time spent on the call, request construction included.
    pub latency: Duration,
    /// Raw response body, kept only for targets that persist it.
    pub body: Option<Bytes>,
}

impl Invocation {
    pub fn new(index: usize, outcome: Outcome, latency: Duration) -> Self {
        Self {
            index,
            outcome,
            latency,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}
