//! Request processing
//!
//! Applies a stream of [`Request`]s to a [`LockService`] and yields one
//! [`Response`] per request.
//!
//! # Modes
//!
//! - **Sequential**: one request at a time, responses in input order
//! - **Concurrent**: one task per request, responses in completion order
//!
//! Every response carries the ticket its operation drew inside the tree.
//! Sorting concurrent responses by ticket gives an order in which a
//! sequential replay on a fresh tree reproduces every result.

mod request;

pub use request::{Operation, Request, Response};

use crate::domain::locking::{LockService, Outcome};
use crate::error::Error;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

/// How a batch of requests is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Sequential,
    Concurrent,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Concurrent => "concurrent",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" | "parallel" => Ok(Self::Concurrent),
            _ => Err(Error::ConfigError(format!(
                "Invalid processing mode: {}. Valid options: sequential, concurrent",
                s
            ))),
        }
    }
}

/// Apply a single request
///
/// Unknown operations are answered with `false` without touching the tree.
pub async fn dispatch<S>(service: &S, request: &Request) -> Response
where
    S: LockService + ?Sized,
{
    let outcome = match request.operation.kind() {
        Some(kind) => {
            service
                .apply(kind, &request.node_name, request.user_id)
                .await
        }
        None => {
            warn!(
                seq = request.seq,
                operation = %request.operation,
                "Unknown operation"
            );
            Outcome::untouched()
        }
    };

    Response {
        request: request.clone(),
        result: outcome.granted,
        ticket: outcome.ticket,
    }
}

/// Apply requests one at a time, yielding responses in input order
pub fn process_sequential<S, R>(service: Arc<S>, requests: R) -> impl Stream<Item = Response>
where
    S: LockService + ?Sized,
    R: Stream<Item = Request>,
{
    async_stream::stream! {
        futures_util::pin_mut!(requests);
        while let Some(request) = requests.next().await {
            yield dispatch(service.as_ref(), &request).await;
        }
    }
}

/// Apply every request on its own task, yielding responses as they complete
///
/// Work starts immediately on the current tokio runtime. At most `capacity`
/// finished responses are buffered ahead of the consumer. The stream ends
/// once the input is exhausted and every task has answered.
pub fn process_concurrent<S, R>(
    service: Arc<S>,
    requests: R,
    capacity: usize,
) -> impl Stream<Item = Response> + Send + 'static
where
    S: LockService + ?Sized + 'static,
    R: Stream<Item = Request> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        let mut spawned = 0usize;

        futures_util::pin_mut!(requests);
        while let Some(request) = requests.next().await {
            let service = Arc::clone(&service);
            let tx = tx.clone();
            tasks.spawn(async move {
                let response = dispatch(service.as_ref(), &request).await;
                // A closed channel only means the consumer stopped listening
                let _ = tx.send(response).await;
            });
            spawned += 1;

            while let Some(joined) = tasks.try_join_next() {
                report_failed_task(joined);
            }
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            report_failed_task(joined);
        }
        debug!(requests = spawned, "Concurrent processing finished");
    });

    async_stream::stream! {
        while let Some(response) = rx.recv().await {
            yield response;
        }
    }
}

/// Apply a whole batch and collect the responses
pub async fn process_batch<S>(
    service: Arc<S>,
    requests: Vec<Request>,
    mode: ProcessingMode,
) -> Vec<Response>
where
    S: LockService + ?Sized + 'static,
{
    let capacity = requests.len().max(1);
    let requests = futures_util::stream::iter(requests);
    match mode {
        ProcessingMode::Sequential => process_sequential(service, requests).collect().await,
        ProcessingMode::Concurrent => {
            process_concurrent(service, requests, capacity)
                .collect()
                .await
        }
    }
}

/// Responses sorted into the order their operations took effect
///
/// Responses without a ticket never touched the tree; they keep their
/// relative order at the front.
pub fn in_ticket_order(responses: &[Response]) -> Vec<Response> {
    let mut ordered = responses.to_vec();
    ordered.sort_by_key(|response| response.ticket);
    ordered
}

fn report_failed_task(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        warn!(error = %err, "Request task failed");
    }
}
