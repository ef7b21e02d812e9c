//! Request aggregator: collects typed operations and runs them together.
//!
//! # Design
//! `add_request` only records a pending operation. `execute_all` drains the
//! whole pending set at entry, dispatches every operation concurrently and
//! joins them with a single `join_all`, so it returns only once each one has
//! reached a terminal state. One failing operation never cancels or delays
//! its siblings: failures are collected into an [`ExecuteError`] after the
//! join.
//!
//! `execute_all` borrows the query mutably, so nothing can be added while a
//! run is in flight. Operations added afterwards belong to the next run.
//!
//! Handlers may borrow caller state for `'a`. Because dispatch happens on the
//! calling task, a handler can write straight into a caller-owned struct
//! without `Arc` or locks.

use std::any::type_name;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tracing::Instrument;
use uuid::Uuid;

use crate::batch::BatchPlanner;
use crate::codec::{Codec, JsonCodec};
use crate::config::QueryConfig;
use crate::error::{ConfigError, ExecuteError, ExecuteSummary, OperationFailure, QueryError};
use crate::http::{HttpRequest, HttpResponse};
use crate::router::{Outcome, ResponseRouter};
use crate::transport::Transport;

type Complete<'a, C> = Box<
    dyn FnOnce(&ResponseRouter<'a, C>, &str, Result<HttpResponse, QueryError>) -> Outcome
        + Send
        + 'a,
>;

/// One registered, not yet dispatched operation.
struct PendingOperation<'a, C> {
    label: String,
    request: HttpRequest,
    complete: Complete<'a, C>,
}

impl<'a, C> PendingOperation<'a, C> {
    fn finish(
        self,
        router: &ResponseRouter<'a, C>,
        response: Result<HttpResponse, QueryError>,
    ) -> (String, Outcome) {
        let PendingOperation {
            label, complete, ..
        } = self;
        let outcome = complete(router, &label, response);
        (label, outcome)
    }
}

/// Aggregates typed requests and executes them concurrently.
pub struct Query<'a, C = JsonCodec> {
    transport: Arc<dyn Transport>,
    router: ResponseRouter<'a, C>,
    pending: Vec<PendingOperation<'a, C>>,
    config: QueryConfig,
    planner: Option<BatchPlanner>,
    primed: bool,
}

impl<'a> Query<'a, JsonCodec> {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_codec(transport, JsonCodec)
    }
}

impl<'a, C: Codec + 'a> Query<'a, C> {
    pub fn with_codec(transport: Arc<dyn Transport>, codec: C) -> Self {
        Self {
            transport,
            router: ResponseRouter::new(codec),
            pending: Vec::new(),
            config: QueryConfig::default(),
            planner: None,
            primed: false,
        }
    }

    /// Apply `config`. Batch mode is enabled when `config.batch` is set.
    pub fn with_config(mut self, config: QueryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.planner = config.batch.as_ref().map(BatchPlanner::new);
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn router(&self) -> &ResponseRouter<'a, C> {
        &self.router
    }

    /// Number of operations waiting for the next `execute_all`.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Register the success handler for every `T` added without its own
    /// handler. The first registration for a type wins.
    pub fn on_success<T, F>(&mut self, handler: F) -> bool
    where
        T: 'static,
        F: Fn(T) + Send + Sync + 'a,
    {
        self.router.registry_mut().on_success(handler)
    }

    pub fn on_server_error(&mut self, handler: impl Fn(&QueryError) + Send + Sync + 'a) {
        self.router.registry_mut().on_server_error(handler);
    }

    pub fn on_client_error(&mut self, handler: impl Fn(&QueryError) + Send + Sync + 'a) {
        self.router.registry_mut().on_client_error(handler);
    }

    /// Add an operation decoded as `T` and delivered to `on_success`.
    pub fn add_request<T, F>(&mut self, request: HttpRequest, on_success: F)
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T) + Send + 'a,
    {
        self.add_request_as(type_name::<T>(), request, on_success);
    }

    /// Like [`add_request`](Self::add_request), reporting failures under `label`.
    pub fn add_request_as<T, F>(&mut self, label: impl Into<String>, request: HttpRequest, on_success: F)
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T) + Send + 'a,
    {
        self.push(
            label.into(),
            request,
            Box::new(
                move |router: &ResponseRouter<'a, C>,
                      label: &str,
                      response: Result<HttpResponse, QueryError>| {
                    router.route_with::<T, F>(label, response, Some(on_success))
                },
            ),
        );
    }

    /// Add an operation delivered to the registered `on_success::<T>` handler.
    pub fn add<T>(&mut self, request: HttpRequest)
    where
        T: DeserializeOwned + 'static,
    {
        self.push(
            type_name::<T>().to_string(),
            request,
            Box::new(
                |router: &ResponseRouter<'a, C>,
                 label: &str,
                 response: Result<HttpResponse, QueryError>| router.route::<T>(label, response),
            ),
        );
    }

    fn push(&mut self, label: String, request: HttpRequest, complete: Complete<'a, C>) {
        tracing::trace!(label = %label, path = %request.path, "operation added");
        self.pending.push(PendingOperation {
            label,
            request,
            complete,
        });
    }

    /// Acquire the transport credential now, before any concurrent dispatch.
    pub async fn prime(&mut self) -> Result<(), QueryError> {
        self.transport.prime_credential().await?;
        self.primed = true;
        Ok(())
    }

    /// Run every pending operation concurrently and wait for all of them.
    ///
    /// The pending set is empty afterwards whatever the outcome. An empty
    /// pending set completes immediately without touching the transport.
    pub async fn execute_all(&mut self) -> Result<ExecuteSummary, ExecuteError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(ExecuteSummary::default());
        }

        let span = tracing::info_span!(
            "execute_all",
            run_id = %Uuid::new_v4(),
            operations = pending.len(),
            batched = self.planner.is_some(),
        );
        self.run(pending).instrument(span).await
    }

    async fn run(
        &mut self,
        pending: Vec<PendingOperation<'a, C>>,
    ) -> Result<ExecuteSummary, ExecuteError> {
        let dispatched = pending.len();
        let primed = self.ensure_primed().await;

        let dispatcher = Dispatcher {
            transport: self.transport.as_ref(),
            router: &self.router,
            timeout: self.config.request_timeout(),
        };
        let finished = match (primed, &self.planner) {
            (Err(error), _) => {
                tracing::warn!(%error, "credential priming failed, nothing dispatched");
                pending
                    .into_iter()
                    .map(|op| op.finish(dispatcher.router, Err(error.clone())))
                    .collect()
            }
            (Ok(()), Some(planner)) => dispatcher.batched(planner, pending).await,
            (Ok(()), None) => dispatcher.fan_out(pending).await,
        };

        summarize(dispatched, finished)
    }

    async fn ensure_primed(&mut self) -> Result<(), QueryError> {
        if self.primed || !self.config.prime_credential {
            return Ok(());
        }
        self.prime().await
    }
}

/// The shared, read-only half of a query used while operations are in flight.
struct Dispatcher<'q, 'a, C> {
    transport: &'q dyn Transport,
    router: &'q ResponseRouter<'a, C>,
    timeout: Option<Duration>,
}

impl<'a, C: Codec> Dispatcher<'_, 'a, C> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, QueryError> {
        let call = self.transport.send(request);
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(QueryError::Timeout {
                    after_ms: limit.as_millis() as u64,
                }),
            },
            None => Ok(call.await?),
        }
    }

    /// One transport call per operation.
    async fn fan_out(&self, pending: Vec<PendingOperation<'a, C>>) -> Vec<(String, Outcome)> {
        let operations = pending.into_iter().map(|op| async move {
            let PendingOperation {
                label,
                request,
                complete,
            } = op;
            tracing::debug!(label = %label, method = %request.method, path = %request.path, "dispatching");
            let response = self.send(request).await;
            let outcome = complete(self.router, &label, response);
            (label, outcome)
        });
        join_all(operations).await
    }

    /// One transport call per group; groups run concurrently.
    async fn batched(
        &self,
        planner: &BatchPlanner,
        pending: Vec<PendingOperation<'a, C>>,
    ) -> Vec<(String, Outcome)> {
        let groups = planner.partition(pending);
        tracing::debug!(groups = groups.len(), max_group_size = planner.max_group_size(), "dispatching batch groups");
        let groups = groups
            .into_iter()
            .enumerate()
            .map(|(index, group)| self.group(planner, index, group));
        join_all(groups).await.into_iter().flatten().collect()
    }

    async fn group(
        &self,
        planner: &BatchPlanner,
        index: usize,
        group: Vec<PendingOperation<'a, C>>,
    ) -> Vec<(String, Outcome)> {
        let responses = match planner.encode(group.iter().map(|op| &op.request)) {
            Ok(envelope) => match self.send(envelope).await {
                Ok(envelope) => planner.demultiplex(envelope, group.len()),
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };

        match responses {
            Ok(responses) => group
                .into_iter()
                .zip(responses)
                .map(|(op, response)| op.finish(self.router, Ok(response)))
                .collect(),
            Err(error) => {
                tracing::warn!(group = index, size = group.len(), %error, "batch group failed");
                group
                    .into_iter()
                    .map(|op| op.finish(self.router, Err(error.clone())))
                    .collect()
            }
        }
    }
}

fn summarize(
    dispatched: usize,
    finished: Vec<(String, Outcome)>,
) -> Result<ExecuteSummary, ExecuteError> {
    let mut summary = ExecuteSummary {
        dispatched,
        ..ExecuteSummary::default()
    };
    let mut failures = Vec::new();
    for (label, outcome) in finished {
        match outcome {
            Outcome::Delivered => summary.delivered += 1,
            Outcome::Empty => summary.empty += 1,
            Outcome::Discarded => summary.discarded += 1,
            Outcome::Failed(error) => {
                summary.failed += 1;
                failures.push(OperationFailure { label, error });
            }
        }
    }
    debug_assert_eq!(summary.terminal(), summary.dispatched);

    tracing::info!(
        dispatched = summary.dispatched,
        delivered = summary.delivered,
        empty = summary.empty,
        discarded = summary.discarded,
        failed = summary.failed,
        "execute_all complete"
    );

    if failures.is_empty() {
        Ok(summary)
    } else {
        Err(ExecuteError { summary, failures })
    }
}
