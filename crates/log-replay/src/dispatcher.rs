// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fans a source selection out into concurrent replay workers.
//!
//! Every resolved source gets `concurrency_per_source` independent workers, each replaying
//! the full line sequence from the start. Workers live in a [`JoinSet`] owned by a single
//! [`Dispatcher::run`] call, so none of them outlives it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::ReplayError;
use crate::policy::ReplayPolicy;
use crate::source::SourceRegistry;
use crate::tls::TlsResolver;
use crate::worker::{ReplayWorker, WorkerFailure, WorkerReport};

/// What the dispatcher does when a worker fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Stop every other worker and return the first failure.
    #[default]
    Abort,
    /// Record the failure and let the remaining workers finish.
    Isolate,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid replay policy: {0}")]
    Policy(#[source] ReplayError),

    #[error(transparent)]
    Worker(#[from] WorkerFailure),
}

#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Number of workers launched.
    pub scheduled: usize,
    pub reports: Vec<WorkerReport>,
    /// Only populated under [`FailureMode::Isolate`].
    pub failures: Vec<WorkerFailure>,
}

impl DispatchSummary {
    pub fn lines_sent(&self) -> u64 {
        self.reports.iter().map(|r| r.lines_sent).sum()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Dispatcher {
    registry: Arc<SourceRegistry>,
    credentials: Arc<dyn TlsResolver>,
    failure_mode: FailureMode,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(registry: Arc<SourceRegistry>, credentials: Arc<dyn TlsResolver>) -> Self {
        Self {
            registry,
            credentials,
            failure_mode: FailureMode::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Ties the workers to an external token (e.g. cancelled on Ctrl-C).
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Replays `selection` (everything when empty) and blocks until all workers terminate.
    pub async fn run(
        &self,
        policy: ReplayPolicy,
        selection: &[String],
    ) -> Result<DispatchSummary, DispatchError> {
        policy.validate().map_err(DispatchError::Policy)?;

        let policy = Arc::new(policy);
        let cancel = self.cancel.child_token();
        let sources = self.registry.resolve(selection);

        let mut workers = JoinSet::new();
        // task id -> (source, slot), for workers that die without a report
        let mut identities = HashMap::new();
        let mut summary = DispatchSummary::default();
        for source in sources {
            debug!(
                "Scheduling {} workers for source {}",
                policy.concurrency_per_source,
                source.name()
            );
            for slot in 0..policy.concurrency_per_source {
                let worker = ReplayWorker::new(
                    Arc::clone(&source),
                    Arc::clone(&policy),
                    Arc::clone(&self.credentials),
                    slot,
                    cancel.clone(),
                );
                let handle = workers.spawn(worker.run());
                identities.insert(handle.id(), (source.name().to_string(), slot));
                summary.scheduled += 1;
            }
        }
        info!("Started {} replay workers", summary.scheduled);

        while let Some(joined) = workers.join_next_with_id().await {
            let failure = match joined {
                Ok((id, Ok(report))) => {
                    identities.remove(&id);
                    summary.reports.push(report);
                    continue;
                }
                Ok((id, Err(failure))) => {
                    identities.remove(&id);
                    failure
                }
                Err(join_error) => {
                    let (source_name, slot) = identities
                        .remove(&join_error.id())
                        .unwrap_or_else(|| (String::from("<unknown>"), 0));
                    WorkerFailure {
                        source_name,
                        slot,
                        error: ReplayError::Worker(join_error.to_string()),
                    }
                }
            };

            error!("{failure}");
            match self.failure_mode {
                FailureMode::Abort => {
                    cancel.cancel();
                    workers.shutdown().await;
                    return Err(failure.into());
                }
                FailureMode::Isolate => summary.failures.push(failure),
            }
        }

        debug!(
            "All workers finished: {} completed, {} failed, {} lines sent",
            summary.reports.len(),
            summary.failures.len(),
            summary.lines_sent()
        );
        Ok(summary)
    }
}
