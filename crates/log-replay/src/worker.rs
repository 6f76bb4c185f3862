// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Replay worker: one source, one concurrency slot, one transport.
//!
//! ```text
//! Idle -> Connecting -> Sending -> Closed
//!              |           |  ^
//!              |           v  |   (loop_forever)
//!              |        Draining
//!              +-----> Failed <--- Sending
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::ReplayError;
use crate::policy::ReplayPolicy;
use crate::source::SourceRecord;
use crate::tls::TlsResolver;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Connecting,
    Sending,
    /// Waiting out the inter-turn delay before the next pass.
    Draining,
    Closed,
    Failed,
}

/// Outcome of a worker that terminated without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub source: String,
    pub slot: usize,
    pub address: String,
    /// Completed passes over the source's lines.
    pub passes: u64,
    pub lines_sent: u64,
    /// `true` when the run stopped on cancellation rather than completion.
    pub cancelled: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("worker {slot} of source {source_name} failed: {error}")]
pub struct WorkerFailure {
    pub source_name: String,
    pub slot: usize,
    #[source]
    pub error: ReplayError,
}

pub struct ReplayWorker {
    source: Arc<SourceRecord>,
    policy: Arc<ReplayPolicy>,
    credentials: Arc<dyn TlsResolver>,
    slot: usize,
    cancel: CancellationToken,
    state: WorkerState,
}

impl fmt::Debug for ReplayWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayWorker")
            .field("source", &self.source.name())
            .field("slot", &self.slot)
            .field("state", &self.state)
            .finish()
    }
}

impl ReplayWorker {
    pub fn new(
        source: Arc<SourceRecord>,
        policy: Arc<ReplayPolicy>,
        credentials: Arc<dyn TlsResolver>,
        slot: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            policy,
            credentials,
            slot,
            cancel,
            state: WorkerState::Idle,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(
            source = self.source.name(),
            slot = self.slot,
            "{:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Runs the worker to completion. The transport is closed on every exit path.
    pub async fn run(mut self) -> Result<WorkerReport, WorkerFailure> {
        let mut transport = match self.connect().await {
            Ok(transport) => transport,
            Err(error) => return Err(self.fail(error)),
        };

        let outcome = self.replay(&mut transport).await;
        transport.close().await;

        match outcome {
            Ok(report) => {
                self.transition(WorkerState::Closed);
                Ok(report)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    fn fail(&mut self, error: ReplayError) -> WorkerFailure {
        self.transition(WorkerState::Failed);
        WorkerFailure {
            source_name: self.source.name().to_string(),
            slot: self.slot,
            error,
        }
    }

    async fn connect(&mut self) -> Result<Transport, ReplayError> {
        self.transition(WorkerState::Connecting);

        let tls = if self.source.is_secure() {
            match self.credentials.resolve_for(&self.source).await? {
                Some(config) => Some(config),
                None => {
                    return Err(ReplayError::Configuration(format!(
                        "you want to use tls for {} but no certificates or keys are available",
                        self.source.name()
                    )))
                }
            }
        } else {
            None
        };

        Transport::open(
            self.source.protocol(),
            &self.policy.destination_host,
            self.policy.port_for(&self.source),
            tls,
            self.policy.batch,
        )
        .await
    }

    async fn replay(&mut self, transport: &mut Transport) -> Result<WorkerReport, ReplayError> {
        let source = Arc::clone(&self.source);
        let mut report = WorkerReport {
            source: source.name().to_string(),
            slot: self.slot,
            address: transport.address().to_string(),
            passes: 0,
            lines_sent: 0,
            cancelled: false,
        };

        loop {
            self.transition(WorkerState::Sending);
            for line in source.lines() {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    return Ok(report);
                }
                transport.send_line(line).await?;
                report.lines_sent += 1;
            }
            report.passes += 1;
            info!(
                "send {} logs from datasource {} to server {}",
                source.lines().len(),
                source.name(),
                report.address
            );

            if !self.policy.loop_forever {
                return Ok(report);
            }
            if source.lines().is_empty() {
                debug!("Source {} has no lines, not looping", source.name());
                return Ok(report);
            }

            self.transition(WorkerState::Draining);
            tokio::select! {
                () = sleep(self.policy.inter_turn_delay) => {}
                () = self.cancel.cancelled() => {
                    report.cancelled = true;
                    return Ok(report);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::Protocol;
    use async_trait::async_trait;
    use rustls::ClientConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TlsResolver for CountingResolver {
        async fn resolve_for(
            &self,
            _source: &SourceRecord,
        ) -> Result<Option<Arc<ClientConfig>>, ReplayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| (*l).to_string()).collect()
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn worker(
        source: SourceRecord,
        policy: ReplayPolicy,
        resolver: Arc<dyn TlsResolver>,
        cancel: CancellationToken,
    ) -> ReplayWorker {
        ReplayWorker::new(Arc::new(source), Arc::new(policy), resolver, 0, cancel)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_single_pass_sends_every_line_once_in_order() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket).lines();
            let mut received = Vec::new();
            while let Some(line) = reader.next_line().await.unwrap() {
                received.push(line);
            }
            received
        });

        let resolver = Arc::new(CountingResolver::default());
        let source = SourceRecord::new("web", Protocol::Tcp, port, lines(&["l1", "l2", "l3"]));
        let report = worker(
            source,
            ReplayPolicy::default(),
            resolver.clone(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(server.await.unwrap(), vec!["l1", "l2", "l3"]);
        assert_eq!(report.passes, 1);
        assert_eq!(report.lines_sent, 3);
        assert!(!report.cancelled);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert!(logs_contain(&format!(
            "send 3 logs from datasource web to server 127.0.0.1:{port}"
        )));
    }

    #[tokio::test]
    async fn test_secure_source_without_credentials_fails_before_connecting() {
        let (listener, port) = listener().await;
        let resolver = Arc::new(CountingResolver::default());
        let source =
            SourceRecord::new("secure", Protocol::Tcp, port, lines(&["l1"])).secure(true);

        let failure = worker(
            source,
            ReplayPolicy::default(),
            resolver.clone(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(failure.error, ReplayError::Configuration(_)));
        assert_eq!(failure.source_name, "secure");
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        // nothing ever reached the listener
        let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let port = listener().await.1;
        let source = SourceRecord::new("gone", Protocol::Tcp, port, lines(&["l1"]));

        let failure = worker(
            source,
            ReplayPolicy::default(),
            Arc::new(CountingResolver::default()),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap_err();

        assert!(matches!(failure.error, ReplayError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_looping_waits_between_passes() {
        let (listener, port) = listener().await;
        let delay = Duration::from_millis(150);
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket).lines();
            let mut arrivals = Vec::new();
            for _ in 0..4 {
                let line = reader.next_line().await.unwrap().unwrap();
                arrivals.push((line, Instant::now()));
            }
            arrivals
        });

        let cancel = CancellationToken::new();
        let policy = ReplayPolicy {
            loop_forever: true,
            inter_turn_delay: delay,
            ..Default::default()
        };
        let source = SourceRecord::new("loop", Protocol::Tcp, port, lines(&["a", "b"]));
        let handle = tokio::spawn(
            worker(
                source,
                policy,
                Arc::new(CountingResolver::default()),
                cancel.clone(),
            )
            .run(),
        );

        let arrivals = server.await.unwrap();
        cancel.cancel();
        let report = handle.await.unwrap().unwrap();

        let names: Vec<_> = arrivals.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "a", "b"]);
        let gap = arrivals[2].1.duration_since(arrivals[1].1);
        assert!(gap >= delay - Duration::from_millis(10), "gap was {gap:?}");
        assert!(report.cancelled);
        assert!(report.passes >= 2);
    }

    #[tokio::test]
    async fn test_empty_source_does_not_loop() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let policy = ReplayPolicy {
            loop_forever: true,
            ..Default::default()
        };
        let source = SourceRecord::new("empty", Protocol::Tcp, port, Vec::<String>::new());
        let report = tokio::time::timeout(
            Duration::from_secs(2),
            worker(
                source,
                policy,
                Arc::new(CountingResolver::default()),
                CancellationToken::new(),
            )
            .run(),
        )
        .await
        .unwrap()
        .unwrap();

        server.await.unwrap();
        assert_eq!(report.passes, 1);
        assert_eq!(report.lines_sent, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_worker_sends_nothing() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket).lines();
            reader.next_line().await.unwrap()
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = SourceRecord::new("web", Protocol::Tcp, port, lines(&["l1"]));
        let report = worker(
            source,
            ReplayPolicy::default(),
            Arc::new(CountingResolver::default()),
            cancel,
        )
        .run()
        .await
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.lines_sent, 0);
        assert_eq!(server.await.unwrap(), None);
    }
}
