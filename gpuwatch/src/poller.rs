//! Per-host polling loop
//!
//! Each host gets its own `HostPoller` task:
//! - Runs the query with the first-connection or steady-state timeout
//! - Turns the outcome into a `HostSnapshot` and publishes it
//! - Waits the refresh interval, or a growing multiple of it after failures
//!
//! Nothing a poller does can block another host or the render loop.

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::executor::{ExecutionError, RemoteExecutor};
use crate::models::{Host, HostSnapshot, HostStatus};
use crate::parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing knobs of every poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub refresh_interval: Duration,
    pub initial_timeout: Duration,
    pub steady_timeout: Duration,
    pub max_backoff_multiplier: u32,
    pub shutdown_grace: Duration,
}

impl From<&Config> for PollPolicy {
    fn from(config: &Config) -> Self {
        Self {
            refresh_interval: config.refresh_interval,
            initial_timeout: config.initial_timeout,
            steady_timeout: config.steady_timeout,
            max_backoff_multiplier: config.max_backoff_multiplier,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

/// Delay before the next attempt after `consecutive_failures` failed polls.
///
/// `refresh` when healthy, then `refresh * min(2^n, max_multiplier)`.
pub fn backoff_delay(
    refresh: Duration,
    consecutive_failures: u32,
    max_multiplier: u32,
) -> Duration {
    if consecutive_failures == 0 {
        return refresh;
    }
    let factor = 2u32.saturating_pow(consecutive_failures).min(max_multiplier);
    refresh.saturating_mul(factor)
}

/// Scheduling state owned by one poller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSchedule {
    consecutive_failures: u32,
    channel_up: bool,
}

impl PollSchedule {
    pub fn record(&mut self, status: HostStatus) {
        match status {
            HostStatus::Ok => {
                self.consecutive_failures = 0;
                self.channel_up = true;
            }
            HostStatus::Timeout | HostStatus::Failed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.channel_up = false;
            }
            HostStatus::Connecting => {}
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn next_delay(&self, policy: &PollPolicy) -> Duration {
        backoff_delay(
            policy.refresh_interval,
            self.consecutive_failures,
            policy.max_backoff_multiplier,
        )
    }

    /// The multiplexed channel has to be (re)built until a poll succeeds
    pub fn attempt_timeout(&self, policy: &PollPolicy) -> Duration {
        if self.channel_up {
            policy.steady_timeout
        } else {
            policy.initial_timeout
        }
    }
}

/// Map an executor outcome to the snapshot shown for the host
pub fn snapshot_from_outcome(host: &str, outcome: Result<String, ExecutionError>) -> HostSnapshot {
    match outcome {
        Ok(raw) => match parser::parse(&raw) {
            Ok(gpus) => HostSnapshot::ok(host, gpus),
            Err(e) => HostSnapshot::failed(host, format!("malformed output: {e}")),
        },
        Err(e @ ExecutionError::Timeout { .. }) => {
            HostSnapshot::timed_out(host, format!("SSH {e}"))
        }
        Err(ExecutionError::ConnectionFailed { reason }) => HostSnapshot::failed(host, reason),
    }
}

pub struct HostPoller {
    host: Host,
    executor: Arc<dyn RemoteExecutor>,
    aggregator: Aggregator,
    policy: PollPolicy,
    schedule: PollSchedule,
    last_status: HostStatus,
}

impl HostPoller {
    pub fn new(
        host: Host,
        executor: Arc<dyn RemoteExecutor>,
        aggregator: Aggregator,
        policy: PollPolicy,
    ) -> Self {
        Self {
            host,
            executor,
            aggregator,
            policy,
            schedule: PollSchedule::default(),
            last_status: HostStatus::Connecting,
        }
    }

    /// One query + publish, without the wait that follows. `None` when
    /// `cancel` fired first; the query then gets the shutdown grace period
    /// before it is dropped (which kills the child).
    pub async fn poll_once(&mut self, cancel: &CancellationToken) -> Option<HostStatus> {
        let timeout = self.schedule.attempt_timeout(&self.policy);
        let outcome = {
            let mut attempt = self.executor.execute(&self.host, timeout);
            tokio::select! {
                outcome = &mut attempt => outcome,
                _ = cancel.cancelled() => {
                    let grace = self.policy.shutdown_grace;
                    if tokio::time::timeout(grace, &mut attempt).await.is_err() {
                        debug!(host = %self.host, "abandoning in-flight query");
                    }
                    return None;
                }
            }
        };
        Some(self.complete(outcome))
    }

    fn complete(&mut self, outcome: Result<String, ExecutionError>) -> HostStatus {
        let snapshot = snapshot_from_outcome(&self.host, outcome);
        let status = snapshot.status;

        match (self.last_status, status) {
            (HostStatus::Ok, HostStatus::Ok) => {}
            (_, HostStatus::Ok) => {
                info!(host = %self.host, gpus = snapshot.gpus.len(), "host online")
            }
            (previous, current) if previous != current => warn!(
                host = %self.host,
                status = %current,
                reason = snapshot.reason.as_deref().unwrap_or_default(),
                "host unavailable"
            ),
            _ => debug!(host = %self.host, status = %status, "poll failed again"),
        }

        self.aggregator.update(snapshot);
        self.schedule.record(status);
        self.last_status = status;
        status
    }

    /// Poll until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(host = %self.host, "poller started");

        while self.poll_once(&cancel).await.is_some() {
            let delay = self.schedule.next_delay(&self.policy);
            debug!(
                host = %self.host,
                ?delay,
                failures = self.schedule.consecutive_failures(),
                "next attempt scheduled"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        debug!(host = %self.host, "poller stopped");
    }
}
