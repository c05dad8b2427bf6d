//! Wiring of the polling engine
//!
//! Starts one `HostPoller` task per registered host on top of a shared
//! `Aggregator`, and tears them down with a bounded grace period.

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::executor::RemoteExecutor;
use crate::models::AggregateState;
use crate::poller::{snapshot_from_outcome, HostPoller, PollPolicy};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Extra time granted on top of the grace period before pollers are aborted
const JOIN_MARGIN: Duration = Duration::from_millis(250);

pub struct Engine {
    aggregator: Aggregator,
    cancel: CancellationToken,
    pollers: JoinSet<()>,
    grace: Duration,
}

impl Engine {
    /// Spawn every poller. Must be called from within a tokio runtime.
    pub fn start(config: &Config, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self::start_with_token(config, executor, CancellationToken::new())
    }

    pub fn start_with_token(
        config: &Config,
        executor: Arc<dyn RemoteExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        let aggregator = Aggregator::new(&config.registry);
        let policy = PollPolicy::from(config);
        let mut pollers = JoinSet::new();

        for host in config.registry.list_hosts() {
            let poller =
                HostPoller::new(host.clone(), executor.clone(), aggregator.clone(), policy);
            pollers.spawn(poller.run(cancel.child_token()));
        }

        info!(
            hosts = config.registry.len(),
            refresh_ms = config.refresh_interval.as_millis() as u64,
            "polling engine started"
        );

        Self {
            aggregator,
            cancel,
            pollers,
            grace: config.shutdown_grace,
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every poller and wait at most the grace period (plus a margin)
    /// for them to finish; stragglers are aborted.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        let drained = tokio::time::timeout(self.grace + JOIN_MARGIN, async {
            while let Some(res) = self.pollers.join_next().await {
                if let Err(e) = res {
                    warn!("poller task ended abnormally: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = self.pollers.len(), "aborting pollers past grace period");
            self.pollers.abort_all();
        }
        debug!("polling engine stopped");
    }
}

/// One concurrent pass over every host with the first-connection timeout
pub async fn probe(config: &Config, executor: Arc<dyn RemoteExecutor>) -> AggregateState {
    let aggregator = Aggregator::new(&config.registry);

    let attempts = config.registry.list_hosts().iter().map(|host| {
        let executor = executor.clone();
        async move {
            let outcome = executor.execute(host, config.initial_timeout).await;
            snapshot_from_outcome(host, outcome)
        }
    });

    for snapshot in join_all(attempts).await {
        aggregator.update(snapshot);
    }
    aggregator.read_all()
}
