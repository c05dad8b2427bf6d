//! Engine harness and a recording renderer

use crate::executor_stub::ScriptedExecutor;
use crate::fixtures::test_config;
use anyhow::{bail, Result};
use gpuwatch::{
    AggregateState, Aggregator, Config, Engine, HostSnapshot, HostStatus, RemoteExecutor, Renderer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Route `tracing` output through the test writer; safe to call repeatedly
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("gpuwatch=debug"))
        .with_test_writer()
        .try_init();
}

/// A polling engine wired to a `ScriptedExecutor`
pub struct TestHarness {
    pub executor: Arc<ScriptedExecutor>,
    pub config: Config,
    engine: Option<Engine>,
}

impl TestHarness {
    pub fn new(hosts: &[&str]) -> Self {
        Self::with_config(test_config(hosts))
    }

    pub fn with_config(config: Config) -> Self {
        init_test_logging();
        Self {
            executor: Arc::new(ScriptedExecutor::new()),
            config,
            engine: None,
        }
    }

    /// Spawn the pollers; scripts must be in place first
    pub fn start(&mut self) -> &Engine {
        let executor: Arc<dyn RemoteExecutor> = self.executor.clone();
        self.engine.insert(Engine::start(&self.config, executor))
    }

    pub fn aggregator(&self) -> Option<&Aggregator> {
        self.engine.as_ref().map(Engine::aggregator)
    }

    pub fn read_all(&self) -> Option<AggregateState> {
        self.aggregator().map(Aggregator::read_all)
    }

    /// Poll the aggregator until `host` reports `status`
    pub async fn wait_for_status(
        &self,
        host: &str,
        status: HostStatus,
        within: Duration,
    ) -> Result<Arc<HostSnapshot>> {
        let Some(aggregator) = self.aggregator() else {
            bail!("engine not started");
        };
        let deadline = Instant::now() + within;
        loop {
            if let Some(snapshot) = aggregator.get(host) {
                if snapshot.status == status {
                    return Ok(snapshot);
                }
            }
            if Instant::now() >= deadline {
                let current = aggregator.get(host).map(|s| s.status);
                bail!("{host} did not reach {status} within {within:?}, last seen {current:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown().await;
        }
    }
}

/// Keeps every frame it is handed; cancels the token after `limit` frames
pub struct RecordingRenderer {
    pub frames: Vec<AggregateState>,
    limit: Option<usize>,
    cancel: CancellationToken,
}

impl RecordingRenderer {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            frames: Vec::new(),
            limit: None,
            cancel,
        }
    }

    pub fn stop_after(mut self, frames: usize) -> Self {
        self.limit = Some(frames);
        self
    }
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, state: &AggregateState) -> Result<()> {
        self.frames.push(state.clone());
        if self.limit.is_some_and(|limit| self.frames.len() >= limit) {
            self.cancel.cancel();
        }
        Ok(())
    }
}
