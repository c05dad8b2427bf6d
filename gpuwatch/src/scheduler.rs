//! Render cadence
//!
//! Ticks at a fixed interval and paints whatever the aggregator holds at
//! that instant. It never waits on a poll.

use crate::aggregator::Aggregator;
use crate::models::AggregateState;
use anyhow::Result;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Paints one aggregate state. Called from the render loop, must be quick.
pub trait Renderer {
    fn render(&mut self, state: &AggregateState) -> Result<()>;
}

pub struct Scheduler {
    aggregator: Aggregator,
    period: Duration,
}

impl Scheduler {
    pub fn new(aggregator: Aggregator, period: Duration) -> Self {
        Self { aggregator, period }
    }

    /// Render on every tick until `cancel` fires; returns the number of frames
    pub async fn run<R>(&self, renderer: &mut R, cancel: &CancellationToken) -> Result<u64>
    where
        R: Renderer + ?Sized,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let state = self.aggregator.read_all();
                    renderer.render(&state)?;
                    frames += 1;
                }
            }
        }

        debug!(frames, "render loop stopped");
        Ok(frames)
    }
}
