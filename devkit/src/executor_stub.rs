/*!
Scripted executor for tests without ssh

Each host gets a script of steps played in order; the last step repeats
forever. Every call is recorded with its timeout and start/finish instants
(tokio clock, so paused-time tests see virtual time).
*/

use async_trait::async_trait;
use gpuwatch::{ExecutionError, RemoteExecutor};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Lets a test hold a call in flight until it decides to release it
#[derive(Debug, Clone, Default)]
pub struct Gate {
    notify: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    /// Succeed with this stdout
    Output(String),
    /// Connection-level failure with this reason
    Fail(String),
    /// Sit until the supplied timeout elapses
    Timeout,
    /// Wait, then play the inner step (still bounded by the timeout)
    Delay(Duration, Box<Step>),
    /// Wait for the gate, then play the inner step (still bounded by the timeout)
    Gated(Gate, Box<Step>),
}

impl Step {
    pub fn output(text: impl Into<String>) -> Self {
        Step::Output(text.into())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Step::Fail(reason.into())
    }

    pub fn delayed(self, by: Duration) -> Self {
        Step::Delay(by, Box::new(self))
    }

    pub fn gated(self, gate: &Gate) -> Self {
        Step::Gated(gate.clone(), Box::new(self))
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub host: String,
    pub timeout: Duration,
    pub started: Instant,
    pub finished: Option<Instant>,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append steps to a host's script
    pub fn script<I>(&self, host: &str, steps: I) -> &Self
    where
        I: IntoIterator<Item = Step>,
    {
        self.scripts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_default()
            .extend(steps);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, host: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.host == host).collect()
    }

    fn next_step(&self, host: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(host) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Step::Timeout),
            Some(queue) => queue.front().cloned().unwrap_or(Step::Timeout),
            None => Step::fail(format!("ssh: Could not resolve hostname {host}")),
        }
    }

    async fn play(step: Step) -> Result<String, ExecutionError> {
        let mut step = step;
        loop {
            match step {
                Step::Output(text) => return Ok(text),
                Step::Fail(reason) => return Err(ExecutionError::connection(reason)),
                Step::Timeout => std::future::pending::<()>().await,
                Step::Delay(by, inner) => {
                    tokio::time::sleep(by).await;
                    step = *inner;
                }
                Step::Gated(gate, inner) => {
                    gate.wait().await;
                    step = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, host: &str, timeout: Duration) -> Result<String, ExecutionError> {
        let step = self.next_step(host);
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                host: host.to_string(),
                timeout,
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };

        let result = match tokio::time::timeout(timeout, Self::play(step)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout { after: timeout }),
        };

        self.calls.lock().unwrap()[index].finished = Some(Instant::now());
        result
    }
}
