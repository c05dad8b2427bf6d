//! gpuwatch - live GPU dashboard for a small cluster
//!
//! Polls `nvidia-smi` on every configured host over ssh and renders one
//! refreshing view:
//! - One independent poller task per host, with timeouts and backoff
//! - A shared latest-snapshot store read by the render loop
//! - Terminal (ratatui) or plain-text rendering

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod executor;
pub mod logging;
pub mod models;
pub mod parser;
pub mod poller;
pub mod registry;
pub mod render;
pub mod scheduler;

pub use aggregator::Aggregator;
pub use config::{Config, ConfigError, ConfigFile, Overrides, RemoteCommand};
pub use engine::{probe, Engine};
pub use executor::{CommandExecutor, ExecutionError, ExecutionErrorKind, RemoteExecutor};
pub use models::{AggregateState, GpuMetricRecord, Host, HostSnapshot, HostStatus};
pub use parser::{parse, ParseError};
pub use poller::{backoff_delay, HostPoller, PollPolicy, PollSchedule};
pub use registry::HostRegistry;
pub use scheduler::{Renderer, Scheduler};
