//! Data model shared by the pollers, the aggregator and the renderers
//!
//! Every value here is immutable once built: a new poll produces a new
//! `HostSnapshot` that replaces the previous one, it never edits it.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Host alias as written in `~/.ssh/config`
pub type Host = String;

/// Connectivity state of one host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    Connecting,
    Ok,
    Timeout,
    Failed,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HostStatus::Connecting => "CONNECTING",
            HostStatus::Ok => "OK",
            HostStatus::Timeout => "TIMEOUT",
            HostStatus::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// One GPU reading (nvidia-smi csv row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuMetricRecord {
    pub index: u32,
    pub utilization: u8,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
    pub temperature_c: i32,
    pub name: Option<String>,
}

impl GpuMetricRecord {
    /// Memory usage in percent, 0 when the card reports no memory
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_mib == 0 {
            return 0.0;
        }
        self.memory_used_mib as f64 / self.memory_total_mib as f64 * 100.0
    }
}

/// Result of one poll cycle for one host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSnapshot {
    pub host: Host,
    pub status: HostStatus,
    pub gpus: Vec<GpuMetricRecord>,
    /// Present iff status is TIMEOUT or FAILED
    pub reason: Option<String>,
    pub taken_at: DateTime<Local>,
}

impl HostSnapshot {
    pub fn connecting(host: impl Into<Host>) -> Self {
        Self {
            host: host.into(),
            status: HostStatus::Connecting,
            gpus: Vec::new(),
            reason: None,
            taken_at: Local::now(),
        }
    }

    pub fn ok(host: impl Into<Host>, gpus: Vec<GpuMetricRecord>) -> Self {
        Self {
            host: host.into(),
            status: HostStatus::Ok,
            gpus,
            reason: None,
            taken_at: Local::now(),
        }
    }

    pub fn timed_out(host: impl Into<Host>, reason: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: HostStatus::Timeout,
            gpus: Vec::new(),
            reason: Some(reason.into()),
            taken_at: Local::now(),
        }
    }

    pub fn failed(host: impl Into<Host>, reason: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            status: HostStatus::Failed,
            gpus: Vec::new(),
            reason: Some(reason.into()),
            taken_at: Local::now(),
        }
    }
}

/// Point-in-time view of every configured host, in registry order
#[derive(Debug, Clone, Serialize)]
pub struct AggregateState {
    pub hosts: Vec<Arc<HostSnapshot>>,
    pub read_at: DateTime<Local>,
}

impl AggregateState {
    pub fn get(&self, host: &str) -> Option<&HostSnapshot> {
        self.hosts.iter().find(|s| s.host == host).map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn count_with_status(&self, status: HostStatus) -> usize {
        self.hosts.iter().filter(|s| s.status == status).count()
    }

    pub fn all_ok(&self) -> bool {
        self.hosts.iter().all(|s| s.status == HostStatus::Ok)
    }
}
