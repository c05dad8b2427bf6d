use super::{advice, bar};
use crate::models::{AggregateState, HostSnapshot, HostStatus};
use crate::scheduler::Renderer;
use anyhow::{Context, Result};
use std::io::Write;

const BAR_WIDTH: usize = 8;

/// Text table written once per tick
pub struct PlainRenderer<W: Write> {
    out: W,
}

impl<W: Write> PlainRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Renderer for PlainRenderer<W> {
    fn render(&mut self, state: &AggregateState) -> Result<()> {
        let text = format_state(state);
        self.out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
            .context("Failed to write dashboard")
    }
}

pub fn format_state(state: &AggregateState) -> String {
    let mut out = format!(
        "== {} == {}/{} hosts OK\n",
        state.read_at.format("%H:%M:%S"),
        state.count_with_status(HostStatus::Ok),
        state.len()
    );
    for snapshot in &state.hosts {
        out.push_str(&format_host(snapshot));
    }
    out
}

pub fn format_host(snapshot: &HostSnapshot) -> String {
    match snapshot.status {
        HostStatus::Connecting => format!("{}  CONNECTING\n", snapshot.host),
        HostStatus::Timeout | HostStatus::Failed => {
            let reason = snapshot.reason.as_deref().unwrap_or("unknown error");
            let mut line = format!("{}  {}  {}", snapshot.host, snapshot.status, reason);
            if let Some(hint) = advice(reason) {
                line.push_str(&format!("  [{hint}]"));
            }
            line.push('\n');
            line
        }
        HostStatus::Ok => {
            let mut out = format!(
                "{}  OK  ({})\n",
                snapshot.host,
                snapshot.taken_at.format("%H:%M:%S")
            );
            if snapshot.gpus.is_empty() {
                out.push_str("  no GPUs reported\n");
            }
            for gpu in &snapshot.gpus {
                let mem = gpu.memory_percent();
                out.push_str(&format!(
                    "  {:>3}  {} {:>3}%  {} {:>3}%  {:>3}°C  {}\n",
                    gpu.index,
                    bar(gpu.utilization as f64, BAR_WIDTH),
                    gpu.utilization,
                    bar(mem, BAR_WIDTH),
                    mem as u64,
                    gpu.temperature_c,
                    gpu.name.as_deref().unwrap_or("")
                ));
            }
            out
        }
    }
}
