//! gpuwatch - live GPU usage of a small cluster, over ssh
//!
//! `gpuwatch [HOSTS]...` opens the dashboard, `gpuwatch probe` queries every
//! host once and prints a report.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gpuwatch::executor::program_available;
use gpuwatch::logging::{self, LogTarget};
use gpuwatch::render::{tui, PlainRenderer, TuiRenderer};
use gpuwatch::{
    probe, AggregateState, CommandExecutor, Config, ConfigError, ConfigFile, Engine, HostStatus,
    Overrides, RemoteExecutor, Renderer, Scheduler,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gpuwatch", version)]
#[command(about = "Live GPU dashboard for hosts reachable over ssh", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Open the live dashboard (default)
    Run(RunArgs),
    /// Query every host once, print a report and exit
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct CommonArgs {
    /// Config file [default: $GPUWATCH_CONFIG or <config dir>/gpuwatch/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `gpuwatch=debug`
    #[arg(long)]
    log_level: Option<String>,

    /// Hosts to monitor (ssh aliases), replacing the configured list
    hosts: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Refresh interval in seconds
    #[arg(short, long)]
    interval: Option<f64>,

    /// Print a text table on every refresh instead of the full-screen view
    #[arg(long, default_value_t = false)]
    plain: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct ProbeArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Print the result as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run(cli.run)) {
        Command::Run(args) => run_dashboard(args).await,
        Command::Probe(args) => run_probe(args).await,
    }
}

fn load_config(common: &CommonArgs, interval: Option<f64>) -> Result<Config, ConfigError> {
    ConfigFile::load(common.config.as_deref())?
        .apply(Overrides {
            hosts: common.hosts.clone(),
            refresh_interval_secs: interval,
        })
        .validate()
}

/// Config, logging and preflight shared by both commands
fn prepare(
    common: &CommonArgs,
    interval: Option<f64>,
    target: impl FnOnce(&Config) -> LogTarget,
) -> Result<Config, ExitCode> {
    let config = load_config(common, interval).map_err(|e| {
        eprintln!("gpuwatch: invalid configuration: {e}");
        ExitCode::from(2)
    })?;

    if let Err(e) = logging::init(&target(&config), common.log_level.as_deref()) {
        eprintln!("gpuwatch: {e:#}");
        return Err(ExitCode::FAILURE);
    }

    if !program_available(&config.remote.program) {
        eprintln!("gpuwatch: `{}` not found on PATH", config.remote.program);
        return Err(ExitCode::FAILURE);
    }

    Ok(config)
}

async fn run_dashboard(args: RunArgs) -> ExitCode {
    let plain = args.plain;
    let log_target = |config: &Config| match (&config.log_file, plain) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::Stderr,
        (None, false) => LogTarget::Off,
    };
    let config = match prepare(&args.common, args.interval, log_target) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match dashboard(config, plain).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gpuwatch: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dashboard(config: Config, plain: bool) -> Result<()> {
    // The terminal is set up before any poller runs so a failure leaves nothing behind
    let mut renderer: Box<dyn Renderer> = if plain {
        Box::new(PlainRenderer::new(io::stdout()))
    } else {
        Box::new(TuiRenderer::stdout().context("Failed to set up terminal")?)
    };

    let executor: Arc<dyn RemoteExecutor> = Arc::new(CommandExecutor::new(config.remote.clone()));
    let engine = Engine::start(&config, executor);
    let cancel = engine.cancel_token();

    let signals = spawn_signal_listener(cancel.clone());
    let keys = (!plain).then(|| tui::spawn_key_listener(cancel.clone()));

    let scheduler = Scheduler::new(engine.aggregator().clone(), config.render_interval);
    let result = scheduler.run(renderer.as_mut(), &cancel).await;

    cancel.cancel();
    drop(renderer);
    if let Some(keys) = keys {
        keys.abort();
    }
    signals.abort();
    engine.shutdown().await;

    let frames = result?;
    info!(frames, "shutdown complete");
    Ok(())
}

fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => {
                    info!("interrupt received, shutting down");
                    cancel.cancel();
                }
                Err(e) => warn!("failed to listen for ctrl-c: {}", e),
            }
        }
    })
}

async fn run_probe(args: ProbeArgs) -> ExitCode {
    let config = match prepare(&args.common, None, |config| match &config.log_file {
        Some(path) => LogTarget::File(path.clone()),
        None => LogTarget::Stderr,
    }) {
        Ok(config) => config,
        Err(code) => return code,
    };

    println!("Probing {} hosts...", config.registry.len());
    let executor: Arc<dyn RemoteExecutor> = Arc::new(CommandExecutor::new(config.remote.clone()));
    let state = probe(&config, executor).await;

    if args.json {
        match serde_json::to_string_pretty(&state) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("gpuwatch: failed to serialize report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", probe_report(&state));
    }

    if state.all_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn probe_report(state: &AggregateState) -> String {
    let mut out = String::new();
    for snapshot in &state.hosts {
        match snapshot.status {
            HostStatus::Ok => {
                out.push_str(&format!("[ok] {}: {} GPUs\n", snapshot.host, snapshot.gpus.len()));
                for gpu in &snapshot.gpus {
                    out.push_str(&format!(
                        "   └─ {}: {}% util, {}/{} MiB, {}°C {}\n",
                        gpu.index,
                        gpu.utilization,
                        gpu.memory_used_mib,
                        gpu.memory_total_mib,
                        gpu.temperature_c,
                        gpu.name.as_deref().unwrap_or("")
                    ));
                }
            }
            status => out.push_str(&format!(
                "[!!] {}: {} - {}\n",
                snapshot.host,
                status,
                snapshot.reason.as_deref().unwrap_or("no reason given")
            )),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use gpuwatch::{GpuMetricRecord, HostSnapshot};

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::try_parse_from(["gpuwatch", "server2", "server3", "--plain"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.common.hosts, vec!["server2", "server3"]);
        assert!(cli.run.plain);
    }

    #[test]
    fn test_cli_probe_subcommand() {
        let cli = Cli::try_parse_from(["gpuwatch", "probe", "--json", "server4"]).unwrap();
        match cli.command {
            Some(Command::Probe(args)) => {
                assert!(args.json);
                assert_eq!(args.common.hosts, vec!["server4"]);
            }
            _ => panic!("expected probe"),
        }
    }

    #[test]
    fn test_probe_report() {
        let state = AggregateState {
            hosts: vec![
                Arc::new(HostSnapshot::ok(
                    "server2",
                    vec![GpuMetricRecord {
                        index: 0,
                        utilization: 45,
                        memory_used_mib: 2048,
                        memory_total_mib: 8192,
                        temperature_c: 63,
                        name: None,
                    }],
                )),
                Arc::new(HostSnapshot::timed_out("server3", "SSH timed out after 20s")),
            ],
            read_at: Local::now(),
        };
        let report = probe_report(&state);
        assert!(report.contains("[ok] server2: 1 GPUs"));
        assert!(report.contains("0: 45% util, 2048/8192 MiB, 63°C"));
        assert!(report.contains("[!!] server3: TIMEOUT - SSH timed out after 20s"));
    }
}
