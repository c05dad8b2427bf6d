//! Configuration loading and validation
//!
//! Handles:
//! - TOML file lookup (`--config`, `GPUWATCH_CONFIG`, OS config dir)
//! - Command-line overrides (hosts, refresh interval)
//! - Validation into an immutable `Config` shared by every component

use crate::registry::HostRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "GPUWATCH_CONFIG";

pub const DEFAULT_REFRESH_SECS: f64 = 3.0;
pub const DEFAULT_INITIAL_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_STEADY_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_BACKOFF_MULTIPLIER: u32 = 8;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

pub const DEFAULT_PROGRAM: &str = "ssh";
pub const DEFAULT_QUERY_COMMAND: &str = "nvidia-smi --query-gpu=index,utilization.gpu,memory.used,memory.total,temperature.gpu,name --format=csv,noheader,nounits";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no hosts configured")]
    EmptyHosts,
    #[error("host #{0} has an empty name")]
    BlankHost(usize),
    #[error("host {0} is listed more than once")]
    DuplicateHost(String),
    #[error("refresh interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),
    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("steady-state timeout ({steady}s) exceeds initial timeout ({initial}s)")]
    TimeoutOrder { steady: u64, initial: u64 },
    #[error("max_backoff_multiplier must be at least 2, got {0}")]
    InvalidBackoff(u32),
    #[error("remote program is empty")]
    EmptyProgram,
    #[error("remote query command is empty")]
    EmptyQuery,
    #[error("invalid remote options: {0}")]
    RemoteOptions(#[from] shell_words::ParseError),
}

/// On-disk representation, every key optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub hosts: Vec<String>,
    pub refresh_interval_secs: Option<f64>,
    pub render_interval_secs: Option<f64>,
    pub initial_timeout_secs: Option<u64>,
    pub steady_timeout_secs: Option<u64>,
    pub max_backoff_multiplier: Option<u32>,
    pub shutdown_grace_ms: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub remote: RemoteConf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConf {
    pub program: Option<String>,
    /// Shell-style option string, e.g. `-o BatchMode=yes -p 2222`
    pub options: Option<String>,
    pub query_command: Option<String>,
}

/// Values given on the command line, applied over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub hosts: Vec<String>,
    pub refresh_interval_secs: Option<f64>,
}

/// How to reach a host: `program [options...] <host> <query_command>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub options: Vec<String>,
    pub query_command: String,
}

/// Validated, immutable runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub registry: HostRegistry,
    pub refresh_interval: Duration,
    pub render_interval: Duration,
    pub initial_timeout: Duration,
    pub steady_timeout: Duration,
    pub max_backoff_multiplier: u32,
    pub shutdown_grace: Duration,
    pub remote: RemoteCommand,
    pub log_file: Option<PathBuf>,
}

/// ssh options tuned for a dashboard: never prompt, multiplex the channel so
/// only the first connection pays the handshake.
pub fn default_ssh_options(connect_timeout_secs: u64) -> Vec<String> {
    [
        format!("ConnectTimeout={connect_timeout_secs}"),
        "BatchMode=yes".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "LogLevel=ERROR".to_string(),
        "GSSAPIAuthentication=no".to_string(),
        "ControlMaster=auto".to_string(),
        "ControlPath=/tmp/ssh_mux_%h_%p_%r".to_string(),
        "ControlPersist=600".to_string(),
    ]
    .into_iter()
    .flat_map(|opt| ["-o".to_string(), opt])
    .collect()
}

impl ConfigFile {
    /// Resolve and read the config file.
    ///
    /// An explicit path (argument or env var) must exist; the default
    /// location is optional and yields an empty `ConfigFile` when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                Self::read(&path)
            }
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// `<config dir>/gpuwatch/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("gpuwatch");
        path.push("config.toml");
        Some(path)
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if !overrides.hosts.is_empty() {
            self.hosts = overrides.hosts;
        }
        if let Some(secs) = overrides.refresh_interval_secs {
            self.refresh_interval_secs = Some(secs);
        }
        self
    }

    pub fn validate(self) -> Result<Config, ConfigError> {
        let registry = HostRegistry::new(self.hosts)?;

        let refresh_secs = self.refresh_interval_secs.unwrap_or(DEFAULT_REFRESH_SECS);
        let refresh_interval = positive_secs(refresh_secs)?;
        let render_interval = match self.render_interval_secs {
            Some(secs) => positive_secs(secs)?,
            None => refresh_interval,
        };

        let initial = self.initial_timeout_secs.unwrap_or(DEFAULT_INITIAL_TIMEOUT_SECS);
        let steady = self.steady_timeout_secs.unwrap_or(DEFAULT_STEADY_TIMEOUT_SECS);
        if initial == 0 {
            return Err(ConfigError::ZeroTimeout("initial"));
        }
        if steady == 0 {
            return Err(ConfigError::ZeroTimeout("steady-state"));
        }
        if steady > initial {
            return Err(ConfigError::TimeoutOrder { steady, initial });
        }

        let max_backoff_multiplier = self
            .max_backoff_multiplier
            .unwrap_or(DEFAULT_MAX_BACKOFF_MULTIPLIER);
        if max_backoff_multiplier < 2 {
            return Err(ConfigError::InvalidBackoff(max_backoff_multiplier));
        }

        let program = self.remote.program.unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
        if program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        let options = match self.remote.options {
            Some(raw) => shell_words::split(&raw)?,
            None => default_ssh_options(initial),
        };
        let query_command = self
            .remote
            .query_command
            .unwrap_or_else(|| DEFAULT_QUERY_COMMAND.to_string());
        if query_command.trim().is_empty() {
            return Err(ConfigError::EmptyQuery);
        }

        Ok(Config {
            registry,
            refresh_interval,
            render_interval,
            initial_timeout: Duration::from_secs(initial),
            steady_timeout: Duration::from_secs(steady),
            max_backoff_multiplier,
            shutdown_grace: Duration::from_millis(
                self.shutdown_grace_ms.unwrap_or(DEFAULT_SHUTDOWN_GRACE_MS),
            ),
            remote: RemoteCommand {
                program,
                options,
                query_command,
            },
            log_file: self.log_file,
        })
    }
}

fn positive_secs(secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(interval) if !interval.is_zero() => Ok(interval),
        _ => Err(ConfigError::InvalidInterval(secs)),
    }
}
