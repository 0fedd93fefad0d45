use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::guest::GuestOs;

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// ID of the Utility VM this agent serves
    pub vm_id: String,

    /// Guest OS family
    pub guest_os: GuestOs,

    /// Directory holding the per-VM compute agent socket
    pub socket_dir: PathBuf,

    /// Unix socket of the guest channel
    pub guest_socket: PathBuf,

    /// Unix socket of the host compute system
    pub host_socket: PathBuf,

    /// JSON file with the known network endpoints
    pub endpoints_file: PathBuf,

    /// Upper bound on a single guest or host request
    pub guest_timeout_ms: u64,

    /// Log level
    pub log_level: LogLevel,

    /// Log output format
    pub log_format: LogFormat,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            vm_id: String::new(),
            guest_os: GuestOs::default(),
            socket_dir: PathBuf::from("/var/run/uvmagent"),
            guest_socket: PathBuf::from("/var/run/uvmagent/guest.sock"),
            host_socket: PathBuf::from("/var/run/uvmagent/host.sock"),
            endpoints_file: PathBuf::from("/var/lib/uvmagent/endpoints.json"),
            guest_timeout_ms: 30_000,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
        }
    }
}

impl AgentConfig {
    /// Load a YAML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            AgentError::ConfigError(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: AgentConfig = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.vm_id.trim().is_empty() {
            return Err(AgentError::ConfigError("vm_id is required".to_string()));
        }
        if self.vm_id.contains('/') {
            return Err(AgentError::ConfigError(format!(
                "vm_id must not contain '/': {}",
                self.vm_id
            )));
        }
        if self.guest_timeout_ms == 0 {
            return Err(AgentError::ConfigError(
                "guest_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn guest_timeout(&self) -> Duration {
        Duration::from_millis(self.guest_timeout_ms)
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format: '{}' (supported: text, json)", s)),
        }
    }
}
