//! Configuration management for the PVE inventory exporter.
//!
//! Supports loading configuration from:
//! - TOML configuration files
//! - Environment variables (with `PVE_INVENTORY_` prefix)
//! - Command-line arguments

use crate::error::{PveError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// PVE server connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct PveConfig {
    /// PVE API endpoint URL (e.g., "https://pve.example.com:8006")
    pub endpoint: String,

    /// Username including its realm (e.g., "audit@pve" or "root@pam")
    #[serde(default)]
    pub username: String,

    /// Password for ticket authentication
    #[serde(default)]
    pub password: String,

    /// Verify TLS certificates (set to false for self-signed certs)
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Seconds an authentication ticket is trusted before a fresh login
    /// (PVE tickets expire after two hours; keep a margin)
    #[serde(default = "default_ticket_lifetime")]
    pub ticket_lifetime_secs: u64,
}

impl std::fmt::Debug for PveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PveConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .field("ticket_lifetime_secs", &self.ticket_lifetime_secs)
            .finish()
    }
}

/// Export specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    /// Destination CSV path ("-" writes to stdout)
    #[serde(default = "default_output")]
    pub output: String,
    /// Only include guests whose status is "running"
    #[serde(default)]
    pub running_only: bool,
    /// Query the QEMU guest agent for filesystem usage columns
    #[serde(default = "default_agent_fsinfo")]
    pub agent_fsinfo: bool,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Main configuration structure for the inventory exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// PVE server configuration
    pub pve: PveConfig,

    /// Export configuration
    pub export: ExportConfig,
}

fn default_verify_tls() -> bool {
    false
}

fn default_timeout() -> u64 {
    30
}

fn default_ticket_lifetime() -> u64 {
    6600 // 110 minutes, inside the two-hour ticket window
}

fn default_output() -> String {
    "vmlist.csv".to_string()
}

fn default_agent_fsinfo() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load configuration from a file and environment variables.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to configuration file
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pve_inventory::config::Settings;
    ///
    /// let settings = Settings::load(Some("config/default.toml")).unwrap();
    /// ```
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        // Add environment variables with PVE_INVENTORY_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("PVE_INVENTORY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings.
    fn validate(&self) -> Result<()> {
        if self.pve.endpoint.is_empty() {
            return Err(PveError::Config(config::ConfigError::Message(
                "PVE endpoint cannot be empty".to_string(),
            )));
        }

        if self.pve.username.is_empty() || self.pve.password.is_empty() {
            return Err(PveError::Config(config::ConfigError::Message(
                "PVE username and password are required".to_string(),
            )));
        }

        if !self.pve.username.contains('@') {
            return Err(PveError::Config(config::ConfigError::Message(
                "PVE username must include its realm (e.g., \"audit@pve\")".to_string(),
            )));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pve: PveConfig {
                endpoint: "https://localhost:8006".to_string(),
                username: String::new(),
                password: String::new(),
                verify_tls: default_verify_tls(),
                timeout_secs: default_timeout(),
                ticket_lifetime_secs: default_ticket_lifetime(),
            },
            export: ExportConfig {
                output: default_output(),
                running_only: false,
                agent_fsinfo: default_agent_fsinfo(),
                log_level: default_log_level(),
            },
        }
    }
}
