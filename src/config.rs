//! Layered configuration for relaycode.
//!
//! Settings come from `relay.toml` (or `--config`), then `RELAY_*`
//! environment variables (a `.env` file is honoured), then CLI flags.
//! A missing default config file means built-in defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! keepalive_secs = 5
//! dev_mode = false
//! seed = "demo/seed.json"
//!
//! [simulation]
//! failure_probability = 0.3
//! cancel_on_revert = false
//! default_duration = { min_ms = 2000, max_ms = 6000 }
//! fast_success = { min_ms = 500, max_ms = 1000 }
//! long_running = { min_ms = 8000, max_ms = 12000 }
//! file_delay = { min_ms = 600, max_ms = 2000 }
//!
//! [client]
//! base_url = "http://127.0.0.1:3141"
//! base_delay_ms = 1000
//! max_delay_ms = 30000
//! max_attempts = 5
//! idle_timeout_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::relay::client::ReconnectPolicy;
use crate::relay::simulation::SimulationConfig;

pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    /// Permissive CORS for a local UI dev server.
    pub dev_mode: bool,
    /// Seed file replacing the built-in demo data.
    pub seed: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            keepalive_secs: 5,
            dev_mode: false,
            seed: None,
        }
    }
}

impl ServerSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub base_url: String,
    #[serde(flatten)]
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3141".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSection,
    pub simulation: SimulationConfig,
    pub client: ClientSection,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse relay.toml")
    }

    /// An explicit path must exist; otherwise `relay.toml` in the working
    /// directory is used when present.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `RELAY_PORT`, `RELAY_HOST` and `RELAY_SEED` from the process
    /// environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("RELAY_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("RELAY_PORT is not a valid port: {}", port))?;
        }
        if let Some(host) = lookup("RELAY_HOST").filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(seed) = lookup("RELAY_SEED").filter(|s| !s.trim().is_empty()) {
            self.server.seed = Some(PathBuf::from(seed.trim()));
        }
        Ok(())
    }
}
