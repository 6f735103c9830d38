use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracklet_core::{CoreConfig, DeviceId};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub sessions: SessionsSection,
    #[serde(default)]
    pub devices: DevicesSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("default server config to parse")
    }
}

impl ServerConfig {
    pub fn merge(&mut self, other: &Self) {
        self.server.merge(&other.server);
        self.sessions.merge(&other.sessions);
        self.devices.merge(&other.devices);
    }

    /// The immutable parameters handed to the session store and reaper.
    #[must_use]
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            max_sessions: self.sessions.max_concurrent,
            idle_timeout: Duration::from_secs(self.sessions.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sessions.sweep_interval_secs),
            devices: self
                .devices
                .pool
                .iter()
                .map(|d| DeviceId::new(d.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl ServerSection {
    fn merge(&mut self, other: &Self) {
        if !other.host.is_empty() {
            self.host.clone_from(&other.host);
        }
        if other.port > 0 {
            self.port = other.port;
        }
        if !other.log_level.is_empty() {
            self.log_level.clone_from(&other.log_level);
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7410,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsSection {
    pub max_concurrent: usize,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl SessionsSection {
    fn merge(&mut self, other: &Self) {
        if other.max_concurrent > 0 {
            self.max_concurrent = other.max_concurrent;
        }
        if other.idle_timeout_secs > 0 {
            self.idle_timeout_secs = other.idle_timeout_secs;
        }
        if other.sweep_interval_secs > 0 {
            self.sweep_interval_secs = other.sweep_interval_secs;
        }
    }
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            idle_timeout_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesSection {
    pub pool: Vec<String>,
}

impl DevicesSection {
    fn merge(&mut self, other: &Self) {
        if !other.pool.is_empty() {
            self.pool.clone_from(&other.pool);
        }
    }
}

impl Default for DevicesSection {
    fn default() -> Self {
        Self {
            pool: vec!["cuda:0".to_string()],
        }
    }
}

pub struct ConfigManager {
    path: PathBuf,
    config: ServerConfig,
}

impl ConfigManager {
    pub fn load() -> Result<Self> {
        let path = default_config_path()?;
        Self::load_with_path(path)
    }

    pub fn load_with_path<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let mut config = ServerConfig::default();

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            let user_config: ServerConfig = toml::from_str(&contents)
                .with_context(|| format!("invalid config at {}", path.display()))?;
            config.merge(&user_config);
        }

        Ok(Self { path, config })
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }
        let toml = toml::to_string_pretty(&self.config)?;
        fs::write(&self.path, toml)
            .with_context(|| format!("failed to write config to {}", self.path.display()))?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base =
        dirs::config_dir().ok_or_else(|| anyhow!("unable to determine configuration directory"))?;
    Ok(base.join("tracklet").join("config.toml"))
}
