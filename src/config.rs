use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{Settings, Vault};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:51362".to_string()
}

/// Where vault search backends live. Every vault is reached at
/// `http://{host}:{vault.port}/search`.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    /// Per-request timeout. `None` leaves the transport default in place.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            timeout_secs: None,
        }
    }
}

fn default_backend_host() -> String {
    "localhost".to_string()
}

/// Values used when the settings store has nothing persisted yet.
#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default = "default_vaults")]
    pub vaults: Vec<Vault>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            vaults: default_vaults(),
        }
    }
}

fn default_vaults() -> Vec<Vault> {
    vec![Vault {
        name: "default".to_string(),
        port: 51361,
        active: true,
    }]
}

impl Config {
    /// A config that keeps its database under `dir`, used when no config
    /// file exists yet.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("omni.sqlite"),
            },
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.backend.host.trim().is_empty() {
        anyhow::bail!("backend.host must not be empty");
    }

    if config.backend.timeout_secs == Some(0) {
        anyhow::bail!("backend.timeout_secs must be > 0 when set");
    }

    // Seed values go through the same checks as a settings save
    crate::storage::validate_vaults(&config.defaults.vaults)
        .with_context(|| "Invalid [defaults] vault list")?;
    crate::storage::validate_settings(&config.defaults.settings)
        .with_context(|| "Invalid [defaults] settings")?;

    Ok(config)
}
