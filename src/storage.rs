//! Settings store and the key-value areas behind it.
//!
//! Mirrors the browser's storage model: a `sync` area for user
//! configuration (`settings`, `vaults`) and a `local` area for the
//! daemon's own bookkeeping (the last published snapshot). Every write
//! emits a [`StorageChange`] so the coordinator can tell a settings edit
//! apart from its own snapshot writes.
//!
//! Two backends implement [`KeyValueStore`]:
//!
//! - [`SqliteStore`]: persistent, one `storage` table keyed by `(area, key)`.
//! - [`MemoryStore`]: ephemeral, for tests and throwaway daemons.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::{Config, DefaultsConfig};
use crate::migrate;
use crate::models::{Settings, SettingsPatch, Vault};

pub const SETTINGS_KEY: &str = "settings";
pub const VAULTS_KEY: &str = "vaults";

const CHANGE_BUFFER: usize = 64;

/// The daemon and one-off CLI commands share the database file; a writer
/// waits this long for the other side's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Sync,
    Local,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Sync => "sync",
            StorageArea::Local => "local",
        }
    }
}

impl fmt::Display for StorageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted after a write lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub area: StorageArea,
    pub keys: Vec<String>,
}

/// Asynchronous string key-value storage split into areas.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<String>>;

    /// Writes all entries, then emits one [`StorageChange`].
    async fn set(&self, area: StorageArea, entries: Vec<(String, String)>) -> Result<()>;

    async fn remove(&self, area: StorageArea, keys: &[String]) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

// ============ SQLite backend ============

pub struct SqliteStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StorageChange>,
}

impl SqliteStore {
    /// Connects to the configured database and makes sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = connect(&config.db.path).await?;
        migrate::migrate_pool(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self { pool, changes })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open store at {}", path.display()))
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM storage WHERE area = ? AND key = ?")
            .bind(area.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, area: StorageArea, entries: Vec<(String, String)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (key, value) in &entries {
            sqlx::query(
                r#"
                INSERT INTO storage (area, key, value, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(area, key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(area.as_str())
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let _ = self.changes.send(StorageChange {
            area,
            keys: entries.into_iter().map(|(k, _)| k).collect(),
        });
        Ok(())
    }

    async fn remove(&self, area: StorageArea, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM storage WHERE area = ? AND key = ?")
                .bind(area.as_str())
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let _ = self.changes.send(StorageChange {
            area,
            keys: keys.to_vec(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// ============ In-memory backend ============

pub struct MemoryStore {
    values: RwLock<HashMap<(StorageArea, String), String>>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<String>> {
        let values = self.values.read().map_err(poisoned)?;
        Ok(values.get(&(area, key.to_string())).cloned())
    }

    async fn set(&self, area: StorageArea, entries: Vec<(String, String)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        {
            let mut values = self.values.write().map_err(poisoned)?;
            for (key, value) in entries {
                values.insert((area, key), value);
            }
        }
        let _ = self.changes.send(StorageChange { area, keys });
        Ok(())
    }

    async fn remove(&self, area: StorageArea, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        {
            let mut values = self.values.write().map_err(poisoned)?;
            for key in keys {
                values.remove(&(area, key.clone()));
            }
        }
        let _ = self.changes.send(StorageChange {
            area,
            keys: keys.to_vec(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

// ============ Settings validation ============

/// Configuration that must never be persisted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("vaults '{first}' and '{second}' both use port {port}")]
    DuplicatePort {
        port: u16,
        first: String,
        second: String,
    },

    #[error("vault name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("vault name must not be empty")]
    EmptyName,

    #[error("vault '{0}' has port 0; ports must be in 1..=65535")]
    InvalidPort(String),

    #[error("notesScore must be a number in 0..=100, got {0}")]
    InvalidScore(f64),

    #[error("no vault named '{0}'")]
    UnknownVault(String),
}

pub fn validate_vaults(vaults: &[Vault]) -> Result<(), SettingsError> {
    let mut names = HashSet::new();
    let mut ports: HashMap<u16, &str> = HashMap::new();

    for vault in vaults {
        let name = vault.name.trim();
        if name.is_empty() {
            return Err(SettingsError::EmptyName);
        }
        if vault.port == 0 {
            return Err(SettingsError::InvalidPort(vault.name.clone()));
        }
        if !names.insert(name) {
            return Err(SettingsError::DuplicateName(vault.name.clone()));
        }
        if let Some(first) = ports.insert(vault.port, &vault.name) {
            return Err(SettingsError::DuplicatePort {
                port: vault.port,
                first: first.to_string(),
                second: vault.name.clone(),
            });
        }
    }
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if !settings.notes_score.is_finite() || !(0.0..=100.0).contains(&settings.notes_score) {
        return Err(SettingsError::InvalidScore(settings.notes_score));
    }
    Ok(())
}

// ============ Settings store ============

/// Typed access to the `sync` area.
#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    defaults: DefaultsConfig,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, defaults: DefaultsConfig) -> Self {
        Self { kv, defaults }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Stored settings, with defaults for anything never saved.
    pub async fn settings(&self) -> Result<Settings> {
        match self.kv.get(StorageArea::Sync, SETTINGS_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).with_context(|| "Stored settings are corrupt"),
            None => Ok(self.defaults.settings.clone()),
        }
    }

    /// Merges `patch` over the current settings and persists the result.
    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<Settings> {
        let merged = self.settings().await?.merged(patch);
        validate_settings(&merged)?;
        self.kv
            .set(
                StorageArea::Sync,
                vec![(SETTINGS_KEY.to_string(), serde_json::to_string(&merged)?)],
            )
            .await?;
        Ok(merged)
    }

    pub async fn vaults(&self) -> Result<Vec<Vault>> {
        match self.kv.get(StorageArea::Sync, VAULTS_KEY).await? {
            Some(raw) => {
                serde_json::from_str(&raw).with_context(|| "Stored vault list is corrupt")
            }
            None => Ok(self.defaults.vaults.clone()),
        }
    }

    pub async fn active_vaults(&self) -> Result<Vec<Vault>> {
        Ok(self.vaults().await?.into_iter().filter(|v| v.active).collect())
    }

    /// Replaces the vault list. Rejected lists are never written.
    pub async fn save_vaults(&self, vaults: &[Vault]) -> Result<()> {
        validate_vaults(vaults)?;
        self.kv
            .set(
                StorageArea::Sync,
                vec![(VAULTS_KEY.to_string(), serde_json::to_string(vaults)?)],
            )
            .await
    }

    pub async fn add_vault(&self, vault: Vault) -> Result<Vec<Vault>> {
        let mut vaults = self.vaults().await?;
        vaults.push(vault);
        self.save_vaults(&vaults).await?;
        Ok(vaults)
    }

    pub async fn remove_vault(&self, name: &str) -> Result<Vec<Vault>> {
        let mut vaults = self.vaults().await?;
        let before = vaults.len();
        vaults.retain(|v| v.name != name);
        if vaults.len() == before {
            return Err(SettingsError::UnknownVault(name.to_string()).into());
        }
        self.save_vaults(&vaults).await?;
        Ok(vaults)
    }

    pub async fn set_vault_active(&self, name: &str, active: bool) -> Result<Vec<Vault>> {
        let mut vaults = self.vaults().await?;
        let vault = vaults
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| SettingsError::UnknownVault(name.to_string()))?;
        vault.active = active;
        self.save_vaults(&vaults).await?;
        Ok(vaults)
    }
}
