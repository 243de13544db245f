//! `omni vaults` and `omni settings`: edit the sync area from the terminal.
//!
//! Writes go through [`SettingsStore`], so the same validation applies as
//! for the HTTP API. A running daemon sharing the database picks the change
//! up on its next event; it does not see CLI writes as storage changes.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::models::{SearchType, SettingsPatch, Theme, Vault};
use crate::storage::{KeyValueStore, SettingsStore, SqliteStore};

async fn open_store(config: &Config) -> Result<(Arc<SqliteStore>, SettingsStore)> {
    let kv = Arc::new(SqliteStore::open(config).await?);
    let store: Arc<dyn KeyValueStore> = kv.clone();
    Ok((kv, SettingsStore::new(store, config.defaults.clone())))
}

fn print_vaults(vaults: &[Vault]) {
    if vaults.is_empty() {
        println!("No vaults configured.");
        return;
    }
    println!("{:<20} {:<8} ACTIVE", "VAULT", "PORT");
    for vault in vaults {
        println!("{:<20} {:<8} {}", vault.name, vault.port, vault.active);
    }
}

pub async fn list_vaults(config: &Config) -> Result<()> {
    let (kv, store) = open_store(config).await?;
    let vaults = store.vaults().await?;
    kv.close().await;
    print_vaults(&vaults);
    Ok(())
}

pub async fn add_vault(config: &Config, name: &str, port: u16, inactive: bool) -> Result<()> {
    let (kv, store) = open_store(config).await?;
    let result = store
        .add_vault(Vault {
            name: name.trim().to_string(),
            port,
            active: !inactive,
        })
        .await;
    kv.close().await;
    print_vaults(&result?);
    Ok(())
}

pub async fn remove_vault(config: &Config, name: &str) -> Result<()> {
    let (kv, store) = open_store(config).await?;
    let result = store.remove_vault(name).await;
    kv.close().await;
    print_vaults(&result?);
    Ok(())
}

pub async fn set_vault_active(config: &Config, name: &str, active: bool) -> Result<()> {
    let (kv, store) = open_store(config).await?;
    let result = store.set_vault_active(name, active).await;
    kv.close().await;
    print_vaults(&result?);
    Ok(())
}

pub async fn show_settings(config: &Config) -> Result<()> {
    let (kv, store) = open_store(config).await?;
    let settings = store.settings().await;
    kv.close().await;
    let settings = settings?;

    println!("notesShown:  {}", settings.notes_shown);
    println!("notesScore:  {}", settings.notes_score);
    println!("searchType:  {}", settings.search_type);
    println!("theme:       {:?}", settings.theme);
    Ok(())
}

/// Builds a patch from CLI flags. Unknown enum spellings are rejected here
/// rather than silently ignored.
pub fn settings_patch(
    notes_shown: Option<usize>,
    notes_score: Option<f64>,
    search_type: Option<&str>,
    theme: Option<&str>,
) -> Result<SettingsPatch> {
    let search_type = match search_type {
        Some(s) => match SearchType::parse(s) {
            Some(t) => Some(t),
            None => bail!(
                "Unknown search type '{}'. Use auto, query, full-url, partial-url or title.",
                s
            ),
        },
        None => None,
    };
    let theme = match theme {
        Some(s) => match Theme::parse(s) {
            Some(t) => Some(t),
            None => bail!("Unknown theme '{}'. Use light or dark.", s),
        },
        None => None,
    };

    Ok(SettingsPatch {
        notes_shown,
        notes_score,
        search_type,
        theme,
    })
}

pub async fn update_settings(config: &Config, patch: SettingsPatch) -> Result<()> {
    if patch == SettingsPatch::default() {
        bail!("Nothing to change. Pass at least one of --notes-shown, --notes-score, --search-type, --theme.");
    }
    let (kv, store) = open_store(config).await?;
    let result = store.update_settings(&patch).await;
    kv.close().await;
    let settings = result?;
    println!(
        "Settings updated: notesShown={} notesScore={} searchType={} theme={:?}",
        settings.notes_shown, settings.notes_score, settings.search_type, settings.theme
    );
    Ok(())
}
