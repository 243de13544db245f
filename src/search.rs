//! One pass of the search pipeline: extract candidates, fan out to the
//! active vaults, merge and rank.
//!
//! Used by the coordinator for every browser event and by `omni search`
//! for one-off lookups from the terminal.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::fetch::VaultFetcher;
use crate::models::{Candidate, Snapshot, Tab, Trigger, Vault};
use crate::query::{self, extract_candidates};
use crate::rank::{aggregate, Ranked};
use crate::storage::{KeyValueStore, SettingsStore, SqliteStore};

/// Separator used when several candidates make up one displayed query.
pub const QUERY_SEPARATOR: &str = " | ";

/// Everything one pipeline pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub candidates: Vec<Candidate>,
    pub ranked: Ranked,
    /// Vault list at the time of the run (active and inactive).
    pub vaults: Vec<Vault>,
}

impl SearchOutcome {
    /// Display form of the candidates, `None` when nothing was searched.
    pub fn query(&self) -> Option<String> {
        if self.candidates.is_empty() {
            None
        } else {
            Some(
                self.candidates
                    .iter()
                    .map(|c| c.query.as_str())
                    .collect::<Vec<_>>()
                    .join(QUERY_SEPARATOR),
            )
        }
    }

    pub fn into_snapshot(self, cycle: u64) -> Snapshot {
        let query = self.query();
        Snapshot {
            cycle,
            query,
            raw_notes: self.ranked.raw_notes,
            notes: self.ranked.notes,
            errors: self.ranked.errors,
            vaults: self.vaults,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    settings: SettingsStore,
    fetcher: VaultFetcher,
}

impl Pipeline {
    pub fn new(settings: SettingsStore, fetcher: VaultFetcher) -> Self {
        Self { settings, fetcher }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Runs one pass for `trigger`. A trigger with no usable candidates
    /// short-circuits before any request is made.
    pub async fn run(&self, trigger: &Trigger) -> Result<SearchOutcome> {
        let settings = self.settings.settings().await?;
        let vaults = self.settings.vaults().await?;

        let candidates = extract_candidates(trigger, &settings);
        if candidates.is_empty() {
            tracing::debug!("trigger produced no candidate queries");
            return Ok(SearchOutcome {
                vaults,
                ..Default::default()
            });
        }

        let active: Vec<Vault> = vaults.iter().filter(|v| v.active).cloned().collect();
        let queries: Vec<String> = candidates.iter().map(|c| c.query.clone()).collect();
        tracing::info!(
            queries = queries.len(),
            vaults = active.len(),
            first = %query::short_query(&queries[0], query::SHORT_QUERY_CHARS),
            "searching vaults"
        );

        let fetched = self.fetcher.fetch_all(&queries, &active).await;
        let ranked = aggregate(fetched.notes, fetched.errors, &settings);

        Ok(SearchOutcome {
            candidates,
            ranked,
            vaults,
        })
    }
}

/// `omni search`: runs a single pass and prints the ranked notes.
pub async fn run_search(
    config: &Config,
    text: &str,
    url: Option<String>,
    title: Option<String>,
) -> Result<()> {
    let trigger = match url {
        Some(url) => Trigger::Tab(Tab {
            url: Some(url),
            title,
            active: true,
            ..Default::default()
        }),
        None => Trigger::Text(text.to_string()),
    };

    let kv = Arc::new(SqliteStore::open(config).await?);
    let store: Arc<dyn KeyValueStore> = kv.clone();
    let pipeline = Pipeline::new(
        SettingsStore::new(store, config.defaults.clone()),
        VaultFetcher::new(&config.backend)?,
    );

    let outcome = pipeline.run(&trigger).await?;
    kv.close().await;

    let query = match outcome.query() {
        Some(q) => q,
        None => {
            println!("Nothing to search for.");
            return Ok(());
        }
    };

    println!("Search query: {}", query);
    for vault in &outcome.ranked.errors {
        println!(
            "  ! vault '{}' (port {}) did not respond",
            vault.name, vault.port
        );
    }
    if outcome.vaults.iter().all(|v| !v.active) {
        println!("No active vaults configured.");
        return Ok(());
    }

    if outcome.ranked.notes.is_empty() {
        println!("No notes match this query.");
        return Ok(());
    }

    for (i, note) in outcome.ranked.notes.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            note.score,
            note.vault,
            note.basename
        );
        println!("    path: {}", note.path);
        if !note.found_words.is_empty() {
            println!("    matched: {}", note.found_words.join(", "));
        }
        println!("    excerpt: \"{}\"", note.excerpt.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}
