//! Core data models shared by the search pipeline, the settings store and
//! the HTTP surface.
//!
//! JSON field names follow the browser side (`camelCase`, `"Full URL"`
//! search types) so payloads pass through the extension shim untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A configured local search backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vault {
    /// Unique key shown in the UI.
    pub name: String,
    pub port: u16,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// A single word match inside a note, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    #[serde(rename = "match")]
    pub text: String,
    pub offset: i64,
}

/// A search result returned by a vault backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub score: f64,
    #[serde(default)]
    pub vault: String,
    pub path: String,
    pub basename: String,
    #[serde(default)]
    pub found_words: Vec<String>,
    #[serde(default)]
    pub matches: Vec<SearchMatch>,
    #[serde(default)]
    pub excerpt: String,
}

/// Strategy for turning a tab into search queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SearchType {
    #[default]
    Auto,
    Query,
    #[serde(rename = "Full URL")]
    FullUrl,
    #[serde(rename = "Partial URL")]
    PartialUrl,
    Title,
}

impl SearchType {
    pub fn label(&self) -> &'static str {
        match self {
            SearchType::Auto => "Auto",
            SearchType::Query => "Query",
            SearchType::FullUrl => "Full URL",
            SearchType::PartialUrl => "Partial URL",
            SearchType::Title => "Title",
        }
    }

    /// Parses both the display label and a CLI-friendly kebab form
    /// (`full-url`, `partial-url`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(SearchType::Auto),
            "query" => Some(SearchType::Query),
            "full url" | "full-url" | "fullurl" => Some(SearchType::FullUrl),
            "partial url" | "partial-url" | "partialurl" => Some(SearchType::PartialUrl),
            "title" => Some(SearchType::Title),
            _ => None,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

/// Result-shaping settings. Missing fields fall back to defaults, so a
/// partially stored record still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Maximum number of notes shown after ranking.
    pub notes_shown: usize,
    /// Notes must score strictly above this to be shown.
    pub notes_score: f64,
    pub search_type: SearchType,
    pub theme: Theme,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            notes_shown: 25,
            notes_score: 10.0,
            search_type: SearchType::Auto,
            theme: Theme::Light,
        }
    }
}

/// A partial settings update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_shown: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_type: Option<SearchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

impl Settings {
    pub fn merged(&self, patch: &SettingsPatch) -> Settings {
        Settings {
            notes_shown: patch.notes_shown.unwrap_or(self.notes_shown),
            notes_score: patch.notes_score.unwrap_or(self.notes_score),
            search_type: patch.search_type.unwrap_or(self.search_type),
            theme: patch.theme.unwrap_or(self.theme),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

/// Host-provided tab metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TabStatus>,
}

/// What a pipeline run searches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Selection or link text; searched verbatim.
    Text(String),
    Tab(Tab),
}

/// Which derivation produced a candidate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateOrigin {
    /// Explicit selection or link text.
    Text,
    Query,
    #[serde(rename = "Full URL")]
    FullUrl,
    #[serde(rename = "Partial URL")]
    PartialUrl,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub query: String,
    pub origin: CandidateOrigin,
}

/// The latest completed pipeline run, as delivered to popups and persisted
/// for popup reopening.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Monotonic run number; `0` means nothing has run yet.
    #[serde(default)]
    pub cycle: u64,
    pub query: Option<String>,
    #[serde(default)]
    pub raw_notes: Vec<Note>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub errors: Vec<Vault>,
    /// Vault list the run was made against.
    #[serde(default)]
    pub vaults: Vec<Vault>,
}

impl Snapshot {
    pub fn active_vault_count(&self) -> usize {
        self.vaults.iter().filter(|v| v.active).count()
    }
}
