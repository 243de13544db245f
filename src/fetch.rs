//! Multi-vault fetcher.
//!
//! Sends one `GET /search?q=...` per (query, vault) pair, all at once, and
//! waits for every response. A vault that fails (connection refused,
//! non-2xx, unparsable body, transport timeout) is reported back as data;
//! it never aborts the other requests.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::models::{Note, Vault};

/// Outcome of a single (query, vault) request.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultResult {
    pub notes: Vec<Note>,
    pub error: Option<Vault>,
}

/// Flattened outcome of a whole fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    /// Raw notes in request order: query-major, then vault order.
    pub notes: Vec<Note>,
    /// Each failing vault once, in first-failure order.
    pub errors: Vec<Vault>,
}

/// HTTP client for vault search backends.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct VaultFetcher {
    /// Shared reqwest client with the configured timeout, if any.
    client: reqwest::Client,
    /// Host every vault listens on; only the port differs per vault.
    host: String,
}

impl VaultFetcher {
    /// Builds the client from `[backend]`. Without `timeout_secs` no
    /// explicit timeout is set and a hung backend stalls only its own run.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .with_context(|| "Failed to build HTTP client")?;
        Ok(Self {
            client,
            host: config.host.clone(),
        })
    }

    /// `http://{host}:{port}/search`, without the query string.
    pub fn search_url(&self, vault: &Vault) -> String {
        format!("http://{}:{}/search", self.host, vault.port)
    }

    /// Queries every vault with every query concurrently and waits for all
    /// of them. Never fails: unreachable vaults end up in
    /// [`FetchOutcome::errors`].
    pub async fn fetch_all(&self, queries: &[String], vaults: &[Vault]) -> FetchOutcome {
        let requests = queries
            .iter()
            .flat_map(|query| vaults.iter().map(move |vault| self.fetch_one(query, vault)));
        let results = join_all(requests).await;

        let mut outcome = FetchOutcome::default();
        for result in results {
            outcome.notes.extend(result.notes);
            if let Some(vault) = result.error {
                if !outcome.errors.contains(&vault) {
                    outcome.errors.push(vault);
                }
            }
        }
        outcome
    }

    /// Runs one request and folds any failure into the result. Notes the
    /// backend left without a vault name are attributed to `vault`.
    pub async fn fetch_one(&self, query: &str, vault: &Vault) -> VaultResult {
        match self.request(query, vault).await {
            Ok(mut notes) => {
                for note in &mut notes {
                    if note.vault.is_empty() {
                        note.vault = vault.name.clone();
                    }
                }
                tracing::debug!(vault = %vault.name, count = notes.len(), "vault responded");
                VaultResult { notes, error: None }
            }
            Err(e) => {
                tracing::warn!(vault = %vault.name, port = vault.port, error = %format!("{:#}", e), "vault search failed");
                VaultResult {
                    notes: Vec::new(),
                    error: Some(vault.clone()),
                }
            }
        }
    }

    /// The raw request: transport errors, non-2xx statuses and bodies that
    /// are not a JSON array of notes are all errors here.
    async fn request(&self, query: &str, vault: &Vault) -> Result<Vec<Note>> {
        let response = self
            .client
            .get(self.search_url(vault))
            .query(&[("q", query)])
            .send()
            .await
            .with_context(|| format!("request to vault '{}' failed", vault.name))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("vault '{}' returned HTTP {}", vault.name, status);
        }

        response
            .json::<Vec<Note>>()
            .await
            .with_context(|| format!("vault '{}' returned an unexpected body", vault.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_uses_host_and_port() {
        let fetcher = VaultFetcher::new(&BackendConfig::default()).unwrap();
        let vault = Vault {
            name: "work".into(),
            port: 51361,
            active: true,
        };
        assert_eq!(fetcher.search_url(&vault), "http://localhost:51361/search");
    }

    #[tokio::test]
    async fn test_no_queries_means_no_requests() {
        let fetcher = VaultFetcher::new(&BackendConfig::default()).unwrap();
        let vault = Vault {
            name: "work".into(),
            port: 1,
            active: true,
        };
        let outcome = fetcher.fetch_all(&[], &[vault]).await;
        assert_eq!(outcome, FetchOutcome::default());
    }

    #[tokio::test]
    async fn test_unreachable_vault_becomes_error_entry() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let fetcher = VaultFetcher::new(&BackendConfig {
            host: "127.0.0.1".into(),
            timeout_secs: Some(5),
        })
        .unwrap();
        let vault = Vault {
            name: "gone".into(),
            port,
            active: true,
        };
        let outcome = fetcher
            .fetch_all(&["a".to_string(), "b".to_string()], &[vault.clone()])
            .await;
        assert!(outcome.notes.is_empty());
        assert_eq!(outcome.errors, vec![vault]);
    }
}
