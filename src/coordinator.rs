//! Event coordinator: maps browser lifecycle events onto pipeline runs.
//!
//! | Event | Action |
//! |-------|--------|
//! | `tabUpdated` | run for the tab if it is active, finished loading, and its URL changed |
//! | `tabActivated` | always run for the tab |
//! | `contextMenuClicked` | run for selection, else link, else page; ask the host to open the popup |
//! | `storageChanged` (sync) | re-run the last trigger against the new settings |
//!
//! All per-process state lives in a [`Session`] owned by the
//! [`Coordinator`]. Runs are not serialized: overlapping events each run
//! the full pipeline and the publisher keeps the newest cycle.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::models::{Snapshot, Tab, TabStatus, Trigger};
use crate::publish::Publisher;
use crate::query::normalize_url;
use crate::search::Pipeline;
use crate::storage::{KeyValueStore, StorageArea};

const HOST_BUFFER: usize = 32;

/// Events forwarded by the extension's background shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrowserEvent {
    TabUpdated {
        tab: Tab,
    },
    TabActivated {
        tab: Tab,
    },
    #[serde(rename_all = "camelCase")]
    ContextMenuClicked {
        #[serde(default)]
        selection_text: Option<String>,
        #[serde(default)]
        link_url: Option<String>,
        #[serde(default)]
        page_url: Option<String>,
    },
    StorageChanged {
        area: StorageArea,
    },
}

/// Requests sent back to the extension shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCommand {
    SetBadge { text: String, error: bool },
    OpenPopup,
}

impl HostCommand {
    /// Badge for a snapshot: the note count (blank when zero), flagged when
    /// any vault failed.
    pub fn badge_for(snapshot: &Snapshot) -> Self {
        let text = if snapshot.notes.is_empty() {
            String::new()
        } else {
            snapshot.notes.len().to_string()
        };
        HostCommand::SetBadge {
            text,
            error: !snapshot.errors.is_empty(),
        }
    }
}

/// State that outlives a single event.
#[derive(Debug, Default)]
pub struct Session {
    /// Tab of the most recently started run; baseline for URL de-duplication.
    pub last_tab: Option<Tab>,
    /// Trigger of the most recently started run; replayed on settings changes.
    pub last_trigger: Option<Trigger>,
}

impl Session {
    fn remember(&mut self, trigger: &Trigger) {
        if let Trigger::Tab(tab) = trigger {
            self.last_tab = Some(tab.clone());
        }
        self.last_trigger = Some(trigger.clone());
    }

    fn is_new_url(&self, tab: &Tab) -> bool {
        let last = self
            .last_tab
            .as_ref()
            .and_then(|t| t.url.as_deref())
            .map(normalize_url);
        let current = tab.url.as_deref().map(normalize_url);
        last != current
    }
}

pub struct Coordinator {
    pipeline: Pipeline,
    publisher: Arc<Publisher>,
    session: Mutex<Session>,
    host: broadcast::Sender<HostCommand>,
}

impl Coordinator {
    pub fn new(pipeline: Pipeline, publisher: Arc<Publisher>) -> Self {
        let (host, _) = broadcast::channel(HOST_BUFFER);
        Self {
            pipeline,
            publisher,
            session: Mutex::new(Session::default()),
            host,
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn subscribe_host(&self) -> broadcast::Receiver<HostCommand> {
        self.host.subscribe()
    }

    /// Handles one event. Returns the cycle number of the run it started,
    /// if any.
    pub async fn handle(&self, event: BrowserEvent) -> Result<Option<u64>> {
        match event {
            BrowserEvent::TabUpdated { tab } => {
                if !tab.active || tab.status == Some(TabStatus::Loading) {
                    return Ok(None);
                }
                {
                    let mut session = self.session.lock().await;
                    if !session.is_new_url(&tab) {
                        tracing::debug!("tab URL unchanged, skipping");
                        return Ok(None);
                    }
                    session.remember(&Trigger::Tab(tab.clone()));
                }
                self.run_cycle(Trigger::Tab(tab)).await.map(Some)
            }
            BrowserEvent::TabActivated { tab } => {
                let trigger = Trigger::Tab(tab);
                self.session.lock().await.remember(&trigger);
                self.run_cycle(trigger).await.map(Some)
            }
            BrowserEvent::ContextMenuClicked {
                selection_text,
                link_url,
                page_url,
            } => {
                let trigger = context_menu_trigger(selection_text, link_url, page_url);
                let _ = self.host.send(HostCommand::OpenPopup);
                match trigger {
                    Some(trigger) => {
                        self.session.lock().await.remember(&trigger);
                        self.run_cycle(trigger).await.map(Some)
                    }
                    None => Ok(None),
                }
            }
            BrowserEvent::StorageChanged { area } => match area {
                StorageArea::Sync => self.refresh().await,
                // Our own snapshot writes land here
                StorageArea::Local => Ok(None),
            },
        }
    }

    /// Re-runs the last trigger, typically after a settings change.
    pub async fn refresh(&self) -> Result<Option<u64>> {
        let trigger = self.session.lock().await.last_trigger.clone();
        match trigger {
            Some(trigger) => self.run_cycle(trigger).await.map(Some),
            None => Ok(None),
        }
    }

    async fn run_cycle(&self, trigger: Trigger) -> Result<u64> {
        let ticket = self.publisher.begin();
        let cycle = ticket.cycle();
        tracing::debug!(cycle, ?trigger, "starting run");

        match self.pipeline.run(&trigger).await {
            Ok(outcome) => {
                let snapshot = outcome.into_snapshot(cycle);
                let badge = HostCommand::badge_for(&snapshot);
                // A persist failure still leaves the snapshot current
                match self.publisher.publish(ticket, snapshot).await {
                    Ok(false) => Ok(cycle),
                    Ok(true) => {
                        let _ = self.host.send(badge);
                        Ok(cycle)
                    }
                    Err(e) => {
                        let _ = self.host.send(badge);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.publisher.abandon(ticket).await;
                Err(e)
            }
        }
    }

    /// Replays `sync` storage writes (settings edits from the HTTP API or
    /// the CLI) as `storageChanged` events.
    pub fn spawn_storage_listener(self: &Arc<Self>, kv: &Arc<dyn KeyValueStore>) -> JoinHandle<()> {
        let mut changes = kv.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if change.area != StorageArea::Sync {
                            continue;
                        }
                        tracing::info!(keys = ?change.keys, "settings changed, refreshing");
                        let event = BrowserEvent::StorageChanged { area: change.area };
                        if let Err(e) = this.handle(event).await {
                            tracing::error!(error = %format!("{:#}", e), "refresh failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(n, "storage listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Consumes events until the channel closes. Each event runs on its own
    /// task so a slow vault never blocks later events.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<BrowserEvent>) {
        while let Some(event) = events.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.handle(event).await {
                    tracing::error!(error = %format!("{:#}", e), "pipeline run failed");
                }
            });
        }
        tracing::debug!("event channel closed");
    }
}

/// Selection wins over link, link over page. Selection and link are
/// searched verbatim; a page URL goes through normal tab extraction.
fn context_menu_trigger(
    selection_text: Option<String>,
    link_url: Option<String>,
    page_url: Option<String>,
) -> Option<Trigger> {
    let present = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.trim().is_empty());

    if present(&selection_text) {
        selection_text.map(Trigger::Text)
    } else if present(&link_url) {
        link_url.map(Trigger::Text)
    } else if present(&page_url) {
        Some(Trigger::Tab(Tab {
            url: page_url,
            active: true,
            ..Default::default()
        }))
    } else {
        None
    }
}
