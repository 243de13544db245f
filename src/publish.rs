//! State publisher: the last completed snapshot and the popup ports that
//! receive it.
//!
//! Each pipeline run holds a [`CycleTicket`] for its whole duration. While
//! any ticket is outstanding the loading guard is up: new popup connections
//! wait, and pushes to already-connected popups are held back until the
//! last run in flight has finished. A popup therefore only ever sees whole
//! snapshots from finished runs.
//!
//! Snapshots are stamped with the run's cycle number. A run that finishes
//! after a newer one already published is discarded, so an overlapping
//! slow run cannot overwrite fresher results.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

use crate::models::Snapshot;
use crate::storage::{KeyValueStore, StorageArea};

pub const QUERY_KEY: &str = "query";
pub const RAW_NOTES_KEY: &str = "rawNotes";
pub const NOTES_KEY: &str = "notes";
pub const ERRORS_KEY: &str = "errors";
pub const CYCLE_KEY: &str = "cycle";
pub const CYCLE_VAULTS_KEY: &str = "cycleVaults";

/// Messages pushed on the `popup` port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PopupMessage {
    Snapshot(Snapshot),
}

/// Receiving end of a popup connection. The first message is always the
/// snapshot current at connect time.
pub struct PopupPort {
    rx: mpsc::UnboundedReceiver<PopupMessage>,
}

impl PopupPort {
    pub async fn recv(&mut self) -> Option<PopupMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PopupMessage> {
        self.rx.try_recv().ok()
    }
}

/// Marks one pipeline run as in flight. Dropping it lowers the guard.
pub struct CycleTicket {
    cycle: u64,
    in_flight: Arc<watch::Sender<usize>>,
}

impl CycleTicket {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

impl Drop for CycleTicket {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct Inner {
    snapshot: Snapshot,
    ports: Vec<mpsc::UnboundedSender<PopupMessage>>,
    /// A publish landed while other runs were still in flight.
    pending_push: bool,
}

pub struct Publisher {
    kv: Arc<dyn KeyValueStore>,
    inner: Mutex<Inner>,
    last_cycle: AtomicU64,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Publisher {
    /// Creates a publisher, restoring the last persisted snapshot if any.
    pub async fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let snapshot = load_snapshot(kv.as_ref()).await?.unwrap_or_default();
        let (in_flight, _) = watch::channel(0usize);
        Ok(Self {
            kv,
            last_cycle: AtomicU64::new(snapshot.cycle),
            inner: Mutex::new(Inner {
                snapshot,
                ports: Vec::new(),
                pending_push: false,
            }),
            in_flight: Arc::new(in_flight),
        })
    }

    /// Raises the loading guard for a new run and assigns its cycle number.
    pub fn begin(&self) -> CycleTicket {
        self.in_flight.send_modify(|n| *n += 1);
        let cycle = self.last_cycle.fetch_add(1, Ordering::SeqCst) + 1;
        CycleTicket {
            cycle,
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn is_loading(&self) -> bool {
        *self.in_flight.borrow() > 0
    }

    /// Resolves once no run is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stores and persists `snapshot` as the result of `ticket`'s run.
    ///
    /// Returns `false` when a newer cycle already published and the
    /// snapshot was discarded.
    ///
    /// A failed write to the local area does not hold back live popups:
    /// the snapshot still becomes current and is pushed, and the write
    /// error is returned once the ticket has been released.
    pub async fn publish(&self, ticket: CycleTicket, mut snapshot: Snapshot) -> Result<bool> {
        snapshot.cycle = ticket.cycle;
        let (accepted, persisted) = {
            let mut inner = self.inner.lock().await;
            if snapshot.cycle < inner.snapshot.cycle {
                tracing::warn!(
                    cycle = snapshot.cycle,
                    current = inner.snapshot.cycle,
                    "discarding results of a superseded run"
                );
                (false, Ok(()))
            } else {
                let persisted = persist_snapshot(self.kv.as_ref(), &snapshot).await;
                if let Err(e) = &persisted {
                    tracing::error!(
                        cycle = snapshot.cycle,
                        error = %format!("{:#}", e),
                        "snapshot kept in memory only"
                    );
                }
                tracing::info!(
                    cycle = snapshot.cycle,
                    notes = snapshot.notes.len(),
                    errors = snapshot.errors.len(),
                    "published snapshot"
                );
                inner.snapshot = snapshot;
                inner.pending_push = true;
                (true, persisted)
            }
        };
        self.finish(ticket).await;
        persisted?;
        Ok(accepted)
    }

    /// Ends a run that produced nothing to publish.
    pub async fn abandon(&self, ticket: CycleTicket) {
        tracing::debug!(cycle = ticket.cycle, "run abandoned");
        self.finish(ticket).await;
    }

    async fn finish(&self, ticket: CycleTicket) {
        drop(ticket);
        if self.is_loading() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if inner.pending_push {
            inner.pending_push = false;
            let message = PopupMessage::Snapshot(inner.snapshot.clone());
            inner.ports.retain(|tx| tx.send(message.clone()).is_ok());
        }
    }

    /// Opens a popup port once the loading guard is down. The port
    /// immediately receives the current snapshot.
    pub async fn connect(&self) -> PopupPort {
        self.wait_idle().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        let _ = tx.send(PopupMessage::Snapshot(inner.snapshot.clone()));
        inner.ports.push(tx);
        PopupPort { rx }
    }

    /// The current snapshot, after any run in flight has finished.
    pub async fn snapshot(&self) -> Snapshot {
        self.wait_idle().await;
        self.inner.lock().await.snapshot.clone()
    }

    /// Number of popup ports still open. Closed ports are dropped here as
    /// well as on the next push.
    pub async fn connected_ports(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.ports.retain(|tx| !tx.is_closed());
        inner.ports.len()
    }
}

async fn persist_snapshot(kv: &dyn KeyValueStore, snapshot: &Snapshot) -> Result<()> {
    let entries = vec![
        (QUERY_KEY.to_string(), serde_json::to_string(&snapshot.query)?),
        (
            RAW_NOTES_KEY.to_string(),
            serde_json::to_string(&snapshot.raw_notes)?,
        ),
        (NOTES_KEY.to_string(), serde_json::to_string(&snapshot.notes)?),
        (ERRORS_KEY.to_string(), serde_json::to_string(&snapshot.errors)?),
        (CYCLE_VAULTS_KEY.to_string(), serde_json::to_string(&snapshot.vaults)?),
        (CYCLE_KEY.to_string(), snapshot.cycle.to_string()),
    ];
    kv.set(StorageArea::Local, entries)
        .await
        .with_context(|| "Failed to persist snapshot")
}

/// Reads the persisted snapshot. `None` if nothing was ever published.
pub async fn load_snapshot(kv: &dyn KeyValueStore) -> Result<Option<Snapshot>> {
    let cycle = match kv.get(StorageArea::Local, CYCLE_KEY).await? {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Stored cycle is not a number: {}", raw))?,
        None => return Ok(None),
    };

    Ok(Some(Snapshot {
        cycle,
        query: read_json(kv, QUERY_KEY).await?.unwrap_or(None),
        raw_notes: read_json(kv, RAW_NOTES_KEY).await?.unwrap_or_default(),
        notes: read_json(kv, NOTES_KEY).await?.unwrap_or_default(),
        errors: read_json(kv, ERRORS_KEY).await?.unwrap_or_default(),
        vaults: read_json(kv, CYCLE_VAULTS_KEY).await?.unwrap_or_default(),
    }))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match kv.get(StorageArea::Local, key).await? {
        Some(raw) => Ok(Some(
            serde_json::from_str(&raw).with_context(|| format!("Stored '{}' is corrupt", key))?,
        )),
        None => Ok(None),
    }
}
