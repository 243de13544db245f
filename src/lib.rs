//! # Omnisearch Companion
//!
//! Background companion for a browser extension that searches local note
//! vaults for whatever page you are looking at.
//!
//! Every tab change, tab switch or context-menu click becomes one pipeline
//! run: derive candidate queries from the tab (or take the selected text),
//! ask every active vault backend concurrently, merge results that name the
//! same note, rank them, and publish one consistent snapshot to the popup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Browser shim │──▶│ Coordinator │──▶│   Pipeline   │──▶│ Publisher│──▶ popup
//! │ events (HTTP)│   │  (session)  │   │ query→fetch→ │   │ snapshot │
//! └──────────────┘   └──────┬──────┘   │    rank      │   └────┬─────┘
//!                           │          └──────┬───────┘        │
//!                           ▼                 ▼                ▼
//!                      badge/popup       vault backends     SQLite
//!                      (host socket)    :port/search?q=    sync/local
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! omni init                          # create the store
//! omni vaults add work 51400         # register a vault backend
//! omni search "ownership"            # one-off search from the terminal
//! omni serve                         # run the daemon for the extension
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`storage`] | Key-value areas and the settings store |
//! | [`query`] | Candidate query extraction |
//! | [`fetch`] | Concurrent vault requests |
//! | [`rank`] | Merge, threshold, sort, cap |
//! | [`search`] | One pipeline pass and `omni search` |
//! | [`publish`] | Snapshot publishing and the loading guard |
//! | [`coordinator`] | Browser event handling |
//! | [`server`] | Daemon HTTP and WebSocket surface |
//! | [`vaults`] | Vault and settings CLI commands |
//! | [`migrate`] | Schema for the SQLite store |

pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod migrate;
pub mod models;
pub mod publish;
pub mod query;
pub mod rank;
pub mod search;
pub mod server;
pub mod storage;
pub mod vaults;
