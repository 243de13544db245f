//! # Omnisearch Companion CLI (`omni`)
//!
//! ## Usage
//!
//! ```bash
//! omni --config ./config/omni.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `omni init` | Create the SQLite store |
//! | `omni serve` | Run the daemon the browser extension talks to |
//! | `omni search "<text>"` | Run one search and print the ranked notes |
//! | `omni vaults list\|add\|remove\|enable\|disable` | Manage vault backends |
//! | `omni settings show\|set` | Inspect or change result settings |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use omnisearch_companion::{config, migrate, search, server, vaults};

/// Omnisearch Companion: search your local note vaults for the page you
/// are on.
#[derive(Parser)]
#[command(
    name = "omni",
    about = "Omnisearch Companion: search local note vaults from the browser",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/omni.toml`. When the file is missing, the
    /// database lives in the current directory and built-in defaults apply.
    #[arg(long, global = true, default_value = "./config/omni.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Run the daemon: event coordinator plus HTTP/WebSocket surface.
    Serve,

    /// Run one pipeline pass and print the results.
    ///
    /// Without `--url` the text is searched verbatim, like a context-menu
    /// selection. With `--url` the text is ignored and candidates are
    /// derived from the URL (and `--title`) using the stored search type.
    Search {
        /// Text to search for.
        text: String,

        /// Treat the search as a tab with this URL.
        #[arg(long)]
        url: Option<String>,

        /// Tab title, used with `--url`.
        #[arg(long)]
        title: Option<String>,
    },

    /// Manage vault backends.
    Vaults {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Inspect or change result settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum VaultAction {
    /// List configured vaults.
    List,
    /// Add a vault backend.
    Add {
        name: String,
        port: u16,
        /// Register the vault without querying it.
        #[arg(long)]
        inactive: bool,
    },
    /// Remove a vault by name.
    Remove { name: String },
    /// Start querying a vault.
    Enable { name: String },
    /// Stop querying a vault without removing it.
    Disable { name: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current settings.
    Show,
    /// Change one or more settings.
    Set {
        /// Maximum number of notes shown.
        #[arg(long)]
        notes_shown: Option<usize>,
        /// Minimum score (exclusive), 0 to 100.
        #[arg(long)]
        notes_score: Option<f64>,
        /// auto, query, full-url, partial-url or title.
        #[arg(long)]
        search_type: Option<String>,
        /// light or dark.
        #[arg(long)]
        theme: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "no config file, using defaults");
        config::Config::minimal(std::path::Path::new("."))
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search { text, url, title } => {
            search::run_search(&cfg, &text, url, title).await?;
        }
        Commands::Vaults { action } => match action {
            VaultAction::List => vaults::list_vaults(&cfg).await?,
            VaultAction::Add {
                name,
                port,
                inactive,
            } => vaults::add_vault(&cfg, &name, port, inactive).await?,
            VaultAction::Remove { name } => vaults::remove_vault(&cfg, &name).await?,
            VaultAction::Enable { name } => vaults::set_vault_active(&cfg, &name, true).await?,
            VaultAction::Disable { name } => vaults::set_vault_active(&cfg, &name, false).await?,
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => vaults::show_settings(&cfg).await?,
            SettingsAction::Set {
                notes_shown,
                notes_score,
                search_type,
                theme,
            } => {
                let patch = vaults::settings_patch(
                    notes_shown,
                    notes_score,
                    search_type.as_deref(),
                    theme.as_deref(),
                )?;
                vaults::update_settings(&cfg, patch).await?;
            }
        },
    }

    Ok(())
}
