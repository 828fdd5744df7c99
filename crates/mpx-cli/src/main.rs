// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mpx_cli::{DataPaths, commands};
use mpx_config::{AesGcmCipher, ConfigStore, FileKeyProvider};
use mpx_core::BackendId;
use mpx_dispatch::{Dispatcher, standard_registry};
use mpx_history::HistoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mirrorpix", version, about = "Multi-backend image upload engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory override (config, key, history database).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to the credential fetcher sidecar binary.
    #[arg(long, global = true, default_value = "fetcher")]
    fetcher: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload files to every enabled backend.
    Upload {
        /// Files to upload.
        files: Vec<PathBuf>,
    },

    /// Test connectivity for configured backends.
    Probe {
        /// Probe a single backend instead of all configured ones.
        #[arg(long)]
        backend: Option<BackendId>,
    },

    /// Inspect the upload history.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },

    /// Retry a recorded upload.
    Retry {
        /// History record id.
        record_id: String,

        /// Retry only this backend, leaving the primary link untouched.
        #[arg(long)]
        backend: Option<BackendId>,
    },

    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Probe for a controllable browser via the credential sidecar.
    CheckBrowser,
}

#[derive(Subcommand, Debug)]
enum HistoryCommands {
    /// List a page of records, newest first.
    List {
        /// 1-based page number.
        #[arg(long, default_value_t = 1)]
        page: u32,

        /// Records per page.
        #[arg(long, default_value_t = 20)]
        page_size: u32,

        /// Only records whose primary backend matches.
        #[arg(long)]
        backend: Option<BackendId>,
    },

    /// Search records by file name or link substring.
    Search {
        /// Substring to look for (case-insensitive).
        query: String,

        /// Only records whose primary backend matches.
        #[arg(long)]
        backend: Option<BackendId>,

        /// Maximum hits to print.
        #[arg(long, default_value_t = 50)]
        limit: u32,

        /// Hits to skip.
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Show one record in full.
    Show {
        /// History record id.
        id: String,
    },

    /// Per-month upload counts.
    Stats,

    /// Delete records by id.
    Delete {
        /// Record ids to delete.
        ids: Vec<String>,
    },

    /// Delete every record.
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the config with credentials masked.
    Show,

    /// Print the resolved data paths.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let paths = DataPaths::resolve(cli.data_dir.clone());

    // `config path` must work even before anything exists on disk.
    if let Commands::Config {
        command: ConfigCommands::Path,
    } = &cli.command
    {
        println!("root:    {}", paths.root.display());
        println!("config:  {}", paths.config.display());
        println!("history: {}", paths.history.display());
        return Ok(());
    }

    let keys = FileKeyProvider::new(&paths.key);
    let config = ConfigStore::open(&paths.config, Arc::new(AesGcmCipher), &keys)
        .await
        .context("open config store")?;
    let history = HistoryStore::open(&paths.history).context("open history store")?;
    let dispatcher = Dispatcher::new(Arc::new(standard_registry(&cli.fetcher)));

    let app = commands::App {
        config,
        history,
        dispatcher,
        fetcher: cli.fetcher.clone(),
    };

    match cli.command {
        Commands::Upload { files } => commands::upload(&app, &files).await,
        Commands::Probe { backend } => commands::probe(&app, backend).await,
        Commands::History { command } => match command {
            HistoryCommands::List {
                page,
                page_size,
                backend,
            } => commands::history_list(&app, page, page_size, backend),
            HistoryCommands::Search {
                query,
                backend,
                limit,
                offset,
            } => commands::history_search(&app, &query, backend, limit, offset),
            HistoryCommands::Show { id } => commands::history_show(&app, &id),
            HistoryCommands::Stats => commands::history_stats(&app),
            HistoryCommands::Delete { ids } => commands::history_delete(&app, &ids),
            HistoryCommands::Clear => commands::history_clear(&app),
        },
        Commands::Retry { record_id, backend } => commands::retry(&app, &record_id, backend).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config_show(&app).await,
            ConfigCommands::Path => unreachable!("handled before store setup"),
        },
        Commands::CheckBrowser => commands::check_browser(&app).await,
    }
}
