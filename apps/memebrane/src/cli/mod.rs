//! # memebrane CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Create the database and register the configured brains
//! - `fetch` - Resolve a node (fetching when stale) and print its neighbours
//! - `search` - Search the cached nodes of a brain
//! - `status` - Show cache row counts and known brains

mod commands;

use clap::{Parser, Subcommand};
use memebrane_core::MemebraneError;
use std::path::PathBuf;

pub use commands::*;

use crate::config::{Config, DEFAULT_CONFIG_PATH};

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// memebrane - read-through mirror of remote brain graphs
#[derive(Parser, Debug)]
#[command(name = "memebrane")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the database path from the configuration
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Create the database and register the configured brains
    Init {
        /// Delete an existing database first
        #[arg(short, long)]
        force: bool,
    },

    /// Resolve a node and print its neighbours
    Fetch {
        /// Brain UUID or slug
        brain: String,

        /// Node UUID
        node: String,

        /// Refetch regardless of staleness
        #[arg(short, long)]
        force: bool,

        /// Include private nodes
        #[arg(long)]
        private: bool,
    },

    /// Search the cached nodes of a brain
    Search {
        /// Brain UUID or slug
        brain: String,

        /// Query terms
        query: String,

        /// Language (ISO 639-1) used for stemming and note filtering
        #[arg(short, long)]
        lang: Option<String>,

        /// Also rank note text
        #[arg(short, long)]
        notes: bool,

        /// Offset of the first hit
        #[arg(long, default_value = "0")]
        start: usize,

        /// Maximum number of hits
        #[arg(long, default_value = "25")]
        limit: usize,
    },

    /// Show cache status
    Status,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), MemebraneError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(config, &host, port).await,
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Fetch {
            brain,
            node,
            force,
            private,
        }) => cmd_fetch(config, json_mode, &brain, &node, force, private).await,
        Some(Commands::Search {
            brain,
            query,
            lang,
            notes,
            start,
            limit,
        }) => {
            let request = memebrane_core::SearchRequest {
                terms: query,
                start,
                limit,
                language: lang,
                include_notes: notes,
            };
            cmd_search(config, json_mode, &brain, request).await
        }
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
    }
}
