//! # memebrane
//!
//! Read-through mirror of remote mind-map ("brain") graphs.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                apps/memebrane (THE BINARY)                │
//! │                                                           │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────────────────┐  │
//! │  │   CLI    │   │ HTTP API  │   │ Remote Graph Client  │  │
//! │  │  (clap)  │   │  (axum)   │   │ (reqwest, governor)  │  │
//! │  └────┬─────┘   └─────┬─────┘   └──────────┬───────────┘  │
//! │       └───────────────┼────────────────────┘              │
//! │                       ▼                                   │
//! │        Fetch Controller + Brain Registry                  │
//! │                       ▼                                   │
//! │               ┌────────────────┐                          │
//! │               │ memebrane-core │                          │
//! │               │  (THE LOGIC)   │                          │
//! │               └────────────────┘                          │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! memebrane init
//! memebrane server --host 0.0.0.0 --port 8080
//! memebrane fetch jerry 32f9fc36-6963-9ee0-9b44-a89112919e29
//! memebrane search jerry "systems thinking" --lang en --notes
//! ```

use clap::Parser;
use memebrane::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // MEMEBRANE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("MEMEBRANE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "memebrane=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && cli.verbose {
        println!("memebrane v{}", env!("CARGO_PKG_VERSION"));
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
