//! # CLI Command Implementations

use crate::api::{self, AppState};
use crate::config::Config;
use crate::remote::HttpRemote;
use memebrane_core::{
    Brain, EntityStore, MemebraneError, NeighbourOptions, NodeId, SearchRequest, neighbours,
    search,
};
use std::sync::Arc;

// =============================================================================
// SHARED SETUP
// =============================================================================

fn open_store(config: &Config) -> Result<Arc<EntityStore>, MemebraneError> {
    tracing::debug!(database = %config.database.display(), "opening store");
    Ok(Arc::new(open_entity_store(config)?))
}

fn open_entity_store(config: &Config) -> Result<EntityStore, MemebraneError> {
    let languages: Vec<&str> = config.index_languages().collect();
    EntityStore::open_with_languages(&config.database, &languages)
}

fn build_state(config: Config) -> Result<AppState, MemebraneError> {
    let store = open_store(&config)?;
    let remote = HttpRemote::new(
        &config.api_base,
        config.request_timeout(),
        config.remote_rate_limit,
    )?;
    Ok(AppState::new(config, store, Arc::new(remote)))
}

async fn resolve_brain(state: &AppState, segment: &str) -> Result<Brain, MemebraneError> {
    state
        .registry
        .resolve(segment)
        .await?
        .ok_or_else(|| MemebraneError::NotFound(format!("brain '{}'", segment)))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), MemebraneError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| MemebraneError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: Config, host: &str, port: u16) -> Result<(), MemebraneError> {
    println!("memebrane server starting...");
    println!();
    println!("Configuration:");
    println!("  Host:      {}", host);
    println!("  Port:      {}", port);
    println!("  Database:  {}", config.database.display());
    println!("  Remote:    {}", config.api_base);
    println!("  Staleness: {:?}", config.staleness());
    println!("  Brains:    {}", config.brains.len());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = build_state(config)?;
    let seeded = state.registry.seed_from_config()?;
    tracing::info!(brains = seeded, "configured brains registered");

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, state).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the database and register the configured brains.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), MemebraneError> {
    if config.database.exists() {
        if !force {
            return Err(MemebraneError::InvalidRequest(format!(
                "database {} already exists (use --force to recreate)",
                config.database.display()
            )));
        }
        std::fs::remove_file(&config.database).map_err(|e| {
            MemebraneError::Storage(format!("cannot remove {}: {}", config.database.display(), e))
        })?;
        tracing::info!(database = %config.database.display(), "removed existing database");
    }

    let store = open_entity_store(&config)?;
    for brain in config.configured_brains() {
        store.put_brain(&brain)?;
    }
    println!(
        "Initialized {} with {} configured brain(s)",
        config.database.display(),
        config.brains.len()
    );
    Ok(())
}

// =============================================================================
// FETCH COMMAND
// =============================================================================

/// Resolve a node and print its neighbours.
pub async fn cmd_fetch(
    config: Config,
    json_mode: bool,
    brain: &str,
    node: &str,
    force: bool,
    private: bool,
) -> Result<(), MemebraneError> {
    let state = build_state(config)?;
    let brain = resolve_brain(&state, brain).await?;
    let id: NodeId = node.parse()?;

    let resolved = state.controller.resolve_node(brain.id, id, force).await?;
    let fetched = resolved.payload.is_some();
    let subject = resolved.node;
    let options = NeighbourOptions {
        include_private: private,
        ..NeighbourOptions::default()
    };
    let (subject, rows) = state
        .controller
        .with_store(move |s| {
            let rows = neighbours(s, &subject, &options)?;
            Ok((subject, rows))
        })
        .await?;

    if json_mode {
        return print_json(&serde_json::json!({
            "node": subject,
            "fetched": fetched,
            "neighbours": rows,
        }));
    }

    println!("{} ({})", subject.name, subject.id);
    println!("Source: {}", if fetched { "remote" } else { "cache" });
    println!();
    for row in &rows {
        println!("  {:<14} {} ({})", format!("{:?}", row.relation), row.node.name(), row.node.id());
    }
    if rows.is_empty() {
        println!("  (no neighbours)");
    }
    Ok(())
}

// =============================================================================
// SEARCH COMMAND
// =============================================================================

/// Search the cached nodes of a brain.
pub async fn cmd_search(
    config: Config,
    json_mode: bool,
    brain: &str,
    request: SearchRequest,
) -> Result<(), MemebraneError> {
    let state = build_state(config)?;
    let brain = resolve_brain(&state, brain).await?;
    let page = state
        .controller
        .with_store(move |s| search(s, brain.id, &request))
        .await?;

    if json_mode {
        return print_json(&page);
    }

    for hit in &page.hits {
        println!("{:>9}  {} ({})", hit.rank, hit.name, hit.node_id);
    }
    if page.hits.is_empty() {
        println!("No matches");
    }
    if let Some(next) = page.next_start {
        println!();
        println!("More results: --start {}", next);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show cache status.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), MemebraneError> {
    let store = open_store(config)?;
    let status = store.status()?;
    let brains = store.list_brains()?;

    if json_mode {
        return print_json(&serde_json::json!({
            "database": config.database.to_string_lossy(),
            "status": status,
            "brains": brains,
        }));
    }

    println!("memebrane Cache Status");
    println!("======================");
    println!("Database: {}", config.database.display());
    println!("Schema:   v{}", status.schema_version);
    println!();
    println!("Brains:      {}", status.brains);
    println!("Nodes:       {}", status.nodes);
    println!("Links:       {}", status.links);
    println!("Attachments: {}", status.attachments);
    println!("Searchable:  {} ({} pending)", status.searchable_nodes, status.search_pending);
    if !brains.is_empty() {
        println!();
        for brain in &brains {
            println!(
                "  {} {} {}",
                brain.id,
                brain.slug.as_deref().unwrap_or("-"),
                brain.name.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
