//! # memebrane
//!
//! The network-aware half of memebrane - THE BINARY.
//!
//! - `remote`: HTTP client for the remote brain service
//! - `fetch`: read-through resolution over the `memebrane-core` store
//! - `registry`: brain lookup by UUID or slug, behind a TTL cache
//! - `config`: `memebrane.toml` loading and validation
//! - `api`: JSON HTTP surface (axum)
//! - `cli`: command-line interface (clap)

pub mod api;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod registry;
pub mod remote;
