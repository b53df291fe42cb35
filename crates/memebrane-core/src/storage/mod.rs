//! # Storage Module
//!
//! Persistent Entity Store for brains, nodes, links and attachments.
//!
//! The store is a single `redb` database. Rows are `postcard`-encoded and
//! keyed by `(brain, id)`; relationship lookups go through index tables
//! maintained in the same write transaction as the rows they index.
//! Full-text search runs on a tantivy index beside the database, fed from
//! the store after each commit.

mod redb_store;
mod search_index;

pub(crate) use redb_store::{ReadTables, WriteTables};
pub use redb_store::{EntityStore, StoreStatus};
pub(crate) use search_index::IndexQuery;
