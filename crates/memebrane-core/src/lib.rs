//! # memebrane-core
//!
//! The read-through cache engine for memebrane - THE LOGIC.
//!
//! This crate mirrors the subgraphs a remote mind-map service returns
//! into an embedded `redb` store, and answers graph questions from it:
//!
//! - `payload`: the remote wire format, decoded with a fixed field-name mapping
//! - `merge`: timestamp-gated, idempotent upsert of a fetched subgraph
//! - `query`: typed neighbour relations reconstructed from one edge table
//! - `codec`: the `brain://` cross-reference scheme embedded in note text
//! - `search`: language-aware ranking over node names and note text
//! - `staleness`: when a cached node must be fetched again
//!
//! ## Architectural Constraints
//!
//! - Synchronous only: NO async, NO network dependencies
//! - The store is the only shared mutable state; coordination happens in its transactions
//! - Integer arithmetic only (ranks are millionths)

// =============================================================================
// MODULES
// =============================================================================

pub mod codec;
pub mod locale;
pub mod merge;
pub mod payload;
pub mod primitives;
pub mod query;
pub mod search;
pub mod staleness;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Attachment, AttachmentContent, AttachmentId, AttachmentType, Brain, BrainId, Link, LinkId,
    LinkMeaning, LinkType, MemebraneError, Node, NodeId, NodeKind, NodeSummary, RelationKind,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use codec::{
    LinkReference, decode_references, encode_reference, extract_text_link_ids,
    rewrite_for_display, rewrite_remote_asset_links,
};
pub use locale::{TextConfig, infer_locale, is_supported_language};
pub use merge::{MergeEngine, MergeReport};
pub use payload::GraphPayload;
pub use query::{
    GateCounts, Neighbour, NeighbourNode, NeighbourOptions, Projection, RelationType, gate_counts,
    neighbours,
};
pub use search::{SearchHit, SearchPage, SearchRequest, search};
pub use staleness::StalenessPolicy;
pub use storage::{EntityStore, StoreStatus};
