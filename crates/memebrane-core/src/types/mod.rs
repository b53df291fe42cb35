//! # Core Type Definitions
//!
//! This module contains all core types for the memebrane cache:
//! - Identifiers (`BrainId`, `NodeId`, `LinkId`, `AttachmentId`)
//! - Entities (`Brain`, `Node`, `Link`, `Attachment`)
//! - Remote enumerations decoded from wire codes (`NodeKind`, `RelationKind`, ...)
//! - Error types (`MemebraneError`)
//!
//! ## Identifier Keys
//!
//! Every identifier wraps a remote-assigned UUID. Storage keys use the
//! UUID's `u128` form so that `(brain, id)` composite keys sort and range
//! deterministically inside redb.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::primitives::{DIRECTION_DIRECTED, DIRECTION_ONE_WAY, DIRECTION_REVERSED};

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// The storage key for this identifier.
            #[must_use]
            pub const fn key(self) -> u128 {
                self.0.as_u128()
            }

            /// Rebuild an identifier from its storage key.
            #[must_use]
            pub const fn from_key(key: u128) -> Self {
                Self(Uuid::from_u128(key))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.hyphenated().fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = MemebraneError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    MemebraneError::InvalidRequest(format!(
                        "invalid {} '{}': {}",
                        stringify!($name),
                        s,
                        e
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Identifier of a remote graph source.
    BrainId
);
uuid_id!(
    /// Identifier of a node ("thought"), unique per brain.
    NodeId
);
uuid_id!(
    /// Identifier of a stored edge.
    LinkId
);
uuid_id!(
    /// Identifier of a node attachment.
    AttachmentId
);

// =============================================================================
// REMOTE ENUMERATIONS
// =============================================================================

/// Kind of a node, derived from the remote `kind` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Normal,
    Type,
    Tag,
}

impl NodeKind {
    /// Decode the remote kind code. Events and system nodes display as normal nodes.
    #[must_use]
    pub const fn from_wire(code: u8) -> Self {
        match code {
            2 => Self::Type,
            4 => Self::Tag,
            _ => Self::Normal,
        }
    }
}

/// Stored relation of a link. `Sibling` only exists on the wire and in query
/// results; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    NoValue,
    Child,
    Parent,
    Jump,
    Sibling,
}

impl RelationKind {
    #[must_use]
    pub const fn from_wire(code: u8) -> Self {
        match code {
            1 => Self::Child,
            2 => Self::Parent,
            3 => Self::Jump,
            4 => Self::Sibling,
            _ => Self::NoValue,
        }
    }
}

/// Semantic meaning attached to a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LinkMeaning {
    Normal,
    InstanceOf,
    TypeOf,
    HasEvent,
    HasTag,
    System,
    SubTagOf,
}

impl LinkMeaning {
    #[must_use]
    pub const fn from_wire(code: u8) -> Self {
        match code {
            2 => Self::InstanceOf,
            3 => Self::TypeOf,
            4 => Self::HasEvent,
            5 => Self::HasTag,
            6 => Self::System,
            7 => Self::SubTagOf,
            _ => Self::Normal,
        }
    }
}

/// Link flavour: ordinary links versus type links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Normal,
    Type,
}

impl LinkType {
    #[must_use]
    pub const fn from_wire(code: u8) -> Self {
        match code {
            2 => Self::Type,
            _ => Self::Normal,
        }
    }
}

/// Attachment type as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttachmentType {
    InternalFile,
    ExternalFile,
    ExternalUrl,
    NotesHtml,
    Icon,
    NotesAsset,
    InternalDirectory,
    ExternalDirectory,
    SubFile,
    SubDirectory,
    SavedReport,
    MarkdownImage,
}

impl AttachmentType {
    /// Decode the remote type code. Unknown codes yield `None`.
    #[must_use]
    pub const fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::InternalFile,
            2 => Self::ExternalFile,
            3 => Self::ExternalUrl,
            4 => Self::NotesHtml,
            5 => Self::Icon,
            6 => Self::NotesAsset,
            7 => Self::InternalDirectory,
            8 => Self::ExternalDirectory,
            9 => Self::SubFile,
            10 => Self::SubDirectory,
            11 => Self::SavedReport,
            12 => Self::MarkdownImage,
            _ => return None,
        })
    }

    /// Note attachments carry decoded text; every other type carries bytes or nothing.
    #[must_use]
    pub const fn is_note(self) -> bool {
        matches!(self, Self::NotesHtml)
    }
}

// =============================================================================
// BRAIN
// =============================================================================

/// One remote graph source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brain {
    pub id: BrainId,
    pub name: Option<String>,
    /// Human-readable alias, unique across brains.
    pub slug: Option<String>,
    /// Entry-point node shown when only the brain is requested.
    pub base_node_id: Option<NodeId>,
}

impl Brain {
    /// A brain known only by its identifier.
    #[must_use]
    pub const fn anonymous(id: BrainId) -> Self {
        Self {
            id,
            name: None,
            slug: None,
            base_node_id: None,
        }
    }

    /// The slug when present, otherwise the identifier.
    /// Used as the brain segment of local addresses.
    #[must_use]
    pub fn safe_slug(&self) -> String {
        self.slug.clone().unwrap_or_else(|| self.id.to_string())
    }
}

// =============================================================================
// NODE
// =============================================================================

/// Identifier and name of a node; the "summary" projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub name: String,
}

/// A cached vertex ("thought").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub brain_id: BrainId,
    pub name: String,
    /// The remote payload as JSON text. Known fields use canonical names.
    pub raw_data: String,
    /// Nodes this node is tagged with (sorted, no duplicates).
    pub tag_ids: Vec<NodeId>,
    /// Nodes referenced from this node's note text (sorted, no duplicates).
    pub text_link_ids: Vec<NodeId>,
    /// Last time this node was read as the focus of a fetch.
    pub last_read_at: DateTime<Utc>,
    /// Remote modification time used to gate updates.
    pub last_modified_at: DateTime<Utc>,
    /// Remote modification time of the focus fetch that set `tag_ids` and
    /// `text_link_ids`. `None` until the node is fetched as a focus.
    pub focus_modified_at: Option<DateTime<Utc>>,
    /// Whether this node was ever fetched as the focus of a request.
    pub is_focus_cached: bool,
    pub is_tag: bool,
    pub is_type: bool,
    pub is_private: bool,
    pub kind: NodeKind,
}

impl Node {
    /// The identifier/name projection of this node.
    #[must_use]
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }

    /// Parse the stored remote payload.
    pub fn raw(&self) -> Result<serde_json::Value, MemebraneError> {
        serde_json::from_str(&self.raw_data)
            .map_err(|e| MemebraneError::Serialization(e.to_string()))
    }
}

// =============================================================================
// LINK
// =============================================================================

/// A stored edge. `parent_id` is always the hierarchical parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub brain_id: BrainId,
    pub parent_id: NodeId,
    pub child_id: NodeId,
    pub relation: RelationKind,
    pub meaning: LinkMeaning,
    pub link_type: LinkType,
    pub is_directed: bool,
    pub is_one_way: bool,
    pub is_reversed: bool,
    pub last_modified_at: DateTime<Utc>,
}

impl Link {
    #[must_use]
    pub fn is_jump(&self) -> bool {
        self.relation == RelationKind::Jump
    }

    /// The endpoint opposite `node`, if `node` is an endpoint at all.
    #[must_use]
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.parent_id == node {
            Some(self.child_id)
        } else if self.child_id == node {
            Some(self.parent_id)
        } else {
            None
        }
    }

    /// Decode the remote direction bitmask into `(directed, one_way, reversed)`.
    #[must_use]
    pub const fn direction_flags(mask: u8) -> (bool, bool, bool) {
        (
            mask & DIRECTION_DIRECTED != 0,
            mask & DIRECTION_ONE_WAY != 0,
            mask & DIRECTION_REVERSED != 0,
        )
    }
}

// =============================================================================
// ATTACHMENT
// =============================================================================

/// Attachment metadata. Content lives out-of-line and is never part of this row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub brain_id: BrainId,
    pub node_id: NodeId,
    pub name: Option<String>,
    /// Opaque path or identifier inside the remote store.
    pub location: String,
    pub attachment_type: AttachmentType,
    /// Best-guess language of the text content.
    pub inferred_locale: Option<String>,
    pub last_modified_at: DateTime<Utc>,
}

/// Lazily loaded attachment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentContent {
    /// Decoded text of a note attachment.
    Text(String),
    /// Raw bytes of any other attachment.
    Binary(Vec<u8>),
}

impl AttachmentContent {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in memebrane.
///
/// Dropped links/attachments and failed language detection are not errors:
/// the first are logged and counted, the second resolves to a sentinel locale.
#[derive(Debug, Error)]
pub enum MemebraneError {
    /// A brain or node is absent from the cache and could not be fetched.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote service could not be reached or answered unsuccessfully.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A fetched payload is missing required fields or has unparseable values.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The embedded database failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A row could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied argument is invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// =============================================================================
// TESTS
// =============================================================================
