//! # API Request/Response Types
//!
//! JSON structures of the HTTP API and the mapping from core errors to
//! status codes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use memebrane_core::{
    AttachmentId, AttachmentType, Brain, GateCounts, MemebraneError, Neighbour, Node, NodeId,
    NodeSummary, StoreStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Cache status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub brains: u64,
    pub nodes: u64,
    pub links: u64,
    pub attachments: u64,
    pub searchable_nodes: u64,
    pub schema_version: u64,
}

impl From<StoreStatus> for StatusResponse {
    fn from(s: StoreStatus) -> Self {
        Self {
            brains: s.brains,
            nodes: s.nodes,
            links: s.links,
            attachments: s.attachments,
            searchable_nodes: s.searchable_nodes,
            schema_version: s.schema_version,
        }
    }
}

// =============================================================================
// THOUGHT
// =============================================================================

/// Query flags of the thought route.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtQuery {
    /// Refetch regardless of staleness.
    pub force: bool,
    /// Return whole neighbour nodes instead of summaries.
    pub full: bool,
    /// Include private nodes.
    pub private: bool,
}

impl ThoughtQuery {
    /// Query string carried over into rewritten note links.
    #[must_use]
    pub fn link_suffix(&self) -> String {
        let mut flags = Vec::new();
        if self.full {
            flags.push("full=true");
        }
        if self.private {
            flags.push("private=true");
        }
        if flags.is_empty() {
            String::new()
        } else {
            format!("?{}", flags.join("&"))
        }
    }
}

/// Note text of the subject, with `brain://` references rewritten to local routes.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedNote {
    pub attachment_id: AttachmentId,
    pub attachment_type: AttachmentType,
    pub locale: Option<String>,
    pub text: String,
}

/// The subject node, its typed neighbours and gate counts.
#[derive(Debug, Clone, Serialize)]
pub struct ThoughtResponse {
    pub brain: Brain,
    pub node: Node,
    /// Whether this answer triggered a remote fetch.
    pub fetched: bool,
    pub neighbours: Vec<Neighbour>,
    pub gates: BTreeMap<NodeId, GateCounts>,
    pub notes: Vec<RenderedNote>,
}

/// Result of a forced refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub node: NodeSummary,
    pub fetched: bool,
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub q: String,
    pub start: usize,
    pub limit: Option<usize>,
    pub lang: Option<String>,
    pub notes: bool,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body of every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A core error on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub MemebraneError);

impl From<MemebraneError> for ApiError {
    fn from(e: MemebraneError) -> Self {
        Self(e)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.0 {
            MemebraneError::NotFound(_) => StatusCode::NOT_FOUND,
            MemebraneError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MemebraneError::MalformedPayload(_) => StatusCode::BAD_GATEWAY,
            MemebraneError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MemebraneError::Storage(_)
            | MemebraneError::Serialization(_)
            | MemebraneError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_suffix_carries_flags() {
        assert_eq!(ThoughtQuery::default().link_suffix(), "");
        let q = ThoughtQuery {
            full: true,
            private: true,
            ..ThoughtQuery::default()
        };
        assert_eq!(q.link_suffix(), "?full=true&private=true");
    }

    #[test]
    fn error_status_mapping() {
        let not_found = ApiError(MemebraneError::NotFound("x".to_string()));
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        let malformed = ApiError(MemebraneError::MalformedPayload("x".to_string()));
        assert_eq!(malformed.status(), StatusCode::BAD_GATEWAY);
    }
}
