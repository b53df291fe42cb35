//! # API Endpoint Handlers
//!
//! Each handler resolves the brain segment through the registry, runs the
//! fetch controller, then answers from the store on the blocking pool.

use super::{
    AppState, auth,
    types::{
        ApiError, HealthResponse, RefreshResponse, RenderedNote, SearchQuery, StatusResponse,
        ThoughtQuery, ThoughtResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Redirect, Response},
};
use memebrane_core::{
    AttachmentContent, AttachmentId, Brain, EntityStore, MemebraneError, NeighbourOptions, NodeId,
    Projection, SearchPage, SearchRequest, gate_counts, neighbours, primitives::DEFAULT_SEARCH_LIMIT,
    rewrite_for_display, search,
};
use std::collections::BTreeSet;

use crate::fetch::Resolved;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Cache row counts.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.controller.with_store(|s| s.status()).await?;
    Ok(Json(status.into()))
}

// =============================================================================
// BRAIN
// =============================================================================

async fn brain_for(state: &AppState, segment: &str) -> Result<Brain, ApiError> {
    state
        .registry
        .resolve(segment)
        .await?
        .ok_or_else(|| ApiError(MemebraneError::NotFound(format!("brain '{}'", segment))))
}

/// Redirect to the brain's entry-point node.
pub async fn brain_handler(
    State(state): State<AppState>,
    Path(segment): Path<String>,
) -> Result<Redirect, ApiError> {
    let brain = brain_for(&state, &segment).await?;
    let base = brain.base_node_id.ok_or_else(|| {
        ApiError(MemebraneError::NotFound(format!(
            "brain '{}' has no entry point",
            segment
        )))
    })?;
    Ok(Redirect::to(&format!("/brain/{}/thought/{}", segment, base)))
}

// =============================================================================
// THOUGHT
// =============================================================================

/// Resolve a node and answer with its neighbours, gate counts and notes.
pub async fn thought_handler(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    Query(query): Query<ThoughtQuery>,
) -> Result<Json<ThoughtResponse>, ApiError> {
    let brain = brain_for(&state, &segment).await?;
    let id: NodeId = id.parse()?;
    let resolved = state
        .controller
        .resolve_node(brain.id, id, query.force)
        .await?;
    if resolved.node.is_private && !query.private {
        return Err(ApiError(MemebraneError::NotFound(format!(
            "node {} in brain {}",
            id, brain.id
        ))));
    }
    let response = state
        .controller
        .with_store(move |s| build_thought(s, brain, resolved, query))
        .await?;
    Ok(Json(response))
}

fn build_thought(
    store: &EntityStore,
    brain: Brain,
    resolved: Resolved,
    query: ThoughtQuery,
) -> Result<ThoughtResponse, MemebraneError> {
    let Resolved { node, payload } = resolved;
    let options = NeighbourOptions {
        include_private: query.private,
        projection: if query.full {
            Projection::Full
        } else {
            Projection::Summary
        },
        ..NeighbourOptions::default()
    };
    let neighbours = neighbours(store, &node, &options)?;

    let visible: BTreeSet<NodeId> = neighbours
        .iter()
        .map(|n| n.node.id())
        .chain(std::iter::once(node.id))
        .collect();
    let mut gates = gate_counts(store, &node, &options)?;
    gates.retain(|id, _| visible.contains(id));

    let default_brain = brain.safe_slug();
    let suffix = query.link_suffix();
    let mut notes = Vec::new();
    for attachment in store.node_attachments(brain.id, node.id)? {
        if !attachment.attachment_type.is_note() {
            continue;
        }
        if let Some(text) = store.attachment_text(brain.id, attachment.id)? {
            notes.push(RenderedNote {
                attachment_id: attachment.id,
                attachment_type: attachment.attachment_type,
                locale: attachment.inferred_locale,
                text: rewrite_for_display(&text, &default_brain, &suffix),
            });
        }
    }

    Ok(ThoughtResponse {
        brain,
        node,
        fetched: payload.is_some(),
        neighbours,
        gates,
        notes,
    })
}

/// Forced refetch of one node. Requires the admin key.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, Response> {
    auth::require_admin(&headers, state.config.admin_key.as_deref())
        .map_err(IntoResponse::into_response)?;

    let brain = brain_for(&state, &segment)
        .await
        .map_err(IntoResponse::into_response)?;
    let id: NodeId = id
        .parse()
        .map_err(|e| ApiError(e).into_response())?;
    let resolved = state
        .controller
        .resolve_node(brain.id, id, true)
        .await
        .map_err(|e| ApiError(e).into_response())?;

    tracing::info!(brain = %brain.id, node = %id, fetched = resolved.payload.is_some(), "refreshed");
    Ok(Json(RefreshResponse {
        node: resolved.node.summary(),
        fetched: resolved.payload.is_some(),
    }))
}

// =============================================================================
// SEARCH
// =============================================================================

/// Full-text search over the cached nodes of a brain.
pub async fn search_handler(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchPage>, ApiError> {
    let brain = brain_for(&state, &segment).await?;
    let request = SearchRequest {
        terms: query.q,
        start: query.start,
        limit: query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        language: query.lang,
        include_notes: query.notes,
    };
    let page = state
        .controller
        .with_store(move |s| search(s, brain.id, &request))
        .await?;
    Ok(Json(page))
}

// =============================================================================
// ATTACHMENT
// =============================================================================

/// Attachment payload, loaded from the remote on first access.
pub async fn attachment_handler(
    State(state): State<AppState>,
    Path((segment, id)): Path<(String, String)>,
    Query(query): Query<ThoughtQuery>,
) -> Result<Response, ApiError> {
    let brain = brain_for(&state, &segment).await?;
    let id: AttachmentId = id.parse()?;
    let brain_id = brain.id;

    let attachment = state
        .controller
        .with_store(move |s| {
            let Some(attachment) = s.get_attachment(brain_id, id)? else {
                return Ok(None);
            };
            let owner = s.get_node(brain_id, attachment.node_id)?;
            Ok(Some((attachment, owner.is_some_and(|n| n.is_private))))
        })
        .await?;
    let attachment = match attachment {
        Some((attachment, private)) if query.private || !private => attachment,
        _ => {
            return Err(ApiError(MemebraneError::NotFound(format!(
                "attachment {} in brain {}",
                id, brain_id
            ))));
        }
    };

    let content = state.controller.attachment_content(brain_id, id).await?;
    let response = match content {
        AttachmentContent::Text(text) => {
            let content_type = if attachment.location.ends_with(".md") {
                "text/markdown; charset=utf-8"
            } else {
                "text/html; charset=utf-8"
            };
            ([(header::CONTENT_TYPE, content_type)], text).into_response()
        }
        AttachmentContent::Binary(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
    };
    Ok(response)
}
