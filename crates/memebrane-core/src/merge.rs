//! # Merge Engine
//!
//! Reconciles a freshly fetched subgraph into the Entity Store.
//!
//! ## Update gates
//!
//! Every stored fact has one clock, and an observation replaces a fact only
//! when its remote modification time is strictly newer (or the caller
//! forces it). Arrival order never decides.
//!
//! - Node content (name, `raw_data`, flags) follows `last_modified_at`.
//!   `raw_data` is replaced wholesale with the accepted payload object.
//! - Focus data (tags and text links from the root's notes) is only carried
//!   by focus fetches and follows `focus_modified_at`. The first focus fetch
//!   of a node always lands. Before that, neighbour tag lists are unioned.
//! - Links and attachments follow their own `last_modified_at`.
//! - `is_focus_cached` only moves to `true`. `last_read_at` is the latest
//!   focus read, or the latest observation of a node never fetched as focus.
//!
//! With those rules two merges of overlapping subgraphs end in the same
//! state whichever runs first.
//!
//! ## Atomicity
//!
//! The whole subgraph is written in one transaction. Any error aborts the
//! transaction and leaves the store as it was.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::codec::{extract_text_link_ids, rewrite_remote_asset_links};
use crate::locale::infer_locale;
use crate::payload::{AttachmentPayload, GraphPayload, LinkPayload, ThoughtPayload};
use crate::storage::{EntityStore, WriteTables};
use crate::types::{
    Attachment, AttachmentType, BrainId, Link, LinkMeaning, LinkType, MemebraneError, Node,
    NodeId, NodeKind, RelationKind,
};

/// What one merge did. Dropped entities are referential gaps, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MergeReport {
    pub nodes_inserted: usize,
    pub nodes_updated: usize,
    pub nodes_unchanged: usize,
    pub links_inserted: usize,
    pub links_updated: usize,
    pub links_unchanged: usize,
    pub links_dropped: usize,
    pub attachments_inserted: usize,
    pub attachments_updated: usize,
    pub attachments_unchanged: usize,
    pub attachments_dropped: usize,
}

/// Outcome of the gate for one link or attachment.
enum Gate<T> {
    Insert,
    Update(T),
    Keep(T),
}

fn gate<T>(
    old: Option<T>,
    stored_at: impl Fn(&T) -> DateTime<Utc>,
    incoming_at: DateTime<Utc>,
    force: bool,
) -> Gate<T> {
    match old {
        None => Gate::Insert,
        Some(old) if force || incoming_at > stored_at(&old) => Gate::Update(old),
        Some(old) => Gate::Keep(old),
    }
}

/// Tags and text links computed from a focus fetch.
struct FocusData {
    tag_ids: Vec<NodeId>,
    text_link_ids: Vec<NodeId>,
}

/// The merge engine. Stateless: all state lives in the store.
pub struct MergeEngine;

impl MergeEngine {
    /// Decode `value` and merge it. Shape errors surface as `MalformedPayload`
    /// before anything is written.
    pub fn merge_value(
        store: &EntityStore,
        brain: BrainId,
        value: &Value,
        force: bool,
        read_at: DateTime<Utc>,
    ) -> Result<MergeReport, MemebraneError> {
        let payload = GraphPayload::from_value(value)?;
        Self::merge_subgraph(store, brain, &payload, force, read_at)
    }

    /// Merge a decoded subgraph in one transaction.
    ///
    /// `read_at` is recorded as the focus read time; passing it explicitly
    /// keeps repeated merges of the same payload byte-identical.
    pub fn merge_subgraph(
        store: &EntityStore,
        brain: BrainId,
        payload: &GraphPayload,
        force: bool,
        read_at: DateTime<Utc>,
    ) -> Result<MergeReport, MemebraneError> {
        let thoughts = payload.node_payloads();
        let report = store.write(|t| {
            let mut report = MergeReport::default();
            for thought in thoughts.values() {
                Self::merge_node(t, brain, payload, thought, force, read_at, &mut report)?;
            }
            for link in &payload.links {
                Self::merge_link(t, brain, &thoughts, link, force, &mut report)?;
            }
            for attachment in &payload.attachments {
                Self::merge_attachment(
                    t,
                    brain,
                    payload,
                    &thoughts,
                    attachment,
                    force,
                    &mut report,
                )?;
            }
            Ok(report)
        })?;
        debug!(
            brain = %brain,
            root = %payload.root.id,
            nodes_inserted = report.nodes_inserted,
            nodes_updated = report.nodes_updated,
            links_dropped = report.links_dropped,
            attachments_dropped = report.attachments_dropped,
            "merged subgraph"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    fn merge_node(
        t: &mut WriteTables<'_>,
        brain: BrainId,
        payload: &GraphPayload,
        thought: &ThoughtPayload,
        force: bool,
        read_at: DateTime<Utc>,
        report: &mut MergeReport,
    ) -> Result<(), MemebraneError> {
        let is_root = thought.id == payload.root.id;
        let incoming_at = thought.combined_modified_at();
        let raw_data = raw_to_string(thought)?;
        let kind = NodeKind::from_wire(thought.kind);
        let focus = is_root.then(|| FocusData {
            tag_ids: root_tag_ids(payload, thought),
            text_link_ids: root_text_links(payload, brain),
        });

        let Some(old) = t.node(brain, thought.id)? else {
            report.nodes_inserted += 1;
            let (tag_ids, text_link_ids) = match focus {
                Some(focus) => (focus.tag_ids, focus.text_link_ids),
                None => (sorted(thought.tag_ids().unwrap_or_default()), Vec::new()),
            };
            return t.put_node(&Node {
                id: thought.id,
                brain_id: brain,
                name: thought.name.clone(),
                raw_data,
                tag_ids,
                text_link_ids,
                last_read_at: read_at,
                last_modified_at: incoming_at,
                focus_modified_at: is_root.then_some(incoming_at),
                is_focus_cached: is_root,
                is_tag: kind == NodeKind::Tag,
                is_type: kind == NodeKind::Type,
                is_private: thought.is_private(),
                kind,
            });
        };

        let mut node = old.clone();
        let content_accepted = force || incoming_at > old.last_modified_at;
        if content_accepted {
            node.name = thought.name.clone();
            node.raw_data = raw_data;
            node.is_private = thought.is_private();
            node.is_tag = kind == NodeKind::Tag;
            node.is_type = kind == NodeKind::Type;
            node.kind = kind;
            node.last_modified_at = incoming_at.max(old.last_modified_at);
        }

        let mut focus_accepted = false;
        match focus {
            Some(focus) => {
                focus_accepted =
                    force || old.focus_modified_at.is_none_or(|at| incoming_at > at);
                if focus_accepted {
                    node.tag_ids = focus.tag_ids;
                    node.text_link_ids = focus.text_link_ids;
                    node.focus_modified_at =
                        Some(old.focus_modified_at.map_or(incoming_at, |at| at.max(incoming_at)));
                }
                // A focus read refreshes the read time even when the data is not newer.
                node.last_read_at = if old.is_focus_cached {
                    old.last_read_at.max(read_at)
                } else {
                    read_at
                };
                node.is_focus_cached = true;
            }
            None if !old.is_focus_cached => {
                if let Some(tags) = thought.tag_ids() {
                    node.tag_ids.extend(tags);
                    node.tag_ids = sorted(std::mem::take(&mut node.tag_ids));
                }
                node.last_read_at = old.last_read_at.max(read_at);
            }
            None => {}
        }

        if content_accepted || focus_accepted {
            report.nodes_updated += 1;
        } else {
            report.nodes_unchanged += 1;
        }
        if node == old {
            return Ok(());
        }
        t.put_node(&node)
    }

    // -------------------------------------------------------------------------
    // Links
    // -------------------------------------------------------------------------

    fn merge_link(
        t: &mut WriteTables<'_>,
        brain: BrainId,
        thoughts: &BTreeMap<NodeId, &ThoughtPayload>,
        incoming: &LinkPayload,
        force: bool,
        report: &mut MergeReport,
    ) -> Result<(), MemebraneError> {
        let (parent_id, child_id, relation) =
            match RelationKind::from_wire(incoming.relation) {
                RelationKind::Parent => {
                    (incoming.thought_id_b, incoming.thought_id_a, RelationKind::Child)
                }
                RelationKind::Sibling => {
                    (incoming.thought_id_a, incoming.thought_id_b, RelationKind::NoValue)
                }
                other => (incoming.thought_id_a, incoming.thought_id_b, other),
            };

        // Endpoints are checked against this payload only, so the outcome
        // does not depend on what earlier merges happened to cache.
        for endpoint in [parent_id, child_id] {
            if !thoughts.contains_key(&endpoint) {
                warn!(
                    brain = %brain,
                    link = %incoming.id,
                    node = %endpoint,
                    reason = "missing endpoint",
                    "dropping link"
                );
                report.links_dropped += 1;
                return Ok(());
            }
        }

        let incoming_at = incoming.modification_date_time;
        let old = t.link(brain, incoming.id)?;
        let stored_at = |l: &Link| l.last_modified_at;
        let last_modified_at = match gate(old, stored_at, incoming_at, force) {
            Gate::Keep(_) => {
                report.links_unchanged += 1;
                return Ok(());
            }
            Gate::Insert => {
                report.links_inserted += 1;
                incoming_at
            }
            Gate::Update(old) => {
                report.links_updated += 1;
                incoming_at.max(old.last_modified_at)
            }
        };

        let (is_directed, is_one_way, is_reversed) = Link::direction_flags(incoming.direction);
        t.put_link(&Link {
            id: incoming.id,
            brain_id: brain,
            parent_id,
            child_id,
            relation,
            meaning: LinkMeaning::from_wire(incoming.meaning),
            link_type: LinkType::from_wire(incoming.kind),
            is_directed,
            is_one_way,
            is_reversed,
            last_modified_at,
        })
    }

    // -------------------------------------------------------------------------
    // Attachments
    // -------------------------------------------------------------------------

    fn merge_attachment(
        t: &mut WriteTables<'_>,
        brain: BrainId,
        payload: &GraphPayload,
        thoughts: &BTreeMap<NodeId, &ThoughtPayload>,
        incoming: &AttachmentPayload,
        force: bool,
        report: &mut MergeReport,
    ) -> Result<(), MemebraneError> {
        if !thoughts.contains_key(&incoming.source_id) {
            warn!(
                brain = %brain,
                attachment = %incoming.id,
                node = %incoming.source_id,
                reason = "missing owner",
                "dropping attachment"
            );
            report.attachments_dropped += 1;
            return Ok(());
        }
        let Some(attachment_type) = AttachmentType::from_wire(incoming.attachment_type) else {
            warn!(
                brain = %brain,
                attachment = %incoming.id,
                code = incoming.attachment_type,
                reason = "unknown attachment type",
                "dropping attachment"
            );
            report.attachments_dropped += 1;
            return Ok(());
        };

        // Only the focus payload carries note text.
        let note_text = if attachment_type.is_note() && incoming.source_id == payload.root.id {
            select_notes(payload, &incoming.location).map(rewrite_remote_asset_links)
        } else {
            None
        };

        let incoming_at = incoming.modification_date_time;
        let old = t.attachment(brain, incoming.id)?;
        let stored_at = |a: &Attachment| a.last_modified_at;
        let (mut row, accepted) = match gate(old, stored_at, incoming_at, force) {
            Gate::Keep(old) => {
                report.attachments_unchanged += 1;
                (old, false)
            }
            Gate::Insert => {
                report.attachments_inserted += 1;
                (
                    Attachment {
                        id: incoming.id,
                        brain_id: brain,
                        node_id: incoming.source_id,
                        name: incoming.name.clone(),
                        location: incoming.location.clone(),
                        attachment_type,
                        inferred_locale: None,
                        last_modified_at: incoming_at,
                    },
                    true,
                )
            }
            Gate::Update(old) => {
                report.attachments_updated += 1;
                (
                    Attachment {
                        id: incoming.id,
                        brain_id: brain,
                        node_id: incoming.source_id,
                        name: incoming.name.clone(),
                        location: incoming.location.clone(),
                        attachment_type,
                        inferred_locale: old.inferred_locale,
                        last_modified_at: incoming_at.max(old.last_modified_at),
                    },
                    true,
                )
            }
        };

        // Text follows the attachment's clock, but a row that has no text yet
        // takes it from whichever focus payload arrives, older or not.
        let note_text = match note_text {
            Some(text) if accepted || !t.has_attachment_text(brain, incoming.id)? => Some(text),
            _ => None,
        };
        if !accepted && note_text.is_none() {
            return Ok(());
        }

        if let Some(text) = &note_text {
            row.inferred_locale = Some(infer_locale(text));
        }
        t.put_attachment(&row)?;
        if let Some(text) = note_text {
            t.put_attachment_text(brain, incoming.id, &text)?;
        }
        Ok(())
    }
}

/// The payload object with canonical field names, as stored in `raw_data`.
fn raw_to_string(thought: &ThoughtPayload) -> Result<String, MemebraneError> {
    serde_json::to_string(&thought.to_raw_object()?)
        .map_err(|e| MemebraneError::Serialization(e.to_string()))
}

fn sorted(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort();
    ids.dedup();
    ids
}

/// The focus node's tags: its own tag list plus the tag nodes sent alongside it.
fn root_tag_ids(payload: &GraphPayload, root: &ThoughtPayload) -> Vec<NodeId> {
    let mut ids = root.tag_ids().unwrap_or_default();
    ids.extend(payload.tags.iter().map(|t| t.id));
    sorted(ids)
}

fn root_text_links(payload: &GraphPayload, brain: BrainId) -> Vec<NodeId> {
    let mut ids = Vec::new();
    for notes in [&payload.notes_html, &payload.notes_markdown]
        .into_iter()
        .flatten()
    {
        ids.extend(extract_text_link_ids(notes, brain));
    }
    sorted(ids)
}

/// Markdown notes for `.md` locations, HTML notes otherwise.
fn select_notes<'a>(payload: &'a GraphPayload, location: &str) -> Option<&'a str> {
    let markdown = payload.notes_markdown.as_deref();
    let html = payload.notes_html.as_deref();
    if location.ends_with(".md") {
        markdown.or(html)
    } else {
        html.or(markdown)
    }
}

// =============================================================================
// TESTS
// =============================================================================
