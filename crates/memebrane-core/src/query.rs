//! # Neighbour Query Engine
//!
//! Reconstructs the typed relationships of a node from the single link
//! table and the denormalized tag/text-link id sets.
//!
//! Each relation type is produced by its own sub-query. The sub-queries
//! never consult each other's output: `sibling` derives the parent set on
//! its own, so switching `parents` off does not change the siblings.
//! Results are unioned and ordered by `(relation, name, id)`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::storage::{EntityStore, ReadTables};
use crate::types::{BrainId, Link, MemebraneError, Node, NodeId, NodeSummary};

/// Kind of relationship between the subject and a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Parent,
    Child,
    Sibling,
    Jump,
    Tag,
    OfTag,
    TextLink,
    TextBacklink,
}

/// Shape of each neighbour in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Identifier and name only.
    #[default]
    Summary,
    /// The whole cached node.
    Full,
}

/// Which sub-queries run and how their results are filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourOptions {
    pub parents: bool,
    pub children: bool,
    pub siblings: bool,
    pub jumps: bool,
    pub tags: bool,
    pub of_tags: bool,
    pub text_links: bool,
    pub text_backlinks: bool,
    /// When false, private nodes are excluded from every relation.
    pub include_private: bool,
    pub projection: Projection,
}

impl Default for NeighbourOptions {
    fn default() -> Self {
        Self {
            parents: true,
            children: true,
            siblings: true,
            jumps: true,
            tags: true,
            of_tags: true,
            text_links: true,
            text_backlinks: true,
            include_private: false,
            projection: Projection::Summary,
        }
    }
}

/// A neighbour in the requested projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NeighbourNode {
    Summary(NodeSummary),
    Full(Box<Node>),
}

impl NeighbourNode {
    #[must_use]
    pub fn id(&self) -> NodeId {
        match self {
            Self::Summary(s) => s.id,
            Self::Full(n) => n.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Summary(s) => &s.name,
            Self::Full(n) => &n.name,
        }
    }
}

/// One row of the neighbour query. Tag and text relations carry no link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbour {
    pub relation: RelationType,
    pub node: NeighbourNode,
    pub link: Option<Link>,
}

/// Link counts behind a node, used to preview what lies beyond a neighbour.
/// Jump links are only counted in `jumps`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GateCounts {
    pub children: usize,
    pub parents: usize,
    pub jumps: usize,
}

type Row = (RelationType, Node, Option<Link>);

// =============================================================================
// SUB-QUERIES
// =============================================================================

fn resolve(
    t: &ReadTables,
    brain: BrainId,
    id: NodeId,
    options: &NeighbourOptions,
) -> Result<Option<Node>, MemebraneError> {
    Ok(t
        .node(brain, id)?
        .filter(|n| options.include_private || !n.is_private))
}

fn non_jump_parent_links(t: &ReadTables, subject: &Node) -> Result<Vec<Link>, MemebraneError> {
    Ok(t.links_to_child(subject.brain_id, subject.id)?
        .into_iter()
        .filter(|l| !l.is_jump())
        .collect())
}

fn parents(
    t: &ReadTables,
    subject: &Node,
    options: &NeighbourOptions,
) -> Result<Vec<Row>, MemebraneError> {
    let mut rows = Vec::new();
    for link in non_jump_parent_links(t, subject)? {
        if let Some(node) = resolve(t, subject.brain_id, link.parent_id, options)? {
            rows.push((RelationType::Parent, node, Some(link)));
        }
    }
    Ok(rows)
}

fn children(
    t: &ReadTables,
    subject: &Node,
    options: &NeighbourOptions,
) -> Result<Vec<Row>, MemebraneError> {
    let mut rows = Vec::new();
    for link in t.links_from_parent(subject.brain_id, subject.id)? {
        if link.is_jump() {
            continue;
        }
        if let Some(node) = resolve(t, subject.brain_id, link.child_id, options)? {
            rows.push((RelationType::Child, node, Some(link)));
        }
    }
    Ok(rows)
}

/// Children of the subject's parents, through non-jump links, minus the subject.
fn siblings(
    t: &ReadTables,
    subject: &Node,
    options: &NeighbourOptions,
) -> Result<Vec<Row>, MemebraneError> {
    let parent_ids: BTreeSet<NodeId> = non_jump_parent_links(t, subject)?
        .into_iter()
        .map(|l| l.parent_id)
        .collect();
    let mut rows = Vec::new();
    for parent in parent_ids {
        for link in t.links_from_parent(subject.brain_id, parent)? {
            if link.is_jump() || link.child_id == subject.id {
                continue;
            }
            if let Some(node) = resolve(t, subject.brain_id, link.child_id, options)? {
                rows.push((RelationType::Sibling, node, Some(link)));
            }
        }
    }
    Ok(rows)
}

/// Jump links in either direction.
fn jumps(
    t: &ReadTables,
    subject: &Node,
    options: &NeighbourOptions,
) -> Result<Vec<Row>, MemebraneError> {
    let mut rows = Vec::new();
    let outgoing = t.links_from_parent(subject.brain_id, subject.id)?;
    let incoming = t.links_to_child(subject.brain_id, subject.id)?;
    let mut seen = BTreeSet::new();
    for link in outgoing.into_iter().chain(incoming) {
        if !link.is_jump() || !seen.insert(link.id) {
            continue;
        }
        let Some(other) = link.other_end(subject.id) else {
            continue;
        };
        if let Some(node) = resolve(t, subject.brain_id, other, options)? {
            rows.push((RelationType::Jump, node, Some(link)));
        }
    }
    Ok(rows)
}

fn by_ids(
    t: &ReadTables,
    subject: &Node,
    relation: RelationType,
    ids: &[NodeId],
    options: &NeighbourOptions,
) -> Result<Vec<Row>, MemebraneError> {
    let mut rows = Vec::new();
    for id in ids {
        if let Some(node) = resolve(t, subject.brain_id, *id, options)? {
            rows.push((relation, node, None));
        }
    }
    Ok(rows)
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// All enabled relations of `subject`, read from one snapshot.
pub fn neighbours(
    store: &EntityStore,
    subject: &Node,
    options: &NeighbourOptions,
) -> Result<Vec<Neighbour>, MemebraneError> {
    let mut rows = store.read(|t| {
        let mut rows: Vec<Row> = Vec::new();
        if options.parents {
            rows.extend(parents(t, subject, options)?);
        }
        if options.children {
            rows.extend(children(t, subject, options)?);
        }
        if options.siblings {
            rows.extend(siblings(t, subject, options)?);
        }
        if options.jumps {
            rows.extend(jumps(t, subject, options)?);
        }
        if options.tags {
            rows.extend(by_ids(t, subject, RelationType::Tag, &subject.tag_ids, options)?);
        }
        if options.of_tags {
            let ids = t.tagged_with(subject.brain_id, subject.id)?;
            rows.extend(by_ids(t, subject, RelationType::OfTag, &ids, options)?);
        }
        if options.text_links {
            rows.extend(by_ids(
                t,
                subject,
                RelationType::TextLink,
                &subject.text_link_ids,
                options,
            )?);
        }
        if options.text_backlinks {
            let ids = t.text_linking_to(subject.brain_id, subject.id)?;
            rows.extend(by_ids(t, subject, RelationType::TextBacklink, &ids, options)?);
        }
        Ok(rows)
    })?;

    rows.sort_by(|a, b| {
        (a.0, &a.1.name, a.1.id, a.2.as_ref().map(|l| l.id))
            .cmp(&(b.0, &b.1.name, b.1.id, b.2.as_ref().map(|l| l.id)))
    });

    Ok(rows
        .into_iter()
        .map(|(relation, node, link)| Neighbour {
            relation,
            node: match options.projection {
                Projection::Summary => NeighbourNode::Summary(node.summary()),
                Projection::Full => NeighbourNode::Full(Box::new(node)),
            },
            link,
        })
        .collect())
}

/// Gate counts for `subject` and its parents, children, siblings and jump targets.
///
/// Only `options.include_private` is consulted. Without it, private
/// neighbours get no entry and links leading to a private node are not
/// counted, so the counts reveal nothing hidden.
pub fn gate_counts(
    store: &EntityStore,
    subject: &Node,
    options: &NeighbourOptions,
) -> Result<BTreeMap<NodeId, GateCounts>, MemebraneError> {
    let brain = subject.brain_id;
    store.read(|t| {
        let visible = NeighbourOptions {
            include_private: options.include_private,
            ..NeighbourOptions::default()
        };
        let mut ids = BTreeSet::from([subject.id]);
        for (_, node, _) in parents(t, subject, &visible)?
            .into_iter()
            .chain(children(t, subject, &visible)?)
            .chain(siblings(t, subject, &visible)?)
            .chain(jumps(t, subject, &visible)?)
        {
            ids.insert(node.id);
        }

        let mut private = BTreeMap::new();
        let mut hidden = |id: NodeId| -> Result<bool, MemebraneError> {
            if options.include_private {
                return Ok(false);
            }
            if let Some(known) = private.get(&id) {
                return Ok(*known);
            }
            let is_private = t.node(brain, id)?.is_some_and(|n| n.is_private);
            private.insert(id, is_private);
            Ok(is_private)
        };

        let mut counts = BTreeMap::new();
        for id in ids {
            let mut gate = GateCounts::default();
            for link in t.links_from_parent(brain, id)? {
                if hidden(link.child_id)? {
                    continue;
                }
                if link.is_jump() {
                    gate.jumps += 1;
                } else {
                    gate.children += 1;
                }
            }
            for link in t.links_to_child(brain, id)? {
                if hidden(link.parent_id)? {
                    continue;
                }
                if link.is_jump() {
                    // A self-jump was already counted from the parent side.
                    if link.parent_id != link.child_id {
                        gate.jumps += 1;
                    }
                } else {
                    gate.parents += 1;
                }
            }
            counts.insert(id, gate);
        }
        Ok(counts)
    })
}

// =============================================================================
// TESTS
// =============================================================================
