//! # Remote Graph Payload
//!
//! Typed view of the JSON subgraph the remote service returns for
//! `GET {api}/brains/{brain}/thoughts/{id}/graph`.
//!
//! The remote service is inconsistent about key capitalization. Every
//! field below names its canonical camelCase key and, as an alias, the
//! PascalCase form. That table is the whole normalization: nested values
//! that are not part of the table are kept exactly as received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::types::{AttachmentId, BrainId, LinkId, MemebraneError, NodeId};

// =============================================================================
// GRAPH
// =============================================================================

/// The subgraph around one focus node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPayload {
    #[serde(alias = "Root")]
    pub root: RootPayload,
    #[serde(default, alias = "Thoughts")]
    pub thoughts: Vec<ThoughtPayload>,
    #[serde(default, alias = "Links")]
    pub links: Vec<LinkPayload>,
    /// Tag nodes returned alongside the neighbours.
    #[serde(default, alias = "Tags")]
    pub tags: Vec<ThoughtPayload>,
    #[serde(default, alias = "Attachments")]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default, alias = "NotesHtml")]
    pub notes_html: Option<String>,
    #[serde(default, alias = "NotesMarkdown")]
    pub notes_markdown: Option<String>,
}

/// The focus node and the id lists of its immediate neighbourhood.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootPayload {
    #[serde(alias = "Id")]
    pub id: NodeId,
    /// Attachment summaries as received; full rows come from the top-level list.
    #[serde(default, alias = "Attachments")]
    pub attachments: Vec<Value>,
    #[serde(default, alias = "Jumps")]
    pub jumps: Vec<NodeId>,
    #[serde(default, alias = "Parents")]
    pub parents: Vec<NodeId>,
    #[serde(default, alias = "Siblings")]
    pub siblings: Vec<NodeId>,
    #[serde(default, alias = "Children")]
    pub children: Vec<NodeId>,
}

impl GraphPayload {
    /// Decode a payload, mapping any shape error to `MalformedPayload`.
    pub fn from_value(value: &Value) -> Result<Self, MemebraneError> {
        Self::deserialize(value).map_err(|e| MemebraneError::MalformedPayload(e.to_string()))
    }

    /// Decode a payload from raw response bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MemebraneError> {
        serde_json::from_slice(bytes).map_err(|e| MemebraneError::MalformedPayload(e.to_string()))
    }

    /// Every node in the payload keyed by id. Tag entries win over thought
    /// entries with the same id.
    #[must_use]
    pub fn node_payloads(&self) -> BTreeMap<NodeId, &ThoughtPayload> {
        self.thoughts
            .iter()
            .chain(self.tags.iter())
            .map(|t| (t.id, t))
            .collect()
    }
}

// =============================================================================
// THOUGHT
// =============================================================================

/// Reference to a tag node inside a thought's `tags` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    #[serde(alias = "Id")]
    pub id: NodeId,
}

/// One node as the remote service describes it.
///
/// Fields the cache does not interpret are kept in `extra` so the stored
/// raw payload stays a superset of the structured columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtPayload {
    #[serde(alias = "Id")]
    pub id: NodeId,
    #[serde(alias = "BrainId")]
    pub brain_id: BrainId,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "ModificationDateTime", with = "timestamp")]
    pub modification_date_time: DateTime<Utc>,
    #[serde(
        default,
        alias = "LinksModificationDateTime",
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub links_modification_date_time: Option<DateTime<Utc>>,
    #[serde(default = "default_kind", alias = "Kind")]
    pub kind: u8,
    #[serde(default, alias = "Tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagRef>>,
    #[serde(
        default,
        rename = "ACType",
        alias = "acType",
        skip_serializing_if = "Option::is_none"
    )]
    pub ac_type: Option<u8>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const fn default_kind() -> u8 {
    1
}

/// Access type marking a node as private.
const AC_TYPE_PRIVATE: u8 = 1;

impl ThoughtPayload {
    /// The later of the node's own and its links' modification times.
    #[must_use]
    pub fn combined_modified_at(&self) -> DateTime<Utc> {
        match self.links_modification_date_time {
            Some(links) if links > self.modification_date_time => links,
            _ => self.modification_date_time,
        }
    }

    #[must_use]
    pub fn is_private(&self) -> bool {
        self.ac_type == Some(AC_TYPE_PRIVATE)
    }

    /// Tag ids in canonical order, or `None` when the payload carries no tag list.
    #[must_use]
    pub fn tag_ids(&self) -> Option<Vec<NodeId>> {
        self.tags.as_ref().map(|tags| {
            let mut ids: Vec<NodeId> = tags.iter().map(|t| t.id).collect();
            ids.sort();
            ids.dedup();
            ids
        })
    }

    /// The payload as a JSON object without its tag list.
    pub fn to_raw_object(&self) -> Result<Map<String, Value>, MemebraneError> {
        let value =
            serde_json::to_value(self).map_err(|e| MemebraneError::Serialization(e.to_string()))?;
        match value {
            Value::Object(mut map) => {
                map.remove("tags");
                Ok(map)
            }
            _ => Err(MemebraneError::Serialization(
                "thought payload did not serialize to an object".to_string(),
            )),
        }
    }
}

// =============================================================================
// LINK
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPayload {
    #[serde(alias = "Id")]
    pub id: LinkId,
    #[serde(alias = "BrainId")]
    pub brain_id: BrainId,
    #[serde(alias = "ThoughtIdA")]
    pub thought_id_a: NodeId,
    #[serde(alias = "ThoughtIdB")]
    pub thought_id_b: NodeId,
    #[serde(alias = "Relation")]
    pub relation: u8,
    #[serde(default, alias = "Meaning")]
    pub meaning: u8,
    #[serde(default, alias = "Kind")]
    pub kind: u8,
    #[serde(default, alias = "Direction")]
    pub direction: u8,
    #[serde(alias = "ModificationDateTime", with = "timestamp")]
    pub modification_date_time: DateTime<Utc>,
}

// =============================================================================
// ATTACHMENT
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    #[serde(alias = "Id")]
    pub id: AttachmentId,
    #[serde(alias = "BrainId")]
    pub brain_id: BrainId,
    /// The owning node.
    #[serde(alias = "SourceId")]
    pub source_id: NodeId,
    #[serde(alias = "Location")]
    pub location: String,
    #[serde(rename = "type", alias = "Type")]
    pub attachment_type: u8,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(alias = "ModificationDateTime", with = "timestamp")]
    pub modification_date_time: DateTime<Utc>,
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Remote timestamps are ISO-8601, with or without an offset.
/// Values without an offset are taken as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => super::serialize(dt, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                None => Ok(None),
                Some(raw) if raw.is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw))),
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
