//! # Link Codec
//!
//! Cross-references inside note text use the form
//! `brain://[api.thebrain.com/<brain>/]<node>/<suffix>` where `<brain>` and
//! `<node>` are 22-character URL-safe base64 strings of little-endian UUIDs.
//!
//! This module decodes those references, rewrites them into local
//! addresses for display, and strips absolute remote asset URLs out of
//! cached note text.
//!
//! A malformed reference is skipped on its own; the rest of the text is
//! still processed.

use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::primitives::{ENCODED_ID_LEN, LOCAL_ASSET_PREFIX};
use crate::types::{BrainId, NodeId};

/// URL-safe alphabet, no padding on encode, padding optional on decode.
/// The 22-character form carries four trailing bits that must be tolerated.
const ID_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Host segment used by the remote service for cross-brain references.
const REMOTE_HOST: &str = "api.thebrain.com";

static LINK_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"\bbrain://(?:api\.thebrain\.com/(?P<brain>[-_A-Za-z0-9]{22})/)?(?P<node>[-_A-Za-z0-9]{22})/(?P<suffix>\w+)\b",
    )
    .ok()
});

static REMOTE_ASSET_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"https?://[^\s"'()<>]+/brains/[-0-9A-Fa-f]{36}/thoughts/[-0-9A-Fa-f]{36}/md-images/(?P<file>[^\s"'()<>?#]+)"#,
    )
    .ok()
});

/// One decoded cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkReference {
    pub node_id: NodeId,
    /// Present only when the reference names another brain explicitly.
    pub brain_id: Option<BrainId>,
}

fn decode_uuid(segment: &str) -> Option<Uuid> {
    if segment.len() != ENCODED_ID_LEN {
        return None;
    }
    let bytes = ID_ENGINE.decode(segment).ok()?;
    let bytes: [u8; 16] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes_le(bytes))
}

fn encode_uuid(id: Uuid) -> String {
    ID_ENGINE.encode(id.to_bytes_le())
}

fn reference_from(caps: &Captures<'_>) -> Option<LinkReference> {
    let node_id = NodeId(decode_uuid(caps.name("node")?.as_str())?);
    let brain_id = match caps.name("brain") {
        Some(segment) => Some(BrainId(decode_uuid(segment.as_str())?)),
        None => None,
    };
    Some(LinkReference { node_id, brain_id })
}

/// Decode every well-formed reference in `text`, in order of appearance.
#[must_use]
pub fn decode_references(text: &str) -> Vec<LinkReference> {
    let Some(re) = LINK_RE.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| reference_from(&caps))
        .collect()
}

/// Encode a reference the way the remote service embeds it in notes.
#[must_use]
pub fn encode_reference(node_id: NodeId, brain_id: Option<BrainId>, suffix: &str) -> String {
    match brain_id {
        Some(brain) => format!(
            "brain://{}/{}/{}/{}",
            REMOTE_HOST,
            encode_uuid(brain.0),
            encode_uuid(node_id.0),
            suffix
        ),
        None => format!("brain://{}/{}", encode_uuid(node_id.0), suffix),
    }
}

/// Replace each reference with `/brain/{brain}/thought/{node}{query_suffix}`.
///
/// `default_brain` is the brain segment used when a reference names none
/// (normally the current brain's safe slug). All other bytes, including
/// malformed references, are left untouched.
#[must_use]
pub fn rewrite_for_display(text: &str, default_brain: &str, query_suffix: &str) -> String {
    let Some(re) = LINK_RE.as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures<'_>| match reference_from(caps) {
        Some(LinkReference {
            node_id,
            brain_id: Some(brain),
        }) => format!("/brain/{}/thought/{}{}", brain, node_id, query_suffix),
        Some(LinkReference {
            node_id,
            brain_id: None,
        }) => format!("/brain/{}/thought/{}{}", default_brain, node_id, query_suffix),
        None => caps[0].to_string(),
    })
    .into_owned()
}

/// Replace absolute remote note-image URLs with `.data/md-images/{file}`.
#[must_use]
pub fn rewrite_remote_asset_links(text: &str) -> String {
    let Some(re) = REMOTE_ASSET_RE.as_ref() else {
        return text.to_string();
    };
    re.replace_all(text, |caps: &Captures<'_>| {
        format!("{}{}", LOCAL_ASSET_PREFIX, &caps["file"])
    })
    .into_owned()
}

/// Node ids referenced from `text` that belong to `brain`, sorted and deduplicated.
///
/// References without a brain segment count as same-brain.
#[must_use]
pub fn extract_text_link_ids(text: &str, brain: BrainId) -> Vec<NodeId> {
    let mut ids: Vec<NodeId> = decode_references(text)
        .into_iter()
        .filter(|r| r.brain_id.is_none_or(|b| b == brain))
        .map(|r| r.node_id)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

// =============================================================================
// TESTS
// =============================================================================
