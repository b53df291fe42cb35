//! # Search Ranker
//!
//! Full-text search over the cached nodes of one brain, answered from the
//! tantivy index kept by the Entity Store.
//!
//! Names and note text are reduced to lexemes with the `TextConfig` of the
//! requested language. A signal matches only when every query lexeme
//! occurs in it. Names and notes are scored with BM25, the notes clause
//! boosted 2x, and the two are summed. Ranks are reported in millionths.

use serde::Serialize;

use crate::primitives::{DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::storage::{EntityStore, IndexQuery};
use crate::types::{BrainId, MemebraneError, NodeId};

/// One search query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub terms: String,
    pub start: usize,
    pub limit: usize,
    /// ISO 639-1 code. Selects the text configuration and filters note locales.
    pub language: Option<String>,
    pub include_notes: bool,
}

impl SearchRequest {
    #[must_use]
    pub fn new(terms: impl Into<String>) -> Self {
        Self {
            terms: terms.into(),
            start: 0,
            limit: DEFAULT_SEARCH_LIMIT,
            language: None,
            include_notes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub node_id: NodeId,
    pub name: String,
    pub rank: u64,
}

/// A page of hits with offset cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub start: usize,
    pub limit: usize,
    /// Offset of the next page, when this page came back full.
    pub next_start: Option<usize>,
    pub prev_start: Option<usize>,
}

/// Search the non-private nodes of `brain`.
///
/// A language the index has no stemmed fields for is searched with the
/// language-agnostic configuration; its notes still have to carry that
/// locale.
pub fn search(
    store: &EntityStore,
    brain: BrainId,
    request: &SearchRequest,
) -> Result<SearchPage, MemebraneError> {
    let limit = request.limit.clamp(1, MAX_SEARCH_LIMIT);
    let candidates = store.search_index(&IndexQuery {
        brain,
        terms: &request.terms,
        language: request.language.as_deref(),
        include_notes: request.include_notes,
        start: request.start,
        limit,
    })?;
    let full = candidates.len() == limit;

    // The index trails the store; the stored row decides visibility.
    let hits = store.read(|t| {
        let mut hits = Vec::with_capacity(candidates.len());
        for (id, rank) in &candidates {
            if let Some(node) = t.node(brain, *id)?
                && !node.is_private
            {
                hits.push(SearchHit {
                    node_id: node.id,
                    name: node.name,
                    rank: *rank,
                });
            }
        }
        Ok(hits)
    })?;

    Ok(SearchPage {
        hits,
        next_start: full.then(|| request.start.checked_add(limit)).flatten(),
        prev_start: (request.start > 0).then(|| request.start.saturating_sub(limit)),
        start: request.start,
        limit,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Attachment, AttachmentId, AttachmentType, Node, NodeKind};
    use chrono::{TimeZone, Utc};
    use tempfile::{TempDir, tempdir};
    use uuid::Uuid;

    fn setup() -> (TempDir, EntityStore, BrainId) {
        let dir = tempdir().unwrap();
        let store = EntityStore::open(dir.path().join("s.redb")).unwrap();
        (dir, store, BrainId(Uuid::new_v4()))
    }

    fn add_node(store: &EntityStore, brain: BrainId, name: &str, private: bool) -> Node {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let node = Node {
            id: NodeId(Uuid::new_v4()),
            brain_id: brain,
            name: name.to_string(),
            raw_data: "{}".to_string(),
            tag_ids: Vec::new(),
            text_link_ids: Vec::new(),
            last_read_at: at,
            last_modified_at: at,
            focus_modified_at: None,
            is_focus_cached: true,
            is_tag: false,
            is_type: false,
            is_private: private,
            kind: NodeKind::Normal,
        };
        store.write(|t| t.put_node(&node)).unwrap();
        node
    }

    fn add_note(store: &EntityStore, node: &Node, text: &str, locale: &str) {
        let attachment = Attachment {
            id: AttachmentId(Uuid::new_v4()),
            brain_id: node.brain_id,
            node_id: node.id,
            name: None,
            location: "Notes.html".to_string(),
            attachment_type: AttachmentType::NotesHtml,
            inferred_locale: Some(locale.to_string()),
            last_modified_at: node.last_modified_at,
        };
        store
            .write(|t| {
                t.put_attachment(&attachment)?;
                t.put_attachment_text(node.brain_id, attachment.id, text)
            })
            .unwrap();
    }

    fn names(page: &SearchPage) -> Vec<&str> {
        page.hits.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn stemmed_and_semantics() {
        let (_dir, store, brain) = setup();
        add_node(&store, brain, "Running dogs", false);
        add_node(&store, brain, "Running cats", false);
        add_node(&store, brain, "Sleeping dogs", false);

        let mut request = SearchRequest::new("run dog");
        request.language = Some("en".to_string());
        let page = search(&store, brain, &request).unwrap();
        assert_eq!(names(&page), vec!["Running dogs"]);
    }

    #[test]
    fn private_nodes_never_returned() {
        let (_dir, store, brain) = setup();
        add_node(&store, brain, "secret garden", true);
        add_node(&store, brain, "public garden", false);
        let page = search(&store, brain, &SearchRequest::new("garden")).unwrap();
        assert_eq!(names(&page), vec!["public garden"]);
    }

    #[test]
    fn notes_weighted_and_locale_filtered() {
        let (_dir, store, brain) = setup();
        let by_name = add_node(&store, brain, "wild orchids", false);
        let by_note = add_node(&store, brain, "flowers", false);
        let wrong_lang = add_node(&store, brain, "fleurs", false);
        add_note(&store, &by_note, "<p>orchids</p>", "en");
        add_note(&store, &wrong_lang, "<p>orchids</p>", "fr");

        let mut request = SearchRequest::new("orchids");
        request.include_notes = true;
        request.language = Some("en".to_string());
        let page = search(&store, brain, &request).unwrap();
        assert_eq!(names(&page), vec!["flowers", "wild orchids"]);
        assert!(page.hits[0].rank > page.hits[1].rank);

        request.include_notes = false;
        let page = search(&store, brain, &request).unwrap();
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].node_id, by_name.id);
    }

    #[test]
    fn pagination_cursors() {
        let (_dir, store, brain) = setup();
        for i in 0..5 {
            add_node(&store, brain, &format!("tree {}", i), false);
        }
        let mut request = SearchRequest::new("tree");
        request.limit = 2;
        let first = search(&store, brain, &request).unwrap();
        assert_eq!(first.hits.len(), 2);
        assert_eq!(first.next_start, Some(2));
        assert_eq!(first.prev_start, None);

        request.start = 4;
        let last = search(&store, brain, &request).unwrap();
        assert_eq!(last.hits.len(), 1);
        assert_eq!(last.next_start, None);
        assert_eq!(last.prev_start, Some(2));
    }

    #[test]
    fn huge_offset_is_an_empty_last_page() {
        let (_dir, store, brain) = setup();
        add_node(&store, brain, "lantern", false);
        let mut request = SearchRequest::new("lantern");
        request.start = usize::MAX;
        let page = search(&store, brain, &request).unwrap();
        assert!(page.hits.is_empty());
        assert_eq!(page.next_start, None);
        assert_eq!(page.prev_start, Some(usize::MAX - DEFAULT_SEARCH_LIMIT));
    }

    #[test]
    fn language_without_stemmed_fields_still_filters_note_locale() {
        let (_dir, store, brain) = setup();
        let french = add_node(&store, brain, "jardin", false);
        let english = add_node(&store, brain, "garden", false);
        add_note(&store, &french, "<p>les roses du jardin</p>", "fr");
        add_note(&store, &english, "<p>les roses du jardin</p>", "en");

        let mut request = SearchRequest::new("roses");
        request.include_notes = true;
        request.language = Some("fr".to_string());
        let page = search(&store, brain, &request).unwrap();
        assert_eq!(names(&page), vec!["jardin"]);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let (_dir, store, brain) = setup();
        add_node(&store, brain, "anything", false);
        assert!(search(&store, brain, &SearchRequest::new("  ")).unwrap().hits.is_empty());
    }
}
