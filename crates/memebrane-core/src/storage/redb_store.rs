//! # redb-backed Entity Store
//!
//! A disk-backed store for the cached graph using the redb embedded database:
//! - ACID transactions (a merge either lands completely or not at all)
//! - MVCC (concurrent readers, single writer)
//! - Crash safety (copy-on-write B-trees)
//!
//! ## Layout
//!
//! Entity rows live in `nodes`, `links` and `attachments`, keyed by
//! `(brain, id)`. Attachment payloads are kept out-of-line in
//! `attachment_text` and `attachment_content` so that ordinary row reads
//! never load them. Index tables hold `(brain, key, id) -> ()` entries.
//!
//! `search_pending` holds `(brain, node) -> stamp` for nodes whose search
//! document is out of date. The stamp identifies the write that marked the
//! node, so a drain only clears marks that no later write has renewed.

use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableDatabase, ReadableTable,
    ReadableTableMetadata, Table, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use super::search_index::{IndexQuery, IndexUpdate, IndexedNote, SearchIndex};
use crate::codec::rewrite_remote_asset_links;
use crate::locale::{infer_locale, plain_text};
use crate::primitives::{DEFAULT_INDEX_LANGUAGES, SCHEMA_VERSION};
use crate::types::{
    Attachment, AttachmentContent, AttachmentId, Brain, BrainId, Link, LinkId, MemebraneError,
    Node, NodeId,
};

type RowKey = (u128, u128);
type IndexKey = (u128, u128, u128);

/// Brains: BrainId -> serialized Brain
const BRAINS: TableDefinition<u128, &[u8]> = TableDefinition::new("brains");

/// Slug uniqueness: slug -> BrainId
const BRAIN_SLUGS: TableDefinition<&str, u128> = TableDefinition::new("brain_slugs");

/// Nodes: (brain, node) -> serialized Node
const NODES: TableDefinition<RowKey, &[u8]> = TableDefinition::new("nodes");

/// Links: (brain, link) -> serialized Link
const LINKS: TableDefinition<RowKey, &[u8]> = TableDefinition::new("links");

/// Attachment metadata: (brain, attachment) -> serialized Attachment
const ATTACHMENTS: TableDefinition<RowKey, &[u8]> = TableDefinition::new("attachments");

/// Decoded note text: (brain, attachment) -> text
const ATTACHMENT_TEXT: TableDefinition<RowKey, &str> = TableDefinition::new("attachment_text");

/// Binary payloads: (brain, attachment) -> bytes
const ATTACHMENT_CONTENT: TableDefinition<RowKey, &[u8]> =
    TableDefinition::new("attachment_content");

/// (brain, parent, link)
const LINKS_BY_PARENT: TableDefinition<IndexKey, ()> = TableDefinition::new("links_by_parent");

/// (brain, child, link)
const LINKS_BY_CHILD: TableDefinition<IndexKey, ()> = TableDefinition::new("links_by_child");

/// (brain, tag, tagged node)
const TAG_INDEX: TableDefinition<IndexKey, ()> = TableDefinition::new("tag_index");

/// (brain, referenced node, referencing node)
const TEXT_LINK_INDEX: TableDefinition<IndexKey, ()> = TableDefinition::new("text_link_index");

/// (brain, node, attachment)
const ATTACHMENTS_BY_NODE: TableDefinition<IndexKey, ()> =
    TableDefinition::new("attachments_by_node");

/// Nodes awaiting reindexing: (brain, node) -> write stamp
const SEARCH_PENDING: TableDefinition<RowKey, u64> = TableDefinition::new("search_pending");

/// Metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

fn storage(e: impl Display) -> MemebraneError {
    MemebraneError::Storage(e.to_string())
}

fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>, MemebraneError> {
    postcard::to_allocvec(row).map_err(|e| MemebraneError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MemebraneError> {
    postcard::from_bytes(bytes).map_err(|e| MemebraneError::Serialization(e.to_string()))
}

fn load<T, Tb>(table: &Tb, key: RowKey) -> Result<Option<T>, MemebraneError>
where
    T: DeserializeOwned,
    Tb: ReadableTable<RowKey, &'static [u8]>,
{
    match table.get(key).map_err(storage)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_index<Tb>(table: &Tb, brain: u128, key: u128) -> Result<Vec<u128>, MemebraneError>
where
    Tb: ReadableTable<IndexKey, ()>,
{
    let mut ids = Vec::new();
    for entry in table
        .range((brain, key, 0u128)..=(brain, key, u128::MAX))
        .map_err(storage)?
    {
        let (k, _) = entry.map_err(storage)?;
        ids.push(k.value().2);
    }
    Ok(ids)
}

/// The search index directory that belongs to a database file.
fn search_dir(path: &Path) -> PathBuf {
    let mut dir = OsString::from(path.as_os_str());
    dir.push(".search");
    PathBuf::from(dir)
}

/// Row counts reported by `EntityStore::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStatus {
    pub brains: u64,
    pub nodes: u64,
    pub links: u64,
    pub attachments: u64,
    /// Nodes with a search document.
    pub searchable_nodes: u64,
    /// Nodes whose search document is waiting to be rebuilt.
    pub search_pending: u64,
    pub schema_version: u64,
}

// =============================================================================
// ENTITY STORE
// =============================================================================

/// The persistent cache.
///
/// `EntityStore` is `Send + Sync`; readers run concurrently with one writer.
pub struct EntityStore {
    db: Database,
    search: SearchIndex,
    stamp: AtomicU64,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore").finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Open or create a store at the given path, indexing the default languages.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemebraneError> {
        Self::open_with_languages(path, DEFAULT_INDEX_LANGUAGES)
    }

    /// Open or create a store whose search index has stemmed fields for
    /// `languages` in addition to the language-agnostic ones.
    ///
    /// The index lives in `<path>.search`. A missing index, or one built for
    /// other languages, is rebuilt from the cached nodes.
    pub fn open_with_languages(
        path: impl AsRef<Path>,
        languages: &[&str],
    ) -> Result<Self, MemebraneError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(storage)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(storage)?;
        {
            write_txn.open_table(BRAINS).map_err(storage)?;
            write_txn.open_table(BRAIN_SLUGS).map_err(storage)?;
            write_txn.open_table(NODES).map_err(storage)?;
            write_txn.open_table(LINKS).map_err(storage)?;
            write_txn.open_table(ATTACHMENTS).map_err(storage)?;
            write_txn.open_table(ATTACHMENT_TEXT).map_err(storage)?;
            write_txn.open_table(ATTACHMENT_CONTENT).map_err(storage)?;
            write_txn.open_table(LINKS_BY_PARENT).map_err(storage)?;
            write_txn.open_table(LINKS_BY_CHILD).map_err(storage)?;
            write_txn.open_table(TAG_INDEX).map_err(storage)?;
            write_txn.open_table(TEXT_LINK_INDEX).map_err(storage)?;
            write_txn.open_table(ATTACHMENTS_BY_NODE).map_err(storage)?;
            write_txn.open_table(SEARCH_PENDING).map_err(storage)?;

            let mut meta = write_txn.open_table(METADATA).map_err(storage)?;
            let existing = meta
                .get("schema_version")
                .map_err(storage)?
                .map(|v| v.value());
            match existing {
                None => {
                    meta.insert("schema_version", SCHEMA_VERSION)
                        .map_err(storage)?;
                }
                Some(v) if v == SCHEMA_VERSION => {}
                Some(v) => {
                    return Err(MemebraneError::Storage(format!(
                        "unsupported schema version {} (expected {})",
                        v, SCHEMA_VERSION
                    )));
                }
            }
        }
        write_txn.commit().map_err(storage)?;

        let (search, fresh) = SearchIndex::open(&search_dir(path), languages)?;
        let store = Self {
            db,
            search,
            stamp: AtomicU64::new(1),
        };
        if fresh {
            store.mark_all_nodes()?;
        }
        store.sync_search()?;
        Ok(store)
    }

    /// Queue every cached node for indexing.
    fn mark_all_nodes(&self) -> Result<(), MemebraneError> {
        let txn = self.db.begin_write().map_err(storage)?;
        let mut marked = 0u64;
        {
            let nodes = txn.open_table(NODES).map_err(storage)?;
            let mut pending = txn.open_table(SEARCH_PENDING).map_err(storage)?;
            for entry in nodes.iter().map_err(storage)? {
                let (key, _) = entry.map_err(storage)?;
                pending.insert(key.value(), 0).map_err(storage)?;
                marked += 1;
            }
        }
        txn.commit().map_err(storage)?;
        if marked > 0 {
            info!(nodes = marked, "rebuilding search index");
        }
        Ok(())
    }

    /// Bring the search index up to date with every pending mark.
    ///
    /// The writer lock is held from reading the marks to clearing them, so
    /// two drains never interleave. Writers never wait on it before their
    /// own commit.
    fn sync_search(&self) -> Result<(), MemebraneError> {
        let mut writer = self.search.writer()?;
        let (marks, updates) = self.read(|t| {
            let marks = t.search_marks()?;
            let mut updates = Vec::with_capacity(marks.len());
            for ((brain, node), _) in &marks {
                updates.push(t.search_update(BrainId::from_key(*brain), NodeId::from_key(*node))?);
            }
            Ok((marks, updates))
        })?;
        if marks.is_empty() {
            return Ok(());
        }
        self.search.apply(&mut writer, &updates)?;

        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut pending = txn.open_table(SEARCH_PENDING).map_err(storage)?;
            for (key, stamp) in &marks {
                let current = pending.get(*key).map_err(storage)?.map(|v| v.value());
                if current == Some(*stamp) {
                    pending.remove(*key).map_err(storage)?;
                }
            }
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }

    /// Candidate hits from the search index, best first.
    pub(crate) fn search_index(
        &self,
        query: &IndexQuery<'_>,
    ) -> Result<Vec<(NodeId, u64)>, MemebraneError> {
        self.search.search(query)
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), MemebraneError> {
        self.db.compact().map_err(storage)?;
        Ok(())
    }

    /// Run `f` against one read snapshot.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&ReadTables) -> Result<T, MemebraneError>,
    ) -> Result<T, MemebraneError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let tables = ReadTables::open(&txn)?;
        f(&tables)
    }

    /// Run `f` inside one write transaction, committing only if it succeeds.
    ///
    /// After a commit the search index is brought up to date. An index
    /// failure does not undo the commit; the marks stay for the next drain.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteTables<'_>) -> Result<T, MemebraneError>,
    ) -> Result<T, MemebraneError> {
        let stamp = self.stamp.fetch_add(1, Ordering::Relaxed);
        let txn = self.db.begin_write().map_err(storage)?;
        let result = {
            let mut tables = WriteTables::open(&txn, stamp)?;
            f(&mut tables)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(storage)?;
                if let Err(e) = self.sync_search() {
                    warn!(error = %e, "search index update deferred");
                }
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(storage)?;
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Brains
    // -------------------------------------------------------------------------

    /// Insert or replace a brain.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when the slug already belongs to another brain.
    pub fn put_brain(&self, brain: &Brain) -> Result<(), MemebraneError> {
        let bytes = encode(brain)?;
        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut brains = txn.open_table(BRAINS).map_err(storage)?;
            let mut slugs = txn.open_table(BRAIN_SLUGS).map_err(storage)?;

            if let Some(slug) = brain.slug.as_deref() {
                let owner = slugs.get(slug).map_err(storage)?.map(|v| v.value());
                if let Some(owner) = owner
                    && owner != brain.id.key()
                {
                    return Err(MemebraneError::InvalidRequest(format!(
                        "slug '{}' already belongs to brain {}",
                        slug,
                        BrainId::from_key(owner)
                    )));
                }
            }

            let previous: Option<Brain> = match brains.get(brain.id.key()).map_err(storage)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            if let Some(old_slug) = previous.and_then(|b| b.slug)
                && brain.slug.as_deref() != Some(old_slug.as_str())
            {
                slugs.remove(old_slug.as_str()).map_err(storage)?;
            }
            if let Some(slug) = brain.slug.as_deref() {
                slugs.insert(slug, brain.id.key()).map_err(storage)?;
            }
            brains
                .insert(brain.id.key(), bytes.as_slice())
                .map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }

    pub fn get_brain(&self, id: BrainId) -> Result<Option<Brain>, MemebraneError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let brains = txn.open_table(BRAINS).map_err(storage)?;
        match brains.get(id.key()).map_err(storage)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_brain_by_slug(&self, slug: &str) -> Result<Option<Brain>, MemebraneError> {
        let owner = {
            let txn = self.db.begin_read().map_err(storage)?;
            let slugs = txn.open_table(BRAIN_SLUGS).map_err(storage)?;
            slugs.get(slug).map_err(storage)?.map(|v| v.value())
        };
        match owner {
            Some(key) => self.get_brain(BrainId::from_key(key)),
            None => Ok(None),
        }
    }

    /// All brains in identifier order.
    pub fn list_brains(&self) -> Result<Vec<Brain>, MemebraneError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let brains = txn.open_table(BRAINS).map_err(storage)?;
        let mut out = Vec::new();
        for entry in brains.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Rows
    // -------------------------------------------------------------------------

    pub fn get_node(&self, brain: BrainId, id: NodeId) -> Result<Option<Node>, MemebraneError> {
        self.read(|t| t.node(brain, id))
    }

    /// Batch read. Missing ids are skipped; order follows `ids`.
    pub fn get_nodes(&self, brain: BrainId, ids: &[NodeId]) -> Result<Vec<Node>, MemebraneError> {
        self.read(|t| {
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(node) = t.node(brain, *id)? {
                    out.push(node);
                }
            }
            Ok(out)
        })
    }

    pub fn get_link(&self, brain: BrainId, id: LinkId) -> Result<Option<Link>, MemebraneError> {
        self.read(|t| t.link(brain, id))
    }

    pub fn get_attachment(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<Option<Attachment>, MemebraneError> {
        self.read(|t| t.attachment(brain, id))
    }

    /// Attachment metadata of one node, in identifier order.
    pub fn node_attachments(
        &self,
        brain: BrainId,
        node: NodeId,
    ) -> Result<Vec<Attachment>, MemebraneError> {
        self.read(|t| t.attachments_of(brain, node))
    }

    pub fn attachment_text(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<Option<String>, MemebraneError> {
        self.read(|t| t.attachment_text(brain, id))
    }

    /// The loaded payload of an attachment, if any has been stored.
    pub fn attachment_content(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<Option<AttachmentContent>, MemebraneError> {
        self.read(|t| {
            let Some(attachment) = t.attachment(brain, id)? else {
                return Ok(None);
            };
            if attachment.attachment_type.is_note() {
                return Ok(t.attachment_text(brain, id)?.map(AttachmentContent::Text));
            }
            match t
                .attachment_content
                .get((brain.key(), id.key()))
                .map_err(storage)?
            {
                Some(guard) => Ok(Some(AttachmentContent::Binary(guard.value().to_vec()))),
                None => Ok(None),
            }
        })
    }

    /// Store a lazily fetched attachment payload.
    ///
    /// Note attachments are decoded as UTF-8 text, have remote asset links
    /// rewritten to local form and get an inferred locale; every other type
    /// keeps the raw bytes.
    pub fn store_attachment_content(
        &self,
        brain: BrainId,
        id: AttachmentId,
        bytes: &[u8],
    ) -> Result<AttachmentContent, MemebraneError> {
        self.write(|t| {
            let mut attachment = t.attachment(brain, id)?.ok_or_else(|| {
                MemebraneError::NotFound(format!("attachment {} in brain {}", id, brain))
            })?;
            if attachment.attachment_type.is_note() {
                let text = rewrite_remote_asset_links(&String::from_utf8_lossy(bytes));
                attachment.inferred_locale = Some(infer_locale(&text));
                t.put_attachment(&attachment)?;
                t.put_attachment_text(brain, id, &text)?;
                Ok(AttachmentContent::Text(text))
            } else {
                t.put_attachment_content(brain, id, bytes)?;
                Ok(AttachmentContent::Binary(bytes.to_vec()))
            }
        })
    }

    /// Row counts and schema version.
    pub fn status(&self) -> Result<StoreStatus, MemebraneError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let brains = txn.open_table(BRAINS).map_err(storage)?;
        let nodes = txn.open_table(NODES).map_err(storage)?;
        let links = txn.open_table(LINKS).map_err(storage)?;
        let attachments = txn.open_table(ATTACHMENTS).map_err(storage)?;
        let pending = txn.open_table(SEARCH_PENDING).map_err(storage)?;
        let meta = txn.open_table(METADATA).map_err(storage)?;
        Ok(StoreStatus {
            brains: brains.len().map_err(storage)?,
            nodes: nodes.len().map_err(storage)?,
            links: links.len().map_err(storage)?,
            attachments: attachments.len().map_err(storage)?,
            searchable_nodes: self.search.num_docs(),
            search_pending: pending.len().map_err(storage)?,
            schema_version: meta
                .get("schema_version")
                .map_err(storage)?
                .map(|v| v.value())
                .unwrap_or(0),
        })
    }
}

// =============================================================================
// READ SNAPSHOT
// =============================================================================

/// All entity and index tables opened on one read transaction.
pub(crate) struct ReadTables {
    nodes: ReadOnlyTable<RowKey, &'static [u8]>,
    links: ReadOnlyTable<RowKey, &'static [u8]>,
    attachments: ReadOnlyTable<RowKey, &'static [u8]>,
    attachment_text: ReadOnlyTable<RowKey, &'static str>,
    attachment_content: ReadOnlyTable<RowKey, &'static [u8]>,
    links_by_parent: ReadOnlyTable<IndexKey, ()>,
    links_by_child: ReadOnlyTable<IndexKey, ()>,
    tag_index: ReadOnlyTable<IndexKey, ()>,
    text_link_index: ReadOnlyTable<IndexKey, ()>,
    attachments_by_node: ReadOnlyTable<IndexKey, ()>,
    search_pending: ReadOnlyTable<RowKey, u64>,
}

impl ReadTables {
    fn open(txn: &ReadTransaction) -> Result<Self, MemebraneError> {
        Ok(Self {
            nodes: txn.open_table(NODES).map_err(storage)?,
            links: txn.open_table(LINKS).map_err(storage)?,
            attachments: txn.open_table(ATTACHMENTS).map_err(storage)?,
            attachment_text: txn.open_table(ATTACHMENT_TEXT).map_err(storage)?,
            attachment_content: txn.open_table(ATTACHMENT_CONTENT).map_err(storage)?,
            links_by_parent: txn.open_table(LINKS_BY_PARENT).map_err(storage)?,
            links_by_child: txn.open_table(LINKS_BY_CHILD).map_err(storage)?,
            tag_index: txn.open_table(TAG_INDEX).map_err(storage)?,
            text_link_index: txn.open_table(TEXT_LINK_INDEX).map_err(storage)?,
            attachments_by_node: txn.open_table(ATTACHMENTS_BY_NODE).map_err(storage)?,
            search_pending: txn.open_table(SEARCH_PENDING).map_err(storage)?,
        })
    }

    pub(crate) fn node(&self, brain: BrainId, id: NodeId) -> Result<Option<Node>, MemebraneError> {
        load(&self.nodes, (brain.key(), id.key()))
    }

    fn search_marks(&self) -> Result<Vec<(RowKey, u64)>, MemebraneError> {
        let mut marks = Vec::new();
        for entry in self.search_pending.iter().map_err(storage)? {
            let (key, stamp) = entry.map_err(storage)?;
            marks.push((key.value(), stamp.value()));
        }
        Ok(marks)
    }

    /// The search document `node` should have now.
    fn search_update(&self, brain: BrainId, id: NodeId) -> Result<IndexUpdate, MemebraneError> {
        let Some(node) = self.node(brain, id)?.filter(|n| !n.is_private) else {
            return Ok(IndexUpdate::Remove { brain, node: id });
        };
        let mut notes = Vec::new();
        for attachment in self.attachments_of(brain, id)? {
            if !attachment.attachment_type.is_note() {
                continue;
            }
            if let Some(text) = self.attachment_text(brain, attachment.id)? {
                notes.push(IndexedNote {
                    locale: attachment.inferred_locale,
                    text: plain_text(&text),
                });
            }
        }
        Ok(IndexUpdate::Put {
            brain,
            node: id,
            name: node.name,
            notes,
        })
    }

    pub(crate) fn link(&self, brain: BrainId, id: LinkId) -> Result<Option<Link>, MemebraneError> {
        load(&self.links, (brain.key(), id.key()))
    }

    pub(crate) fn attachment(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<Option<Attachment>, MemebraneError> {
        load(&self.attachments, (brain.key(), id.key()))
    }

    pub(crate) fn attachment_text(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<Option<String>, MemebraneError> {
        Ok(self
            .attachment_text
            .get((brain.key(), id.key()))
            .map_err(storage)?
            .map(|guard| guard.value().to_string()))
    }

    fn links_via(
        &self,
        index: &ReadOnlyTable<IndexKey, ()>,
        brain: BrainId,
        node: NodeId,
    ) -> Result<Vec<Link>, MemebraneError> {
        let mut out = Vec::new();
        for key in scan_index(index, brain.key(), node.key())? {
            if let Some(link) = self.link(brain, LinkId::from_key(key))? {
                out.push(link);
            }
        }
        Ok(out)
    }

    /// Links whose `parent_id` is `node`.
    pub(crate) fn links_from_parent(
        &self,
        brain: BrainId,
        node: NodeId,
    ) -> Result<Vec<Link>, MemebraneError> {
        self.links_via(&self.links_by_parent, brain, node)
    }

    /// Links whose `child_id` is `node`.
    pub(crate) fn links_to_child(
        &self,
        brain: BrainId,
        node: NodeId,
    ) -> Result<Vec<Link>, MemebraneError> {
        self.links_via(&self.links_by_child, brain, node)
    }

    /// Nodes whose `tag_ids` contain `tag`.
    pub(crate) fn tagged_with(
        &self,
        brain: BrainId,
        tag: NodeId,
    ) -> Result<Vec<NodeId>, MemebraneError> {
        Ok(scan_index(&self.tag_index, brain.key(), tag.key())?
            .into_iter()
            .map(NodeId::from_key)
            .collect())
    }

    /// Nodes whose `text_link_ids` contain `target`.
    pub(crate) fn text_linking_to(
        &self,
        brain: BrainId,
        target: NodeId,
    ) -> Result<Vec<NodeId>, MemebraneError> {
        Ok(scan_index(&self.text_link_index, brain.key(), target.key())?
            .into_iter()
            .map(NodeId::from_key)
            .collect())
    }

    pub(crate) fn attachments_of(
        &self,
        brain: BrainId,
        node: NodeId,
    ) -> Result<Vec<Attachment>, MemebraneError> {
        let mut out = Vec::new();
        for key in scan_index(&self.attachments_by_node, brain.key(), node.key())? {
            if let Some(attachment) = self.attachment(brain, AttachmentId::from_key(key))? {
                out.push(attachment);
            }
        }
        Ok(out)
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

/// Entity and index tables opened on one write transaction.
///
/// Every `put_*` keeps the index tables consistent with the row it replaces
/// and marks the affected node for reindexing with this write's stamp.
pub(crate) struct WriteTables<'txn> {
    nodes: Table<'txn, RowKey, &'static [u8]>,
    links: Table<'txn, RowKey, &'static [u8]>,
    attachments: Table<'txn, RowKey, &'static [u8]>,
    attachment_text: Table<'txn, RowKey, &'static str>,
    attachment_content: Table<'txn, RowKey, &'static [u8]>,
    links_by_parent: Table<'txn, IndexKey, ()>,
    links_by_child: Table<'txn, IndexKey, ()>,
    tag_index: Table<'txn, IndexKey, ()>,
    text_link_index: Table<'txn, IndexKey, ()>,
    attachments_by_node: Table<'txn, IndexKey, ()>,
    search_pending: Table<'txn, RowKey, u64>,
    stamp: u64,
}

impl<'txn> WriteTables<'txn> {
    fn open(txn: &'txn WriteTransaction, stamp: u64) -> Result<Self, MemebraneError> {
        Ok(Self {
            nodes: txn.open_table(NODES).map_err(storage)?,
            links: txn.open_table(LINKS).map_err(storage)?,
            attachments: txn.open_table(ATTACHMENTS).map_err(storage)?,
            attachment_text: txn.open_table(ATTACHMENT_TEXT).map_err(storage)?,
            attachment_content: txn.open_table(ATTACHMENT_CONTENT).map_err(storage)?,
            links_by_parent: txn.open_table(LINKS_BY_PARENT).map_err(storage)?,
            links_by_child: txn.open_table(LINKS_BY_CHILD).map_err(storage)?,
            tag_index: txn.open_table(TAG_INDEX).map_err(storage)?,
            text_link_index: txn.open_table(TEXT_LINK_INDEX).map_err(storage)?,
            attachments_by_node: txn.open_table(ATTACHMENTS_BY_NODE).map_err(storage)?,
            search_pending: txn.open_table(SEARCH_PENDING).map_err(storage)?,
            stamp,
        })
    }

    fn mark_for_search(&mut self, brain: u128, node: u128) -> Result<(), MemebraneError> {
        self.search_pending
            .insert((brain, node), self.stamp)
            .map_err(storage)?;
        Ok(())
    }

    pub(crate) fn node(&self, brain: BrainId, id: NodeId) -> Result<Option<Node>, MemebraneError> {
        load(&self.nodes, (brain.key(), id.key()))
    }

    pub(crate) fn link(&self, brain: BrainId, id: LinkId) -> Result<Option<Link>, MemebraneError> {
        load(&self.links, (brain.key(), id.key()))
    }

    pub(crate) fn attachment(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<Option<Attachment>, MemebraneError> {
        load(&self.attachments, (brain.key(), id.key()))
    }

    pub(crate) fn put_node(&mut self, node: &Node) -> Result<(), MemebraneError> {
        let brain = node.brain_id.key();
        let id = node.id.key();
        if let Some(old) = self.node(node.brain_id, node.id)? {
            for tag in &old.tag_ids {
                self.tag_index
                    .remove((brain, tag.key(), id))
                    .map_err(storage)?;
            }
            for target in &old.text_link_ids {
                self.text_link_index
                    .remove((brain, target.key(), id))
                    .map_err(storage)?;
            }
        }
        for tag in &node.tag_ids {
            self.tag_index
                .insert((brain, tag.key(), id), ())
                .map_err(storage)?;
        }
        for target in &node.text_link_ids {
            self.text_link_index
                .insert((brain, target.key(), id), ())
                .map_err(storage)?;
        }
        let bytes = encode(node)?;
        self.nodes
            .insert((brain, id), bytes.as_slice())
            .map_err(storage)?;
        self.mark_for_search(brain, id)
    }

    pub(crate) fn put_link(&mut self, link: &Link) -> Result<(), MemebraneError> {
        let brain = link.brain_id.key();
        let id = link.id.key();
        if let Some(old) = self.link(link.brain_id, link.id)? {
            self.links_by_parent
                .remove((brain, old.parent_id.key(), id))
                .map_err(storage)?;
            self.links_by_child
                .remove((brain, old.child_id.key(), id))
                .map_err(storage)?;
        }
        self.links_by_parent
            .insert((brain, link.parent_id.key(), id), ())
            .map_err(storage)?;
        self.links_by_child
            .insert((brain, link.child_id.key(), id), ())
            .map_err(storage)?;
        let bytes = encode(link)?;
        self.links
            .insert((brain, id), bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    pub(crate) fn put_attachment(&mut self, attachment: &Attachment) -> Result<(), MemebraneError> {
        let brain = attachment.brain_id.key();
        let id = attachment.id.key();
        if let Some(old) = self.attachment(attachment.brain_id, attachment.id)? {
            self.attachments_by_node
                .remove((brain, old.node_id.key(), id))
                .map_err(storage)?;
            if old.attachment_type.is_note() {
                self.mark_for_search(brain, old.node_id.key())?;
            }
        }
        self.attachments_by_node
            .insert((brain, attachment.node_id.key(), id), ())
            .map_err(storage)?;
        let bytes = encode(attachment)?;
        self.attachments
            .insert((brain, id), bytes.as_slice())
            .map_err(storage)?;
        if attachment.attachment_type.is_note() {
            self.mark_for_search(brain, attachment.node_id.key())?;
        }
        Ok(())
    }

    pub(crate) fn has_attachment_text(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<bool, MemebraneError> {
        Ok(self
            .attachment_text
            .get((brain.key(), id.key()))
            .map_err(storage)?
            .is_some())
    }

    pub(crate) fn put_attachment_text(
        &mut self,
        brain: BrainId,
        id: AttachmentId,
        text: &str,
    ) -> Result<(), MemebraneError> {
        self.attachment_text
            .insert((brain.key(), id.key()), text)
            .map_err(storage)?;
        if let Some(owner) = self.attachment(brain, id)?.map(|a| a.node_id) {
            self.mark_for_search(brain.key(), owner.key())?;
        }
        Ok(())
    }

    pub(crate) fn put_attachment_content(
        &mut self,
        brain: BrainId,
        id: AttachmentId,
        bytes: &[u8],
    ) -> Result<(), MemebraneError> {
        self.attachment_content
            .insert((brain.key(), id.key()), bytes)
            .map_err(storage)?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
