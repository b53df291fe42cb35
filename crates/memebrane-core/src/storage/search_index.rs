//! # Search Index
//!
//! A tantivy index kept beside the redb file, one document per searchable
//! node. Private nodes have no document.
//!
//! ## Fields
//!
//! Every indexed language `L` gets a `name_L` and a `notes_L` text field
//! analyzed with that language's `TextConfig`. `notes_L` only receives notes
//! whose inferred locale is `L`. The `simple` configuration is always
//! present; its notes field receives every note, and `note_locale` records
//! which locales a node's notes carry.
//!
//! ## Consistency
//!
//! The index trails the store. Writes mark nodes in the `search_pending`
//! table inside the redb transaction, and `EntityStore` drains the marks
//! into the index after the commit. A crash in between leaves the marks in
//! place for the next open.

use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing, TextOptions, Value,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Score, TantivyDocument, Term};
use tracing::info;

use crate::locale::{SIMPLE_CONFIG, TextConfig};
use crate::primitives::{MAX_QUERY_TERMS, NOTES_BOOST, RANK_SCALE, SEARCH_WRITER_HEAP};
use crate::types::{BrainId, MemebraneError, NodeId};

const KEY: &str = "key";
const BRAIN: &str = "brain";
const NODE: &str = "node";
const NOTE_LOCALE: &str = "note_locale";

fn index_err(e: impl Display) -> MemebraneError {
    MemebraneError::Storage(format!("search index: {}", e))
}

fn tokenizer_name(code: &str) -> String {
    format!("memebrane_{}", code)
}

fn doc_key(brain: BrainId, node: NodeId) -> String {
    format!("{}:{}", brain, node)
}

/// Convert a BM25 score to integer millionths.
#[allow(clippy::float_arithmetic)]
fn to_rank(score: Score) -> u64 {
    (score * RANK_SCALE as Score) as u64
}

/// Text of one note attachment, markup already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexedNote {
    pub locale: Option<String>,
    pub text: String,
}

/// What the index should hold for one node after a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IndexUpdate {
    Remove {
        brain: BrainId,
        node: NodeId,
    },
    Put {
        brain: BrainId,
        node: NodeId,
        name: String,
        notes: Vec<IndexedNote>,
    },
}

/// One query against the index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexQuery<'a> {
    pub brain: BrainId,
    pub terms: &'a str,
    pub language: Option<&'a str>,
    pub include_notes: bool,
    pub start: usize,
    pub limit: usize,
}

/// The name and notes fields of one text configuration.
#[derive(Debug, Clone, Copy)]
struct LanguageFields {
    code: &'static str,
    name: Field,
    notes: Field,
}

pub(crate) struct SearchIndex {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    key: Field,
    brain: Field,
    node: Field,
    note_locale: Field,
    simple: LanguageFields,
    stemmed: Vec<LanguageFields>,
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let codes: Vec<&str> = self.stemmed.iter().map(|l| l.code).collect();
        f.debug_struct("SearchIndex")
            .field("languages", &codes)
            .finish_non_exhaustive()
    }
}

impl SearchIndex {
    /// Open or create the index in `dir` for `languages`.
    ///
    /// Returns the index and whether it was created empty, in which case
    /// every cached node must be indexed again.
    pub(crate) fn open(dir: &Path, languages: &[&str]) -> Result<(Self, bool), MemebraneError> {
        let mut codes = vec![SIMPLE_CONFIG];
        for language in languages {
            let code = TextConfig::for_language(Some(*language)).name();
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        let expected = build_schema(&codes);

        std::fs::create_dir_all(dir).map_err(index_err)?;
        let existing = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)
                .ok()
                .filter(|index| has_fields(&index.schema(), &codes))
        } else {
            None
        };
        let (index, fresh) = match existing {
            Some(index) => (index, false),
            None => {
                // Unreadable or built for other languages: rebuild from the store.
                std::fs::remove_dir_all(dir).map_err(index_err)?;
                std::fs::create_dir_all(dir).map_err(index_err)?;
                info!(dir = %dir.display(), languages = ?codes, "creating search index");
                (Index::create_in_dir(dir, expected).map_err(index_err)?, true)
            }
        };

        for code in &codes {
            index.tokenizers().register(
                &tokenizer_name(code),
                TextConfig::for_language(Some(*code)).analyzer(),
            );
        }

        let schema = index.schema();
        let field = |name: &str| schema.get_field(name).map_err(index_err);
        let language_fields = |code: &'static str| -> Result<LanguageFields, MemebraneError> {
            Ok(LanguageFields {
                code,
                name: field(&format!("name_{}", code))?,
                notes: field(&format!("notes_{}", code))?,
            })
        };
        let simple = language_fields(SIMPLE_CONFIG)?;
        let stemmed = codes
            .iter()
            .filter(|code| **code != SIMPLE_CONFIG)
            .map(|code| language_fields(*code))
            .collect::<Result<Vec<_>, _>>()?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_err)?;
        let writer = index
            .writer_with_num_threads(1, SEARCH_WRITER_HEAP)
            .map_err(index_err)?;

        Ok((
            Self {
                reader,
                writer: Mutex::new(writer),
                key: field(KEY)?,
                brain: field(BRAIN)?,
                node: field(NODE)?,
                note_locale: field(NOTE_LOCALE)?,
                simple,
                stemmed,
            },
            fresh,
        ))
    }

    /// Exclusive access to the writer for one drain.
    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, IndexWriter>, MemebraneError> {
        self.writer
            .lock()
            .map_err(|_| MemebraneError::Storage("search index writer poisoned".to_string()))
    }

    /// Apply `updates`, commit, and make them visible to searches.
    pub(crate) fn apply(
        &self,
        writer: &mut IndexWriter,
        updates: &[IndexUpdate],
    ) -> Result<(), MemebraneError> {
        for update in updates {
            match update {
                IndexUpdate::Remove { brain, node } => {
                    writer.delete_term(Term::from_field_text(self.key, &doc_key(*brain, *node)));
                }
                IndexUpdate::Put {
                    brain,
                    node,
                    name,
                    notes,
                } => {
                    let key = doc_key(*brain, *node);
                    writer.delete_term(Term::from_field_text(self.key, &key));
                    writer
                        .add_document(self.document(&key, *brain, *node, name, notes))
                        .map_err(index_err)?;
                }
            }
        }
        writer.commit().map_err(index_err)?;
        self.reader.reload().map_err(index_err)?;
        Ok(())
    }

    fn document(
        &self,
        key: &str,
        brain: BrainId,
        node: NodeId,
        name: &str,
        notes: &[IndexedNote],
    ) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.key, key);
        doc.add_text(self.brain, brain.to_string());
        doc.add_text(self.node, node.to_string());
        for fields in std::iter::once(&self.simple).chain(&self.stemmed) {
            doc.add_text(fields.name, name);
        }
        for note in notes {
            doc.add_text(self.simple.notes, &note.text);
            if let Some(locale) = &note.locale {
                doc.add_text(self.note_locale, locale);
                if let Some(fields) = self.stemmed.iter().find(|l| l.code == locale.as_str()) {
                    doc.add_text(fields.notes, &note.text);
                }
            }
        }
        doc
    }

    /// Number of indexed nodes across all brains.
    pub(crate) fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// One page of `(node, rank)` pairs, best first.
    ///
    /// A query language without its own fields is matched against the
    /// `simple` fields; its notes are restricted to nodes carrying a note
    /// in that locale.
    pub(crate) fn search(&self, q: &IndexQuery<'_>) -> Result<Vec<(NodeId, u64)>, MemebraneError> {
        let indexed = q
            .language
            .and_then(|code| self.stemmed.iter().find(|l| l.code == code));
        let fields = indexed.unwrap_or(&self.simple);

        let mut lexemes = TextConfig::for_language(Some(fields.code)).lexemes(q.terms);
        lexemes.sort();
        lexemes.dedup();
        lexemes.truncate(MAX_QUERY_TERMS);
        if lexemes.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        if q.start as u64 >= searcher.num_docs() {
            return Ok(Vec::new());
        }

        let mut signals: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Should, all_terms(fields.name, &lexemes))];
        if q.include_notes {
            let mut notes = all_terms(fields.notes, &lexemes);
            if let (None, Some(locale)) = (indexed, q.language) {
                let in_locale = filter(self.note_locale, locale);
                notes = Box::new(BooleanQuery::new(vec![
                    (Occur::Must, notes),
                    (Occur::Must, in_locale),
                ]));
            }
            let boosted: Box<dyn Query> = Box::new(BoostQuery::new(notes, NOTES_BOOST));
            signals.push((Occur::Should, boosted));
        }
        let in_brain = filter(self.brain, &q.brain.to_string());
        let any_signal: Box<dyn Query> = Box::new(BooleanQuery::new(signals));
        let query = BooleanQuery::new(vec![(Occur::Must, in_brain), (Occur::Must, any_signal)]);

        let top = searcher
            .search(&query, &TopDocs::with_limit(q.limit.max(1)).and_offset(q.start))
            .map_err(index_err)?;
        let mut out = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_err)?;
            let id = doc
                .get_first(self.node)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| index_err("document without node id"))?;
            out.push((NodeId(id), to_rank(score)));
        }
        Ok(out)
    }
}

fn build_schema(codes: &[&'static str]) -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(KEY, STRING | STORED);
    builder.add_text_field(BRAIN, STRING);
    builder.add_text_field(NODE, STRING | STORED);
    builder.add_text_field(NOTE_LOCALE, STRING);
    for code in codes {
        let options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(&tokenizer_name(code))
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        builder.add_text_field(&format!("name_{}", code), options.clone());
        builder.add_text_field(&format!("notes_{}", code), options);
    }
    builder.build()
}

fn has_fields(schema: &Schema, codes: &[&str]) -> bool {
    codes.iter().all(|code| {
        schema.get_field(&format!("name_{}", code)).is_ok()
            && schema.get_field(&format!("notes_{}", code)).is_ok()
    })
}

/// Every lexeme must occur in `field`.
fn all_terms(field: Field, lexemes: &[String]) -> Box<dyn Query> {
    let clauses = lexemes
        .iter()
        .map(|lexeme| {
            let query: Box<dyn Query> = Box::new(TermQuery::new(
                Term::from_field_text(field, lexeme),
                IndexRecordOption::WithFreqs,
            ));
            (Occur::Must, query)
        })
        .collect();
    Box::new(BooleanQuery::new(clauses))
}

/// Exact match on a raw field, contributing nothing to the score.
fn filter(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(ConstScoreQuery::new(
        Box::new(TermQuery::new(
            Term::from_field_text(field, value),
            IndexRecordOption::Basic,
        )),
        0.0,
    ))
}

// =============================================================================
// TESTS
// =============================================================================
