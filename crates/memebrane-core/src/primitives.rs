//! # Primitives
//!
//! Fixed constants shared by the cache, the codec and the search ranker.
//!
//! These values are compiled into the binary. Anything an operator may
//! want to change lives in the application configuration instead.

/// Locale stored when language detection yields nothing usable.
///
/// ISO 639-2 "no linguistic content". Search treats it as a regular code
/// so that language-filtered queries behave deterministically.
pub const NO_LINGUISTIC_CONTENT: &str = "zxx";

/// Storage schema version written into the metadata table.
///
/// Increment this when making breaking changes to the row encoding.
pub const SCHEMA_VERSION: u64 = 2;

// =============================================================================
// LINK DIRECTION BITS
// =============================================================================

/// The link has an arrow.
pub const DIRECTION_DIRECTED: u8 = 1;

/// The arrow points from child to parent.
pub const DIRECTION_REVERSED: u8 = 2;

/// The link can only be followed in one direction.
pub const DIRECTION_ONE_WAY: u8 = 4;

// =============================================================================
// CODEC
// =============================================================================

/// Length of a base64-encoded 16-byte identifier without padding.
pub const ENCODED_ID_LEN: usize = 22;

/// Local prefix for note assets rewritten away from the remote service.
pub const LOCAL_ASSET_PREFIX: &str = ".data/md-images/";

// =============================================================================
// SEARCH LIMITS
// =============================================================================

/// Scale of integer ranks: a hit's BM25 score is reported in millionths.
pub const RANK_SCALE: u64 = 1_000_000;

/// Boost applied to the note-text clause; the name clause has boost 1.
pub const NOTES_BOOST: f32 = 2.0;

/// Stemmed languages indexed when the caller names none.
pub const DEFAULT_INDEX_LANGUAGES: &[&str] = &["en"];

/// Memory budget of the search index writer.
pub const SEARCH_WRITER_HEAP: usize = 15_000_000;

/// Hard cap on search page size.
pub const MAX_SEARCH_LIMIT: usize = 200;

/// Default search page size.
pub const DEFAULT_SEARCH_LIMIT: usize = 25;

/// Maximum number of query terms considered by the ranker.
pub const MAX_QUERY_TERMS: usize = 32;
