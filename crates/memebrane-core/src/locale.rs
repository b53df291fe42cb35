//! # Locale Inference & Text Configurations
//!
//! Two language concerns share this module:
//!
//! - `infer_locale`: best-guess language of note text, stored on attachments.
//!   Detection failure is a normal outcome and yields `NO_LINGUISTIC_CONTENT`.
//! - `TextConfig`: the tokenizer/stemmer pipeline used by the search index
//!   for a given language, with a language-agnostic "simple" fallback.

use regex::Regex;
use std::sync::LazyLock;
use tantivy::tokenizer::{
    AsciiFoldingFilter, Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer,
    TextAnalyzer, TokenStream,
};
use whatlang::Lang;

use crate::primitives::NO_LINGUISTIC_CONTENT;

/// Name of the language-agnostic text configuration.
pub const SIMPLE_CONFIG: &str = "simple";

/// Tokens longer than this are dropped before ranking.
const MAX_TOKEN_LEN: usize = 40;

/// Languages with a stemming configuration, by ISO 639-1 code.
const STEMMED_LANGUAGES: &[(&str, Language)] = &[
    ("ar", Language::Arabic),
    ("da", Language::Danish),
    ("de", Language::German),
    ("el", Language::Greek),
    ("en", Language::English),
    ("es", Language::Spanish),
    ("fi", Language::Finnish),
    ("fr", Language::French),
    ("hu", Language::Hungarian),
    ("it", Language::Italian),
    ("nl", Language::Dutch),
    ("no", Language::Norwegian),
    ("pt", Language::Portuguese),
    ("ro", Language::Romanian),
    ("ru", Language::Russian),
    ("sv", Language::Swedish),
    ("ta", Language::Tamil),
    ("tr", Language::Turkish),
];

static MARKUP_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());

/// Whether `code` names a text configuration (`simple` or a stemmed language).
#[must_use]
pub fn is_supported_language(code: &str) -> bool {
    code == SIMPLE_CONFIG || stemmer_for(code).is_some()
}

fn stemmer_for(code: &str) -> Option<Language> {
    STEMMED_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, lang)| *lang)
}

// =============================================================================
// LOCALE INFERENCE
// =============================================================================

/// Remove HTML tags and the handful of entities notes commonly carry.
#[must_use]
pub fn plain_text(text: &str) -> String {
    let stripped = match MARKUP_RE.as_ref() {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    };
    stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Best-guess language code of `text`.
///
/// Returns an ISO 639-1 code when one exists, the detector's ISO 639-3
/// code otherwise, and `zxx` when nothing could be detected.
#[must_use]
pub fn infer_locale(text: &str) -> String {
    let plain = plain_text(text);
    let plain = plain.trim();
    if plain.is_empty() {
        return NO_LINGUISTIC_CONTENT.to_string();
    }
    match whatlang::detect(plain) {
        Some(info) => iso_639_1(info.lang())
            .unwrap_or_else(|| info.lang().code())
            .to_string(),
        None => NO_LINGUISTIC_CONTENT.to_string(),
    }
}

fn iso_639_1(lang: Lang) -> Option<&'static str> {
    Some(match lang {
        Lang::Afr => "af",
        Lang::Ara => "ar",
        Lang::Bel => "be",
        Lang::Bul => "bg",
        Lang::Cat => "ca",
        Lang::Ces => "cs",
        Lang::Cmn => "zh",
        Lang::Dan => "da",
        Lang::Deu => "de",
        Lang::Ell => "el",
        Lang::Eng => "en",
        Lang::Epo => "eo",
        Lang::Est => "et",
        Lang::Fin => "fi",
        Lang::Fra => "fr",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Hrv => "hr",
        Lang::Hun => "hu",
        Lang::Ind => "id",
        Lang::Ita => "it",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Lat => "la",
        Lang::Lav => "lv",
        Lang::Lit => "lt",
        Lang::Nld => "nl",
        Lang::Nob => "no",
        Lang::Pol => "pl",
        Lang::Por => "pt",
        Lang::Ron => "ro",
        Lang::Rus => "ru",
        Lang::Slk => "sk",
        Lang::Slv => "sl",
        Lang::Spa => "es",
        Lang::Srp => "sr",
        Lang::Swe => "sv",
        Lang::Tam => "ta",
        Lang::Tur => "tr",
        Lang::Ukr => "uk",
        Lang::Vie => "vi",
        _ => return None,
    })
}

// =============================================================================
// TEXT CONFIGURATIONS
// =============================================================================

/// Tokenizer pipeline for one language.
#[derive(Clone)]
pub struct TextConfig {
    name: &'static str,
    analyzer: TextAnalyzer,
}

impl std::fmt::Debug for TextConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextConfig")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TextConfig {
    /// The configuration for `language`, or `simple` when it is absent or unrecognized.
    #[must_use]
    pub fn for_language(language: Option<&str>) -> Self {
        let found = language.and_then(|code| {
            STEMMED_LANGUAGES
                .iter()
                .find(|(c, _)| *c == code)
                .map(|(c, lang)| (*c, *lang))
        });
        let builder = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
            .filter(LowerCaser);
        match found {
            Some((name, lang)) => Self {
                name,
                analyzer: builder.filter(Stemmer::new(lang)).build(),
            },
            None => Self {
                name: SIMPLE_CONFIG,
                analyzer: builder.filter(AsciiFoldingFilter).build(),
            },
        }
    }

    /// Configuration name (`simple` or an ISO 639-1 code).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The analyzer, for registration with the search index.
    pub(crate) fn analyzer(&self) -> TextAnalyzer {
        self.analyzer.clone()
    }

    /// Normalized lexemes of `text`, in order of appearance.
    #[must_use]
    pub fn lexemes(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut out = Vec::new();
        while stream.advance() {
            out.push(stream.token().text.clone());
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_markup_only_text_is_sentinel() {
        assert_eq!(infer_locale(""), NO_LINGUISTIC_CONTENT);
        assert_eq!(infer_locale("<p> </p><br/>"), NO_LINGUISTIC_CONTENT);
    }

    #[test]
    fn detects_english_prose() {
        let text = "<p>The quick brown fox jumps over the lazy dog while the farmer \
                    watches from the porch and wonders about the weather tomorrow.</p>";
        assert_eq!(infer_locale(text), "en");
    }

    #[test]
    fn detects_french_prose() {
        let text = "Le petit chat dort tranquillement sur le canapé pendant que \
                    la pluie tombe doucement sur la ville endormie.";
        assert_eq!(infer_locale(text), "fr");
    }

    #[test]
    fn plain_text_strips_tags_and_entities() {
        assert_eq!(plain_text("<b>a</b>&amp;b").trim(), "a &b");
    }

    #[test]
    fn english_config_stems() {
        let config = TextConfig::for_language(Some("en"));
        assert_eq!(config.name(), "en");
        assert_eq!(config.lexemes("Running Dogs"), vec!["run", "dog"]);
    }

    #[test]
    fn unknown_language_falls_back_to_simple() {
        let config = TextConfig::for_language(Some("xx"));
        assert_eq!(config.name(), SIMPLE_CONFIG);
        assert_eq!(config.lexemes("Café Running"), vec!["cafe", "running"]);
    }

    #[test]
    fn supported_language_table() {
        assert!(is_supported_language("simple"));
        assert!(is_supported_language("en"));
        assert!(!is_supported_language("klingon"));
    }
}
