//! # Configuration
//!
//! `memebrane.toml` loading. Every field has a default, so a missing file
//! yields a working configuration.
//!
//! ```toml
//! database = "memebrane.redb"
//! api_base = "https://api.thebrain.com/api-v11"
//! staleness_hours = 24
//! text_index_langs = ["en", "fr"]
//!
//! [brains.jerry]
//! id = "3d80058c-14d8-5361-0b61-a061f89baf87"
//! name = "Jerry's Brain"
//! thought = "32f9fc36-6963-9ee0-9b44-a89112919e29"
//! ```
//!
//! ## Environment Overrides
//!
//! - `MEMEBRANE_ADMIN_KEY`: replaces `admin_key` when set and non-empty

use memebrane_core::{
    Brain, BrainId, MemebraneError, NodeId, StalenessPolicy, is_supported_language,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "memebrane.toml";

/// Environment variable that overrides `admin_key`.
pub const ADMIN_KEY_ENV: &str = "MEMEBRANE_ADMIN_KEY";

// =============================================================================
// CONFIG
// =============================================================================

/// A brain declared in the configuration file, keyed by its slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrainConfig {
    pub id: BrainId,
    #[serde(default)]
    pub name: Option<String>,
    /// Entry-point node of the brain.
    #[serde(default)]
    pub thought: Option<NodeId>,
}

impl BrainConfig {
    #[must_use]
    pub fn to_brain(&self, slug: &str) -> Brain {
        Brain {
            id: self.id,
            name: self.name.clone(),
            slug: Some(slug.to_string()),
            base_node_id: self.thought,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub api_base: String,
    pub request_timeout_secs: u64,
    /// 0 means always stale; negative means never refetch once focus-cached.
    pub staleness_hours: i64,
    /// Outbound requests per second; 0 disables the throttle.
    pub remote_rate_limit: u32,
    pub registry_ttl_secs: u64,
    /// Languages with stemmed search fields (ISO 639-1). Other languages
    /// fall back to unstemmed matching.
    pub text_index_langs: Vec<String>,
    pub admin_key: Option<String>,
    pub brains: BTreeMap<String, BrainConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("memebrane.redb"),
            api_base: "https://api.thebrain.com/api-v11".to_string(),
            request_timeout_secs: 10,
            staleness_hours: 24,
            remote_rate_limit: 5,
            registry_ttl_secs: 300,
            text_index_langs: vec!["en".to_string()],
            admin_key: None,
            brains: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, MemebraneError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| {
                MemebraneError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&text)?
        } else {
            tracing::info!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        };

        if let Some(key) = std::env::var(ADMIN_KEY_ENV).ok().filter(|k| !k.is_empty()) {
            config.admin_key = Some(key);
        }
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, MemebraneError> {
        let config: Self =
            toml::from_str(text).map_err(|e| MemebraneError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MemebraneError> {
        if self.api_base.trim().is_empty() {
            return Err(MemebraneError::Config("api_base is empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(MemebraneError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        for lang in &self.text_index_langs {
            if !is_supported_language(lang) {
                return Err(MemebraneError::Config(format!(
                    "unsupported text index language '{}'",
                    lang
                )));
            }
        }
        for slug in self.brains.keys() {
            // A slug shaped like a UUID could never be reached by slug lookup.
            if slug.is_empty() || Uuid::parse_str(slug).is_ok() {
                return Err(MemebraneError::Config(format!(
                    "invalid brain slug '{}'",
                    slug
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn staleness(&self) -> StalenessPolicy {
        StalenessPolicy::from_hours(self.staleness_hours)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    /// Languages that get stemmed search fields.
    pub fn index_languages(&self) -> impl Iterator<Item = &str> + '_ {
        self.text_index_langs.iter().map(String::as_str)
    }

    /// Configured brains as store rows.
    pub fn configured_brains(&self) -> impl Iterator<Item = Brain> + '_ {
        self.brains
            .iter()
            .map(|(slug, brain)| brain.to_brain(slug))
    }
}

// =============================================================================
// TESTS
// =============================================================================
