//! # Brain Registry
//!
//! Resolves the brain segment of a URL, which is either a brain UUID or a
//! slug, to a stored `Brain`.
//!
//! Lookup order: TTL cache, then the store, then the configured brains.
//! A UUID that is found nowhere becomes an anonymous brain. An unknown
//! slug resolves to nothing. Every write clears the cache.

use memebrane_core::{Brain, BrainId, EntityStore, MemebraneError};
use moka::sync::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::BrainConfig;

const REGISTRY_CAPACITY: u64 = 1024;

#[derive(Clone)]
pub struct BrainRegistry {
    store: Arc<EntityStore>,
    configured: Arc<BTreeMap<String, BrainConfig>>,
    cache: Cache<String, Brain>,
}

impl BrainRegistry {
    pub fn new(
        store: Arc<EntityStore>,
        configured: BTreeMap<String, BrainConfig>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            configured: Arc::new(configured),
            cache: Cache::builder()
                .max_capacity(REGISTRY_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Resolve on the blocking pool.
    pub async fn resolve(&self, segment: &str) -> Result<Option<Brain>, MemebraneError> {
        let registry = self.clone();
        let segment = segment.to_string();
        tokio::task::spawn_blocking(move || registry.resolve_blocking(&segment))
            .await
            .map_err(|e| MemebraneError::Storage(format!("blocking task failed: {}", e)))?
    }

    /// Resolve a UUID or slug.
    pub fn resolve_blocking(&self, segment: &str) -> Result<Option<Brain>, MemebraneError> {
        if let Some(brain) = self.cache.get(segment) {
            return Ok(Some(brain));
        }

        let found = match Uuid::parse_str(segment) {
            Ok(uuid) => Some(self.by_id(BrainId(uuid))?),
            Err(_) => self.by_slug(segment)?,
        };
        if let Some(brain) = &found {
            self.cache.insert(segment.to_string(), brain.clone());
        }
        Ok(found)
    }

    fn by_id(&self, id: BrainId) -> Result<Brain, MemebraneError> {
        if let Some(brain) = self.store.get_brain(id)? {
            return Ok(brain);
        }
        let brain = self
            .configured
            .iter()
            .find(|(_, c)| c.id == id)
            .map(|(slug, c)| c.to_brain(slug))
            .unwrap_or_else(|| Brain::anonymous(id));
        tracing::info!(brain = %id, slug = ?brain.slug, "registering brain");
        self.put(&brain)?;
        Ok(brain)
    }

    fn by_slug(&self, slug: &str) -> Result<Option<Brain>, MemebraneError> {
        if let Some(brain) = self.store.get_brain_by_slug(slug)? {
            return Ok(Some(brain));
        }
        match self.configured.get(slug) {
            Some(c) => {
                let brain = c.to_brain(slug);
                tracing::info!(brain = %brain.id, slug = %slug, "registering configured brain");
                self.put(&brain)?;
                Ok(Some(brain))
            }
            None => Ok(None),
        }
    }

    /// Store a brain and drop every cached entry.
    pub fn put(&self, brain: &Brain) -> Result<(), MemebraneError> {
        self.store.put_brain(brain)?;
        self.cache.invalidate_all();
        Ok(())
    }

    /// Write every configured brain to the store. Returns how many were written.
    pub fn seed_from_config(&self) -> Result<usize, MemebraneError> {
        for (slug, c) in self.configured.iter() {
            self.store.put_brain(&c.to_brain(slug))?;
        }
        self.cache.invalidate_all();
        Ok(self.configured.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
