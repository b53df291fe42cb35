//! # Fetch Controller
//!
//! Read-through access to the cache. Decides, per request, whether the
//! remote service must be asked before answering, merges what comes back,
//! and falls back to cached state when the remote fails.
//!
//! Store work is synchronous and runs on tokio's blocking pool.

use chrono::Utc;
use memebrane_core::{
    AttachmentContent, AttachmentId, BrainId, EntityStore, MemebraneError, MergeEngine, Node,
    NodeId, StalenessPolicy,
};
use serde_json::Value;
use std::sync::Arc;

use crate::remote::RemoteGraph;

/// Outcome of `resolve_node`.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub node: Node,
    /// The freshly fetched payload. `None` means the answer came from cache
    /// and transitive data must be derived from local queries.
    pub payload: Option<Value>,
}

#[derive(Clone)]
pub struct FetchController {
    store: Arc<EntityStore>,
    remote: Arc<dyn RemoteGraph>,
    policy: StalenessPolicy,
}

impl FetchController {
    pub fn new(
        store: Arc<EntityStore>,
        remote: Arc<dyn RemoteGraph>,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            store,
            remote,
            policy,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Run synchronous store work on the blocking pool.
    pub async fn with_store<T, F>(&self, f: F) -> Result<T, MemebraneError>
    where
        F: FnOnce(&EntityStore) -> Result<T, MemebraneError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| MemebraneError::Storage(format!("blocking task failed: {}", e)))?
    }

    /// Return the node, fetching and merging its subgraph first when the
    /// cached copy is missing, stale, or `force` is set.
    ///
    /// A remote failure falls back to the cache; an empty cache then yields
    /// `NotFound`. `MalformedPayload` from the merge is returned as is.
    pub async fn resolve_node(
        &self,
        brain: BrainId,
        id: NodeId,
        force: bool,
    ) -> Result<Resolved, MemebraneError> {
        let cached = self.with_store(move |s| s.get_node(brain, id)).await?;
        let now = Utc::now();

        if !self.policy.needs_fetch(cached.as_ref(), force, now) {
            tracing::debug!(brain = %brain, node = %id, "serving from cache");
            return cached
                .map(|node| Resolved {
                    node,
                    payload: None,
                })
                .ok_or_else(|| not_found(brain, id));
        }

        let value = match self.remote.fetch_graph(brain, id).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    brain = %brain,
                    node = %id,
                    reason = %e,
                    "remote fetch failed, serving cached state"
                );
                return cached
                    .map(|node| Resolved {
                        node,
                        payload: None,
                    })
                    .ok_or_else(|| not_found(brain, id));
            }
        };

        let (node, value) = self
            .with_store(move |s| {
                let report = MergeEngine::merge_value(s, brain, &value, force, now)?;
                tracing::info!(
                    brain = %brain,
                    node = %id,
                    nodes_inserted = report.nodes_inserted,
                    nodes_updated = report.nodes_updated,
                    links_inserted = report.links_inserted,
                    "merged remote subgraph"
                );
                Ok((s.get_node(brain, id)?, value))
            })
            .await?;

        node.map(|node| Resolved {
            node,
            payload: Some(value),
        })
        .ok_or_else(|| not_found(brain, id))
    }

    /// Content of one attachment, fetched from the remote on first access.
    ///
    /// The attachment's metadata must already be cached. A remote failure
    /// with nothing stored yields `NotFound`.
    pub async fn attachment_content(
        &self,
        brain: BrainId,
        id: AttachmentId,
    ) -> Result<AttachmentContent, MemebraneError> {
        let (known, stored) = self
            .with_store(move |s| {
                Ok((
                    s.get_attachment(brain, id)?.is_some(),
                    s.attachment_content(brain, id)?,
                ))
            })
            .await?;
        if !known {
            return Err(MemebraneError::NotFound(format!(
                "attachment {} in brain {}",
                id, brain
            )));
        }
        if let Some(content) = stored {
            return Ok(content);
        }

        match self.remote.fetch_attachment(brain, id).await {
            Ok(bytes) => {
                self.with_store(move |s| s.store_attachment_content(brain, id, &bytes))
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    brain = %brain,
                    attachment = %id,
                    reason = %e,
                    "attachment fetch failed"
                );
                Err(MemebraneError::NotFound(format!(
                    "content of attachment {} in brain {}",
                    id, brain
                )))
            }
        }
    }
}

fn not_found(brain: BrainId, id: NodeId) -> MemebraneError {
    MemebraneError::NotFound(format!("node {} in brain {}", id, brain))
}
