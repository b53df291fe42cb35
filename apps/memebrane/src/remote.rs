//! # Remote Graph Client
//!
//! HTTP access to the remote brain service.
//!
//! Every failure (connection error, timeout, non-success status,
//! unparseable body, local throttle) is reported as
//! `MemebraneError::RemoteUnavailable`. Callers fall back to the cache;
//! nothing here retries or waits.

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use memebrane_core::{AttachmentId, BrainId, MemebraneError, NodeId};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Outbound throttle shared by all requests of one client.
pub type RemoteRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

// =============================================================================
// TRAIT
// =============================================================================

/// Source of subgraphs and attachment payloads.
#[async_trait]
pub trait RemoteGraph: Send + Sync {
    /// The graph around `node`, as raw JSON.
    async fn fetch_graph(&self, brain: BrainId, node: NodeId) -> Result<Value, MemebraneError>;

    /// The raw bytes of one attachment.
    async fn fetch_attachment(
        &self,
        brain: BrainId,
        attachment: AttachmentId,
    ) -> Result<Vec<u8>, MemebraneError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

/// `RemoteGraph` over reqwest with a bounded timeout and an optional throttle.
#[derive(Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    api_base: String,
    limiter: Option<RemoteRateLimiter>,
}

impl HttpRemote {
    /// `requests_per_second = 0` disables the throttle.
    pub fn new(
        api_base: &str,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self, MemebraneError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("memebrane/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MemebraneError::Config(format!("HTTP client: {}", e)))?;
        let limiter = NonZeroU32::new(requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    fn graph_url(&self, brain: BrainId, node: NodeId) -> String {
        format!("{}/brains/{}/thoughts/{}/graph", self.api_base, brain, node)
    }

    fn attachment_url(&self, brain: BrainId, attachment: AttachmentId) -> String {
        format!(
            "{}/attachments/{}/{}/file-content",
            self.api_base, brain, attachment
        )
    }

    fn throttle(&self) -> Result<(), MemebraneError> {
        match &self.limiter {
            Some(limiter) if limiter.check().is_err() => Err(MemebraneError::RemoteUnavailable(
                "outbound rate limit exceeded".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, MemebraneError> {
        self.throttle()?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MemebraneError::RemoteUnavailable(format!("{}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MemebraneError::RemoteUnavailable(format!(
                "{} returned {}",
                url, status
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteGraph for HttpRemote {
    async fn fetch_graph(&self, brain: BrainId, node: NodeId) -> Result<Value, MemebraneError> {
        let url = self.graph_url(brain, node);
        tracing::debug!(url = %url, "fetching graph");
        self.get(&url)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| MemebraneError::RemoteUnavailable(format!("unparseable body: {}", e)))
    }

    async fn fetch_attachment(
        &self,
        brain: BrainId,
        attachment: AttachmentId,
    ) -> Result<Vec<u8>, MemebraneError> {
        let url = self.attachment_url(brain, attachment);
        tracing::debug!(url = %url, "fetching attachment");
        let bytes = self
            .get(&url)
            .await?
            .bytes()
            .await
            .map_err(|e| MemebraneError::RemoteUnavailable(format!("{}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn urls_follow_remote_layout() {
        let remote =
            HttpRemote::new("https://example.test/api-v11/", Duration::from_secs(1), 0).unwrap();
        let brain = BrainId(Uuid::from_u128(1));
        let node = NodeId(Uuid::from_u128(2));
        assert_eq!(
            remote.graph_url(brain, node),
            format!("https://example.test/api-v11/brains/{}/thoughts/{}/graph", brain, node)
        );
        let attachment = AttachmentId(Uuid::from_u128(3));
        assert!(
            remote
                .attachment_url(brain, attachment)
                .ends_with(&format!("/attachments/{}/{}/file-content", brain, attachment))
        );
    }

    #[test]
    fn throttle_rejects_instead_of_waiting() {
        let remote = HttpRemote::new("https://example.test", Duration::from_secs(1), 1).unwrap();
        assert!(remote.throttle().is_ok());
        assert!(matches!(
            remote.throttle(),
            Err(MemebraneError::RemoteUnavailable(_))
        ));
    }

    #[test]
    fn zero_rate_disables_throttle() {
        let remote = HttpRemote::new("https://example.test", Duration::from_secs(1), 0).unwrap();
        for _ in 0..10 {
            assert!(remote.throttle().is_ok());
        }
    }
}
