//! Integration tests for the fetch controller over an in-process remote.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{FakeRemote, Fixture, new_id, temp_store};
use memebrane::fetch::FetchController;
use memebrane_core::{AttachmentContent, BrainId, MemebraneError, StalenessPolicy};
use serde_json::json;
use std::sync::Arc;

fn controller(
    remote: &Arc<FakeRemote>,
    policy: StalenessPolicy,
) -> (tempfile::TempDir, FetchController) {
    let (dir, store) = temp_store();
    let remote: Arc<FakeRemote> = Arc::clone(remote);
    (dir, FetchController::new(store, remote, policy))
}

// =============================================================================
// RESOLVE NODE
// =============================================================================

#[tokio::test]
async fn test_miss_fetches_then_serves_from_cache() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());

    let first = controller.resolve_node(fx.brain, fx.root, false).await.unwrap();
    assert_eq!(first.node.name, "Root");
    assert!(first.node.is_focus_cached);
    assert!(first.payload.is_some());

    let second = controller.resolve_node(fx.brain, fx.root, false).await.unwrap();
    assert!(second.payload.is_none());
    assert_eq!(remote.graph_calls(), 1);
}

#[tokio::test]
async fn test_force_always_fetches() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    let (_dir, controller) = controller(&remote, StalenessPolicy::Never);

    controller.resolve_node(fx.brain, fx.root, false).await.unwrap();
    let forced = controller.resolve_node(fx.brain, fx.root, true).await.unwrap();
    assert!(forced.payload.is_some());
    assert_eq!(remote.graph_calls(), 2);
}

#[tokio::test]
async fn test_zero_window_is_always_stale() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    let (_dir, controller) = controller(&remote, StalenessPolicy::from_hours(0));

    for _ in 0..3 {
        controller.resolve_node(fx.brain, fx.root, false).await.unwrap();
    }
    assert_eq!(remote.graph_calls(), 3);
}

#[tokio::test]
async fn test_neighbour_only_node_is_fetched_as_focus() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    let (_dir, controller) = controller(&remote, StalenessPolicy::Never);
    controller.resolve_node(fx.brain, fx.root, false).await.unwrap();

    // The child is cached, but only as a neighbour; its own graph is unavailable.
    remote.set_failing(true);
    let child = controller.resolve_node(fx.brain, fx.child, false).await.unwrap();
    assert_eq!(remote.graph_calls(), 2);
    assert!(child.payload.is_none());
    assert!(!child.node.is_focus_cached);
}

#[tokio::test]
async fn test_remote_failure_falls_back_to_cache() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());
    controller.resolve_node(fx.brain, fx.root, false).await.unwrap();

    remote.set_failing(true);
    let resolved = controller.resolve_node(fx.brain, fx.root, true).await.unwrap();
    assert_eq!(resolved.node.name, "Root");
    assert!(resolved.payload.is_none());
}

#[tokio::test]
async fn test_remote_failure_with_empty_cache_is_not_found() {
    let remote = FakeRemote::new();
    remote.set_failing(true);
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());

    let err = controller
        .resolve_node(new_id(), new_id(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, MemebraneError::NotFound(_)));
}

#[tokio::test]
async fn test_malformed_payload_propagates_and_writes_nothing() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(
        fx.root,
        json!({"Root": {"Id": fx.root.to_string()}, "Thoughts": [{"Id": fx.root.to_string()}]}),
    );
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());

    let err = controller
        .resolve_node(fx.brain, fx.root, false)
        .await
        .unwrap_err();
    assert!(matches!(err, MemebraneError::MalformedPayload(_)));
    assert!(controller.store().get_node(fx.brain, fx.root).unwrap().is_none());
}

// =============================================================================
// ATTACHMENT CONTENT
// =============================================================================

#[tokio::test]
async fn test_attachment_content_is_fetched_once() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    remote.serve_attachment(fx.file, b"%PDF-1.7");
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());
    controller.resolve_node(fx.brain, fx.root, false).await.unwrap();

    let content = controller.attachment_content(fx.brain, fx.file).await.unwrap();
    assert_eq!(content, AttachmentContent::Binary(b"%PDF-1.7".to_vec()));

    remote.set_failing(true);
    let again = controller.attachment_content(fx.brain, fx.file).await.unwrap();
    assert_eq!(again, content);
    assert_eq!(remote.attachment_calls(), 1);
}

#[tokio::test]
async fn test_unknown_attachment_is_not_found() {
    let remote = FakeRemote::new();
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());
    let err = controller
        .attachment_content(new_id(), new_id())
        .await
        .unwrap_err();
    assert!(matches!(err, MemebraneError::NotFound(_)));
    assert_eq!(remote.attachment_calls(), 0);
}

#[tokio::test]
async fn test_attachment_remote_failure_is_not_found() {
    let remote = FakeRemote::new();
    let fx = Fixture::new(new_id::<BrainId>());
    remote.serve_graph(fx.root, fx.graph(""));
    let (_dir, controller) = controller(&remote, StalenessPolicy::default());
    controller.resolve_node(fx.brain, fx.root, false).await.unwrap();

    remote.set_failing(true);
    let err = controller
        .attachment_content(fx.brain, fx.file)
        .await
        .unwrap_err();
    assert!(matches!(err, MemebraneError::NotFound(_)));
}
