//! Integration tests for the memebrane HTTP API.
//!
//! Uses axum-test against the router, with an in-process remote.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{FakeRemote, Fixture, new_id, temp_store};
use memebrane::api::{AppState, HealthResponse, RefreshResponse, StatusResponse, create_router};
use memebrane::config::{BrainConfig, Config};
use memebrane::remote::RemoteGraph;
use memebrane_core::{BrainId, NodeId, encode_reference};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

const ADMIN_KEY: &str = "s3cret";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct Harness {
    server: TestServer,
    remote: Arc<FakeRemote>,
    fx: Fixture,
    _dir: TempDir,
}

/// Brain "jerry" with the fixture graph served for its root.
fn create_test_server() -> Harness {
    let fx = Fixture::new(new_id::<BrainId>());
    let remote = FakeRemote::new();
    let notes = format!(
        "<p>Go to <a href=\"{}\">child</a></p>",
        encode_reference(fx.child, None, "notes")
    );
    remote.serve_graph(fx.root, fx.graph(&notes));
    remote.serve_attachment(fx.file, b"%PDF-1.7");

    let config = Config {
        admin_key: Some(ADMIN_KEY.to_string()),
        text_index_langs: vec!["en".to_string()],
        brains: BTreeMap::from([(
            "jerry".to_string(),
            BrainConfig {
                id: fx.brain,
                name: Some("Jerry's Brain".to_string()),
                thought: Some(fx.root),
            },
        )]),
        ..Config::default()
    };
    let (dir, store) = temp_store();
    let remote_graph: Arc<dyn RemoteGraph> = remote.clone();
    let state = AppState::new(config, store, remote_graph);
    Harness {
        server: TestServer::new(create_router(state)).unwrap(),
        remote,
        fx,
        _dir: dir,
    }
}

fn thought_path(node: NodeId) -> String {
    format!("/brain/jerry/thought/{}", node)
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let h = create_test_server();
    let response = h.server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_counts_cached_rows() {
    let h = create_test_server();
    h.server.get(&thought_path(h.fx.root)).await.assert_status_ok();

    let status: StatusResponse = h.server.get("/status").await.json();
    assert_eq!(status.brains, 1);
    assert_eq!(status.nodes, 3);
    assert_eq!(status.links, 2);
    assert_eq!(status.attachments, 2);
    assert_eq!(status.searchable_nodes, 2);
}

// =============================================================================
// BRAIN / THOUGHT
// =============================================================================

#[tokio::test]
async fn test_brain_redirects_to_entry_point() {
    let h = create_test_server();
    let response = h.server.get("/brain/jerry").await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(
        response.header("location").to_str().unwrap(),
        thought_path(h.fx.root)
    );
}

#[tokio::test]
async fn test_unknown_slug_is_404() {
    let h = create_test_server();
    let response = h.server.get("/brain/nobody").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("nobody"));
}

#[tokio::test]
async fn test_thought_returns_public_neighbours_and_notes() {
    let h = create_test_server();
    let response = h.server.get(&thought_path(h.fx.root)).await;
    response.assert_status_ok();
    let body: Value = response.json();

    assert_eq!(body["node"]["name"], "Root");
    assert_eq!(body["fetched"], true);
    let neighbours = body["neighbours"].as_array().unwrap();
    assert_eq!(neighbours.len(), 2);
    assert_eq!(neighbours[0]["relation"], "child");
    assert_eq!(neighbours[0]["node"]["name"], "Child");
    assert_eq!(neighbours[1]["relation"], "text_link");
    assert!(body["gates"].get(h.fx.secret.to_string()).is_none());
    // The link to the private child is not counted.
    assert_eq!(body["gates"][h.fx.root.to_string()]["children"], 1);

    let notes = body["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 1);
    let text = notes[0]["text"].as_str().unwrap();
    assert!(text.contains(&format!("/brain/jerry/thought/{}", h.fx.child)));
    assert!(!text.contains("brain://"));

    // Second read is served from cache.
    let again: Value = h.server.get(&thought_path(h.fx.root)).await.json();
    assert_eq!(again["fetched"], false);
    assert_eq!(h.remote.graph_calls(), 1);
}

#[tokio::test]
async fn test_private_flag_reveals_private_neighbours() {
    let h = create_test_server();
    let body: Value = h
        .server
        .get(&thought_path(h.fx.root))
        .add_query_param("private", "true")
        .add_query_param("full", "true")
        .await
        .json();
    let names: Vec<&str> = body["neighbours"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["node"]["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Secret"));
    assert_eq!(body["gates"][h.fx.root.to_string()]["children"], 2);
    // The full projection carries whole nodes.
    assert!(body["neighbours"][0]["node"]["raw_data"].is_string());
    let text = body["notes"][0]["text"].as_str().unwrap();
    assert!(text.contains("?full=true&private=true"));
}

#[tokio::test]
async fn test_private_node_hidden_without_flag() {
    let h = create_test_server();
    h.server.get(&thought_path(h.fx.root)).await.assert_status_ok();
    h.remote.set_failing(true);

    h.server
        .get(&thought_path(h.fx.secret))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .get(&thought_path(h.fx.secret))
        .add_query_param("private", "true")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_unreachable_node_is_404() {
    let h = create_test_server();
    let response = h.server.get(&thought_path(new_id())).await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_node_id_is_400() {
    let h = create_test_server();
    let response = h.server.get("/brain/jerry/thought/not-a-uuid").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_brain_by_uuid() {
    let h = create_test_server();
    let response = h
        .server
        .get(&format!("/brain/{}/thought/{}", h.fx.brain, h.fx.root))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["brain"]["slug"], "jerry");
}

// =============================================================================
// REFRESH
// =============================================================================

#[tokio::test]
async fn test_refresh_requires_admin_key() {
    let h = create_test_server();
    let path = format!("{}/refresh", thought_path(h.fx.root));

    h.server.post(&path).await.assert_status(StatusCode::UNAUTHORIZED);
    h.server
        .post(&path)
        .authorization_bearer("wrong")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(h.remote.graph_calls(), 0);
}

#[tokio::test]
async fn test_refresh_forces_fetch() {
    let h = create_test_server();
    h.server.get(&thought_path(h.fx.root)).await.assert_status_ok();

    let path = format!("{}/refresh", thought_path(h.fx.root));
    let response = h.server.post(&path).authorization_bearer(ADMIN_KEY).await;
    response.assert_status_ok();
    let refreshed: RefreshResponse = response.json();
    assert!(refreshed.fetched);
    assert_eq!(refreshed.node.id, h.fx.root);
    assert_eq!(h.remote.graph_calls(), 2);
}

// =============================================================================
// SEARCH
// =============================================================================

#[tokio::test]
async fn test_search_finds_cached_public_nodes() {
    let h = create_test_server();
    h.server.get(&thought_path(h.fx.root)).await.assert_status_ok();

    let body: Value = h
        .server
        .get("/brain/jerry/search")
        .add_query_param("q", "child")
        .add_query_param("lang", "en")
        .await
        .json();
    let hits = body["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["name"], "Child");

    let secret: Value = h
        .server
        .get("/brain/jerry/search")
        .add_query_param("q", "secret")
        .await
        .json();
    assert!(secret["hits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_with_unindexed_language_falls_back() {
    let h = create_test_server();
    h.server.get(&thought_path(h.fx.root)).await.assert_status_ok();

    let response = h
        .server
        .get("/brain/jerry/search")
        .add_query_param("q", "child")
        .add_query_param("lang", "de")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let hits = body["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["name"], "Child");
}

// =============================================================================
// ATTACHMENT
// =============================================================================

#[tokio::test]
async fn test_attachment_binary_and_notes() {
    let h = create_test_server();
    h.server.get(&thought_path(h.fx.root)).await.assert_status_ok();

    let file = h
        .server
        .get(&format!("/brain/jerry/attachment/{}", h.fx.file))
        .await;
    file.assert_status_ok();
    assert_eq!(file.header("content-type"), "application/octet-stream");
    assert_eq!(file.as_bytes().as_ref(), b"%PDF-1.7");

    let notes = h
        .server
        .get(&format!("/brain/jerry/attachment/{}", h.fx.notes))
        .await;
    notes.assert_status_ok();
    assert!(notes.text().contains("brain://"));
    assert_eq!(h.remote.attachment_calls(), 1);
}

#[tokio::test]
async fn test_unknown_attachment_is_404() {
    let h = create_test_server();
    h.server
        .get(&format!("/brain/jerry/attachment/{}", new_id::<BrainId>()))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
