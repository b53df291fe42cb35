//! Shared fixtures: an in-process `RemoteGraph` and payload builders.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use memebrane::remote::RemoteGraph;
use memebrane_core::{AttachmentId, BrainId, EntityStore, MemebraneError, NodeId};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

pub const STAMP: &str = "2024-05-01T12:00:00Z";

/// Serves canned graphs and attachments; counts calls; can be switched off.
#[derive(Default)]
pub struct FakeRemote {
    graphs: Mutex<HashMap<NodeId, Value>>,
    attachments: Mutex<HashMap<AttachmentId, Vec<u8>>>,
    failing: AtomicBool,
    pub graph_calls: AtomicUsize,
    pub attachment_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve_graph(&self, node: NodeId, graph: Value) {
        self.graphs.lock().unwrap().insert(node, graph);
    }

    pub fn serve_attachment(&self, id: AttachmentId, bytes: &[u8]) {
        self.attachments.lock().unwrap().insert(id, bytes.to_vec());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn graph_calls(&self) -> usize {
        self.graph_calls.load(Ordering::SeqCst)
    }

    pub fn attachment_calls(&self) -> usize {
        self.attachment_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteGraph for FakeRemote {
    async fn fetch_graph(&self, _brain: BrainId, node: NodeId) -> Result<Value, MemebraneError> {
        self.graph_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemebraneError::RemoteUnavailable("switched off".to_string()));
        }
        self.graphs
            .lock()
            .unwrap()
            .get(&node)
            .cloned()
            .ok_or_else(|| MemebraneError::RemoteUnavailable("404".to_string()))
    }

    async fn fetch_attachment(
        &self,
        _brain: BrainId,
        attachment: AttachmentId,
    ) -> Result<Vec<u8>, MemebraneError> {
        self.attachment_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemebraneError::RemoteUnavailable("switched off".to_string()));
        }
        self.attachments
            .lock()
            .unwrap()
            .get(&attachment)
            .cloned()
            .ok_or_else(|| MemebraneError::RemoteUnavailable("404".to_string()))
    }
}

pub fn temp_store() -> (TempDir, Arc<EntityStore>) {
    let dir = tempdir().unwrap();
    let store = Arc::new(EntityStore::open(dir.path().join("app.redb")).unwrap());
    (dir, store)
}

pub fn new_id<T: From<Uuid>>() -> T {
    T::from(Uuid::new_v4())
}

pub fn thought(brain: BrainId, id: NodeId, name: &str) -> Value {
    json!({
        "Id": id.to_string(), "BrainId": brain.to_string(), "Name": name,
        "ModificationDateTime": STAMP
    })
}

/// A root with one child, one private child, a binary attachment and a
/// notes attachment on the root.
pub struct Fixture {
    pub brain: BrainId,
    pub root: NodeId,
    pub child: NodeId,
    pub secret: NodeId,
    pub file: AttachmentId,
    pub notes: AttachmentId,
}

impl Fixture {
    pub fn new(brain: BrainId) -> Self {
        Self {
            brain,
            root: new_id(),
            child: new_id(),
            secret: new_id(),
            file: new_id(),
            notes: new_id(),
        }
    }

    fn child_link(&self, child: NodeId) -> Value {
        json!({
            "Id": Uuid::new_v4().to_string(), "BrainId": self.brain.to_string(),
            "ThoughtIdA": self.root.to_string(), "ThoughtIdB": child.to_string(),
            "Relation": 1, "ModificationDateTime": STAMP
        })
    }

    fn attachment(&self, id: AttachmentId, location: &str, kind: u8) -> Value {
        json!({
            "Id": id.to_string(), "BrainId": self.brain.to_string(),
            "SourceId": self.root.to_string(), "Location": location,
            "Type": kind, "ModificationDateTime": STAMP
        })
    }

    pub fn graph(&self, notes: &str) -> Value {
        let mut secret = thought(self.brain, self.secret, "Secret");
        secret["ACType"] = json!(1);
        json!({
            "Root": {"Id": self.root.to_string()},
            "Thoughts": [
                thought(self.brain, self.root, "Root"),
                thought(self.brain, self.child, "Child"),
                secret,
            ],
            "Links": [self.child_link(self.child), self.child_link(self.secret)],
            "Attachments": [
                self.attachment(self.file, "paper.pdf", 1),
                self.attachment(self.notes, "Notes/notes.html", 4),
            ],
            "NotesHtml": notes,
        })
    }
}
