//! # End-to-End Scenarios
//!
//! Whole-pipeline checks through the public API: payload in, neighbours out.

#![allow(clippy::unwrap_used)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use memebrane_core::{
    BrainId, EntityStore, MergeEngine, MergeReport, NeighbourOptions, NodeId, RelationType,
    StalenessPolicy, decode_references, extract_text_link_ids, neighbours,
};
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use uuid::Uuid;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

fn setup() -> (TempDir, EntityStore, BrainId) {
    let dir = tempdir().unwrap();
    let store = EntityStore::open(dir.path().join("scenario.redb")).unwrap();
    (dir, store, BrainId(Uuid::new_v4()))
}

fn thought(brain: BrainId, id: NodeId, name: &str) -> Value {
    json!({
        "Id": id.to_string(), "BrainId": brain.to_string(), "Name": name,
        "ModificationDateTime": "2024-03-01T00:00:00"
    })
}

/// Remote graph of N1 with one child N2, in the remote's PascalCase shape.
fn parent_child(brain: BrainId, n1: NodeId, n2: NodeId) -> Value {
    json!({
        "Root": {"Id": n1.to_string(), "Children": [n2.to_string()]},
        "Thoughts": [thought(brain, n1, "N1"), thought(brain, n2, "N2")],
        "Links": [{
            "Id": Uuid::new_v4().to_string(), "BrainId": brain.to_string(),
            "ThoughtIdA": n1.to_string(), "ThoughtIdB": n2.to_string(),
            "Relation": 1, "ModificationDateTime": "2024-03-01T00:00:00"
        }]
    })
}

#[test]
fn child_link_is_visible_from_both_ends() {
    let (_dir, store, brain) = setup();
    let (n1, n2) = (NodeId(Uuid::new_v4()), NodeId(Uuid::new_v4()));
    let payload = parent_child(brain, n1, n2);

    let first = MergeEngine::merge_value(&store, brain, &payload, false, at(1)).unwrap();
    assert_eq!(first.nodes_inserted, 2);
    assert_eq!(first.links_inserted, 1);

    let parent = store.get_node(brain, n1).unwrap().unwrap();
    let child = store.get_node(brain, n2).unwrap().unwrap();
    assert!(parent.is_focus_cached);
    assert!(!child.is_focus_cached);

    let down = neighbours(&store, &parent, &NeighbourOptions::default()).unwrap();
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].relation, RelationType::Child);
    assert_eq!(down[0].node.name(), "N2");

    let up = neighbours(&store, &child, &NeighbourOptions::default()).unwrap();
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].relation, RelationType::Parent);
    assert_eq!(up[0].node.id(), n1);

    // Rerunning the same payload changes nothing.
    let second = MergeEngine::merge_value(&store, brain, &payload, false, at(1)).unwrap();
    assert_eq!(
        second,
        MergeReport {
            nodes_unchanged: 2,
            links_unchanged: 1,
            ..MergeReport::default()
        }
    );
    assert_eq!(store.get_node(brain, n1).unwrap().unwrap(), parent);
}

#[test]
fn note_reference_becomes_text_link() {
    let (_dir, store, brain) = setup();
    let root = NodeId(Uuid::new_v4());
    let target = decode_references("brain://AbCdEfGhIjKlMnOpQrStUg/notes")[0].node_id;
    let notes = "<p>See <a href=\"brain://AbCdEfGhIjKlMnOpQrStUg/notes\">this</a></p>";
    assert_eq!(extract_text_link_ids(notes, brain), vec![target]);

    let payload = json!({
        "root": {"id": root.to_string()},
        "thoughts": [thought(brain, root, "Root"), thought(brain, target, "Target")],
        "notesHtml": notes,
    });
    MergeEngine::merge_value(&store, brain, &payload, false, at(2)).unwrap();

    let stored = store.get_node(brain, root).unwrap().unwrap();
    assert_eq!(stored.text_link_ids, vec![target]);

    let linked = neighbours(&store, &stored, &NeighbourOptions::default()).unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].relation, RelationType::TextLink);

    let target_node = store.get_node(brain, target).unwrap().unwrap();
    let back = neighbours(&store, &target_node, &NeighbourOptions::default()).unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].relation, RelationType::TextBacklink);
    assert_eq!(back[0].node.id(), root);
}

#[test]
fn staleness_window_boundary() {
    let (_dir, store, brain) = setup();
    let (n1, n2) = (NodeId(Uuid::new_v4()), NodeId(Uuid::new_v4()));
    MergeEngine::merge_value(&store, brain, &parent_child(brain, n1, n2), false, at(0)).unwrap();
    let root = store.get_node(brain, n1).unwrap().unwrap();
    let child = store.get_node(brain, n2).unwrap().unwrap();

    let policy = StalenessPolicy::from_hours(24);
    assert!(!policy.needs_fetch(Some(&root), false, at(0) + TimeDelta::hours(1)));
    assert!(policy.needs_fetch(Some(&root), false, at(0) + TimeDelta::hours(25)));
    assert!(policy.needs_fetch(Some(&root), true, at(1)));
    // Seen only as a neighbour: always fetched when requested as a focus.
    assert!(policy.needs_fetch(Some(&child), false, at(1)));
    assert!(policy.needs_fetch(None, false, at(1)));
}

#[test]
fn private_neighbours_hidden_by_default() {
    let (_dir, store, brain) = setup();
    let (n1, n2) = (NodeId(Uuid::new_v4()), NodeId(Uuid::new_v4()));
    let mut payload = parent_child(brain, n1, n2);
    payload["Thoughts"][1]["ACType"] = json!(1);
    MergeEngine::merge_value(&store, brain, &payload, false, at(3)).unwrap();

    let root = store.get_node(brain, n1).unwrap().unwrap();
    assert!(neighbours(&store, &root, &NeighbourOptions::default()).unwrap().is_empty());

    let options = NeighbourOptions {
        include_private: true,
        ..NeighbourOptions::default()
    };
    assert_eq!(neighbours(&store, &root, &options).unwrap().len(), 1);
}
