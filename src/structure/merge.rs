//! Merge and diff engine
//!
//! The structuring service always returns a complete tree, so a merge is a
//! wholesale replacement. What this module adds on top is the diff (which
//! node ids are new or relabeled, for rendering emphasis) and the repair
//! pass that fills structural gaps in raw responses before they are typed.

use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::{ConfidenceTier, GraphStructure, NodeCategory, TopicNode, TreeStructure};

/// Ids of nodes that are new or relabeled between two trees.
///
/// A node that merely moved to a different parent keeps its id and label and
/// is not reported; reparenting is routine during regenerations and
/// highlighting it would flash half the map.
pub(crate) fn changed_tree_ids(
    previous: Option<&TreeStructure>,
    next: &TreeStructure,
) -> BTreeSet<String> {
    let mut before = BTreeMap::new();
    if let Some(tree) = previous {
        collect_labels(&tree.root, &mut before);
    }

    let mut after = BTreeMap::new();
    collect_labels(&next.root, &mut after);

    let mut changed = BTreeSet::new();
    for (id, label) in &after {
        match before.get(id) {
            Some(previous_label) if previous_label == label => {}
            _ => {
                changed.insert(id.clone());
            }
        }
    }
    changed
}

fn collect_labels(node: &TopicNode, into: &mut BTreeMap<String, String>) {
    into.insert(node.id.clone(), node.label.clone());
    for child in &node.children {
        collect_labels(child, into);
    }
}

/// Ids of entities not present in the previous graph.
///
/// The extraction service accumulates entities and never relabels them in
/// place, so presence is the whole diff.
pub(crate) fn changed_graph_ids(
    previous: Option<&GraphStructure>,
    next: &GraphStructure,
) -> BTreeSet<String> {
    let known: BTreeSet<&str> = previous
        .map(|graph| graph.entities.iter().map(|e| e.id.as_str()).collect())
        .unwrap_or_default();

    next.entities
        .iter()
        .filter(|entity| !known.contains(entity.id.as_str()))
        .map(|entity| entity.id.clone())
        .collect()
}

/// Fallback id for nodes the structuring service returned without one.
fn generated_node_id() -> String {
    format!("node-{:08x}", rand::thread_rng().gen::<u32>())
}

/// Recursively fill in whatever a raw node object is missing so it can be
/// deserialized: generated id, placeholder label, defaulted category and
/// confidence, normalized speaker and timestamp, an empty children array.
/// Non-object children are dropped.
pub(crate) fn repair_node(raw: &mut Value) {
    let Some(obj) = raw.as_object_mut() else {
        return;
    };

    let id_ok = obj
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !id_ok {
        obj.insert("id".to_string(), Value::String(generated_node_id()));
    }

    let label_ok = obj
        .get("label")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !label_ok {
        obj.insert("label".to_string(), Value::String("Untitled".to_string()));
    }

    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    match category {
        Some(name) if NodeCategory::NAMES.contains(&name.as_str()) => {
            obj.insert("category".to_string(), Value::String(name));
        }
        _ => {
            obj.insert("category".to_string(), Value::String("topic".to_string()));
        }
    }

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    match confidence {
        Some(name) if ConfidenceTier::NAMES.contains(&name.as_str()) => {
            obj.insert("confidence".to_string(), Value::String(name));
        }
        _ => {
            obj.insert(
                "confidence".to_string(),
                Value::String("medium".to_string()),
            );
        }
    }

    let speaker_fix = match obj.get("speaker") {
        None | Some(Value::Null) | Some(Value::String(_)) => None,
        Some(Value::Number(index)) => Some(Value::String(format!("Speaker {index}"))),
        Some(_) => Some(Value::Null),
    };
    if let Some(value) = speaker_fix {
        obj.insert("speaker".to_string(), value);
    }

    let timestamp_ok = matches!(
        obj.get("timestamp"),
        None | Some(Value::Null) | Some(Value::Number(_))
    );
    if !timestamp_ok {
        obj.insert("timestamp".to_string(), Value::Null);
    }

    if !obj.get("children").is_some_and(Value::is_array) {
        obj.insert("children".to_string(), Value::Array(Vec::new()));
    }
    if let Some(children) = obj.get_mut("children").and_then(Value::as_array_mut) {
        children.retain(Value::is_object);
        for child in children {
            repair_node(child);
        }
    }
}

/// Keep only cross references with both endpoints present; default the
/// relation label. Tolerates `source`/`target` as key spellings.
pub(crate) fn repair_cross_references(raw: Option<&Value>) -> Value {
    let mut repaired = Vec::new();
    if let Some(Value::Array(entries)) = raw {
        for entry in entries {
            let Some(obj) = entry.as_object() else {
                continue;
            };
            let source = obj
                .get("sourceId")
                .or_else(|| obj.get("source"))
                .and_then(Value::as_str);
            let target = obj
                .get("targetId")
                .or_else(|| obj.get("target"))
                .and_then(Value::as_str);
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            let relation = obj
                .get("relation")
                .and_then(Value::as_str)
                .filter(|r| !r.trim().is_empty())
                .unwrap_or("related");
            repaired.push(json!({
                "sourceId": source,
                "targetId": target,
                "relation": relation,
            }));
        }
    }
    Value::Array(repaired)
}

/// Keep the numeric metadata fields the service may report. Version and
/// lastUpdated are stamped by the store on merge and never trusted from the
/// service.
pub(crate) fn repair_metadata(raw: Option<&Value>) -> Value {
    let mut metadata = Map::new();
    if let Some(Value::Object(obj)) = raw {
        for key in ["totalSpeakers", "durationSeconds"] {
            if let Some(value) = obj.get(key) {
                if value.is_number() {
                    metadata.insert(key.to_string(), value.clone());
                }
            }
        }
    }
    Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(root: TopicNode) -> TreeStructure {
        TreeStructure::new(root)
    }

    fn node(id: &str, label: &str, children: Vec<TopicNode>) -> TopicNode {
        let mut node = TopicNode::new(id, label);
        node.children = children;
        node
    }

    #[test]
    fn test_identical_trees_have_no_changes() {
        let a = tree(node("root", "Session", vec![node("t1", "Topic", vec![])]));
        let b = a.clone();
        assert!(changed_tree_ids(Some(&a), &b).is_empty());
    }

    #[test]
    fn test_first_merge_reports_every_id() {
        let next = tree(node("root", "Session", vec![node("t1", "Topic", vec![])]));
        let changed = changed_tree_ids(None, &next);
        assert_eq!(changed.len(), 2);
        assert!(changed.contains("root"));
        assert!(changed.contains("t1"));
    }

    #[test]
    fn test_relabeled_node_is_reported() {
        let before = tree(node("root", "Session", vec![node("t1", "Budget", vec![])]));
        let after = tree(node(
            "root",
            "Session",
            vec![node("t1", "Budget overrun", vec![])],
        ));
        let changed = changed_tree_ids(Some(&before), &after);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("t1"));
    }

    #[test]
    fn test_reparented_node_is_not_reported() {
        let before = tree(node(
            "root",
            "Session",
            vec![node("t1", "Topic", vec![node("d1", "Detail", vec![])])],
        ));
        let after = tree(node(
            "root",
            "Session",
            vec![node("t1", "Topic", vec![]), node("d1", "Detail", vec![])],
        ));
        assert!(changed_tree_ids(Some(&before), &after).is_empty());
    }

    #[test]
    fn test_graph_diff_reports_new_entities_only() {
        let before: GraphStructure = serde_json::from_str(
            r#"{"entities": [{"id": "e-1", "name": "Plan"}], "relationships": []}"#,
        )
        .expect("Failed to parse graph");
        let after: GraphStructure = serde_json::from_str(
            r#"{"entities": [
                {"id": "e-1", "name": "Plan"},
                {"id": "e-2", "name": "Deadline"}
            ], "relationships": []}"#,
        )
        .expect("Failed to parse graph");

        let changed = changed_graph_ids(Some(&before), &after);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains("e-2"));
        assert_eq!(changed_graph_ids(None, &after).len(), 2);
    }

    #[test]
    fn test_repair_fills_missing_fields() {
        let mut raw = json!({"label": "Budget"});
        repair_node(&mut raw);

        let node: TopicNode = serde_json::from_value(raw).expect("Failed to parse repaired node");
        assert!(node.id.starts_with("node-"));
        assert_eq!(node.label, "Budget");
        assert_eq!(node.category, NodeCategory::Topic);
        assert_eq!(node.confidence, ConfidenceTier::Medium);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_repair_normalizes_category_case() {
        let mut raw = json!({"id": "n1", "label": "x", "category": "Decision"});
        repair_node(&mut raw);
        let node: TopicNode = serde_json::from_value(raw).expect("Failed to parse repaired node");
        assert_eq!(node.category, NodeCategory::Decision);
    }

    #[test]
    fn test_repair_defaults_unknown_category() {
        let mut raw = json!({"id": "n1", "label": "x", "category": "banana"});
        repair_node(&mut raw);
        let node: TopicNode = serde_json::from_value(raw).expect("Failed to parse repaired node");
        assert_eq!(node.category, NodeCategory::Topic);
    }

    #[test]
    fn test_repair_converts_numeric_speaker() {
        let mut raw = json!({"id": "n1", "label": "x", "speaker": 2});
        repair_node(&mut raw);
        let node: TopicNode = serde_json::from_value(raw).expect("Failed to parse repaired node");
        assert_eq!(node.speaker.as_deref(), Some("Speaker 2"));
    }

    #[test]
    fn test_repair_recurses_and_drops_non_object_children() {
        let mut raw = json!({
            "id": "root",
            "label": "Session",
            "children": [
                {"label": "missing id"},
                "stray string",
                {"id": "n2", "label": "ok", "children": [{"label": "deep"}]}
            ]
        });
        repair_node(&mut raw);

        let node: TopicNode = serde_json::from_value(raw).expect("Failed to parse repaired node");
        assert_eq!(node.children.len(), 2);
        assert!(node.children[0].id.starts_with("node-"));
        assert_eq!(node.children[1].children.len(), 1);
    }

    #[test]
    fn test_repair_cross_references_drops_incomplete_entries() {
        let raw = json!([
            {"sourceId": "a", "targetId": "b"},
            {"sourceId": "a"},
            {"source": "b", "target": "c", "relation": "contradicts"},
            "junk"
        ]);
        let repaired = repair_cross_references(Some(&raw));
        let entries = repaired.as_array().expect("Expected array");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["relation"], "related");
        assert_eq!(entries[1]["relation"], "contradicts");
        assert_eq!(entries[1]["sourceId"], "b");
    }

    #[test]
    fn test_repair_metadata_keeps_numbers_drops_stamps() {
        let raw = json!({
            "version": 99,
            "totalSpeakers": 2,
            "durationSeconds": "not a number",
            "lastUpdated": "2026-01-01T00:00:00Z"
        });
        let repaired = repair_metadata(Some(&raw));
        let obj = repaired.as_object().expect("Expected object");
        assert_eq!(obj.get("totalSpeakers"), Some(&json!(2)));
        assert!(!obj.contains_key("durationSeconds"));
        assert!(!obj.contains_key("version"));
        assert!(!obj.contains_key("lastUpdated"));
    }
}
