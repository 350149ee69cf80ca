//! Structuring response parsing and validation
//!
//! Reasoning services wrap JSON in prose and code fences often enough that
//! the parser assumes nothing about the envelope: it tries the raw text,
//! then fenced blocks, then the outermost braces; finds the root node under
//! several tolerated shapes; repairs structural gaps; and only then
//! deserializes into the typed tree. Anything still unusable after that is a
//! parse failure for the caller to retry once in simplified form.

use serde_json::{json, Map, Value};

use crate::error::UpdateError;
use crate::structure::merge;
use crate::structure::TreeStructure;

/// Keys under which responses have been observed to nest the root node.
const ROOT_KEYS: [&str; 8] = [
    "root",
    "tree",
    "structure",
    "mindMap",
    "mindmap",
    "knowledgeMap",
    "node",
    "data",
];

/// Parse a raw structuring response into a validated tree.
pub(crate) fn parse_structure_response(raw: &str) -> Result<TreeStructure, UpdateError> {
    let value = lenient_json(raw)?;
    let (mut root, envelope) = locate_root(value).ok_or_else(|| {
        UpdateError::StructureParse("no node-shaped object in response".to_string())
    })?;

    merge::repair_node(&mut root);
    let cross_references = merge::repair_cross_references(envelope.get("crossReferences"));
    let metadata = merge::repair_metadata(envelope.get("metadata"));

    let document = json!({
        "root": root,
        "crossReferences": cross_references,
        "metadata": metadata,
    });
    serde_json::from_value(document)
        .map_err(|e| UpdateError::StructureParse(format!("response failed validation: {e}")))
}

/// Extract a JSON value from text that may wrap it in fences or prose.
fn lenient_json(raw: &str) -> Result<Value, UpdateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UpdateError::StructureParse("empty response".to_string()));
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some(inner) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(inner) {
            return Ok(value);
        }
    }
    let slice = outermost_object(trimmed)
        .ok_or_else(|| UpdateError::StructureParse("no JSON object in response".to_string()))?;
    serde_json::from_str(slice)
        .map_err(|e| UpdateError::StructureParse(format!("invalid JSON in response: {e}")))
}

/// Contents of the first fenced code block, language tag stripped.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// The slice between the first `{` and the last `}`.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Find the root node inside a parsed response.
///
/// Accepts the node directly at the top level, under one of the known
/// wrapper keys, or - as a last resort - under any key whose value is
/// node-shaped. Returns the node plus the envelope object that carries
/// sibling fields like crossReferences.
fn locate_root(value: Value) -> Option<(Value, Map<String, Value>)> {
    let Value::Object(map) = value else {
        return None;
    };

    if looks_like_node(&map) {
        return Some((Value::Object(map.clone()), map));
    }

    for key in ROOT_KEYS {
        if let Some(candidate) = map.get(key) {
            if candidate.as_object().is_some_and(looks_like_node) {
                return Some((candidate.clone(), map));
            }
        }
    }

    for candidate in map.values() {
        if candidate.as_object().is_some_and(looks_like_node) {
            return Some((candidate.clone(), map));
        }
    }

    None
}

/// A node is recognized by a string label, or by an id plus children array.
fn looks_like_node(obj: &Map<String, Value>) -> bool {
    let has_label = obj.get("label").is_some_and(Value::is_string);
    let has_id_and_children = obj.get("id").is_some_and(Value::is_string)
        && obj.get("children").is_some_and(Value::is_array);
    has_label || has_id_and_children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{NodeCategory, TopicNode, TreeStructure};

    #[test]
    fn test_parses_clean_response() {
        let raw = r#"{
            "root": {"id": "root", "label": "Standup", "children": []},
            "crossReferences": [],
            "metadata": {"totalSpeakers": 2, "durationSeconds": 300}
        }"#;
        let tree = parse_structure_response(raw).expect("Failed to parse response");
        assert_eq!(tree.root.label, "Standup");
        assert_eq!(tree.metadata.total_speakers, 2);
    }

    #[test]
    fn test_parses_fenced_response_with_commentary() {
        let raw = r#"Here is the updated map you asked for:

```json
{"root": {"id": "root", "label": "Standup", "children": []}}
```

Let me know if you need changes."#;
        let tree = parse_structure_response(raw).expect("Failed to parse fenced response");
        assert_eq!(tree.root.id, "root");
    }

    #[test]
    fn test_parses_bare_object_embedded_in_prose() {
        let raw = r#"Sure! {"root": {"id": "root", "label": "Standup", "children": []}} Done."#;
        let tree = parse_structure_response(raw).expect("Failed to parse embedded object");
        assert_eq!(tree.root.label, "Standup");
    }

    #[test]
    fn test_accepts_node_at_top_level() {
        let raw = r#"{"id": "root", "label": "Standup", "children": [{"id": "t1", "label": "Blockers", "children": []}]}"#;
        let tree = parse_structure_response(raw).expect("Failed to parse top-level node");
        assert_eq!(tree.root.children.len(), 1);
    }

    #[test]
    fn test_accepts_known_wrapper_keys() {
        for key in ["tree", "mindMap", "structure"] {
            let raw = format!(r#"{{"{key}": {{"id": "root", "label": "Standup", "children": []}}}}"#);
            let tree = parse_structure_response(&raw).expect("Failed to parse wrapped node");
            assert_eq!(tree.root.id, "root");
        }
    }

    #[test]
    fn test_scans_unknown_wrapper_key_as_fallback() {
        let raw = r#"{"conversationOutline": {"id": "root", "label": "Standup", "children": []}}"#;
        let tree = parse_structure_response(raw).expect("Failed to scan for node");
        assert_eq!(tree.root.label, "Standup");
    }

    #[test]
    fn test_repairs_incomplete_nodes_during_parse() {
        let raw = r#"{"root": {"label": "Standup", "category": "Topic", "children": [{"label": "Blockers"}]}}"#;
        let tree = parse_structure_response(raw).expect("Failed to parse repairable response");
        assert!(tree.root.id.starts_with("node-"));
        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].category, NodeCategory::Topic);
    }

    #[test]
    fn test_keeps_cross_references_from_envelope() {
        let raw = r#"{
            "root": {"id": "root", "label": "Standup", "children": [
                {"id": "a", "label": "Ship Friday", "children": []},
                {"id": "b", "label": "Queue regression blocks release", "children": []}
            ]},
            "crossReferences": [{"sourceId": "b", "targetId": "a", "relation": "contradicts"}]
        }"#;
        let tree = parse_structure_response(raw).expect("Failed to parse response");
        assert_eq!(tree.cross_references.len(), 1);
        assert_eq!(tree.cross_references[0].relation, "contradicts");
    }

    #[test]
    fn test_rejects_response_without_json() {
        let error = parse_structure_response("I could not produce a map this time, sorry.")
            .expect_err("Expected parse failure");
        assert!(error.is_parse());
    }

    #[test]
    fn test_rejects_json_without_node_shape() {
        let error = parse_structure_response(r#"{"answer": 42, "status": "ok"}"#)
            .expect_err("Expected parse failure");
        assert!(error.is_parse());
    }

    #[test]
    fn test_two_speaker_disagreement_yields_three_new_ids() {
        let mut previous_root = TopicNode::new("root", "Planning");
        previous_root
            .children
            .push(TopicNode::new("t-scope", "Scope"));
        let previous = TreeStructure::new(previous_root);

        let raw = r#"{
            "root": {"id": "root", "label": "Planning", "children": [
                {"id": "t-scope", "label": "Scope", "children": []},
                {"id": "t-release", "label": "Release timing", "category": "topic", "children": [
                    {"id": "d-friday", "label": "Ship Friday", "speaker": "Speaker 0", "children": []},
                    {"id": "d-queue", "label": "Queue regression blocks release", "speaker": "Speaker 1", "children": []}
                ]}
            ]},
            "crossReferences": [{"sourceId": "d-queue", "targetId": "d-friday", "relation": "contradicts"}]
        }"#;
        let tree = parse_structure_response(raw).expect("Failed to parse response");

        let changed = merge::changed_tree_ids(Some(&previous), &tree);
        assert_eq!(changed.len(), 3);
        assert!(changed.contains("t-release"));
        assert!(changed.contains("d-friday"));
        assert!(changed.contains("d-queue"));
        assert_eq!(tree.cross_references[0].relation, "contradicts");
    }
}
