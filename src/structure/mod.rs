//! Knowledge structure data model
//!
//! The engine maintains exactly one of two structure topologies per session:
//! a rooted topic tree produced by the structuring service, or an
//! entity/relationship graph produced by the remote extraction service.
//! Field casing follows each service's wire format: camelCase for the
//! structuring response, snake_case for the extraction service.

pub(crate) mod merge;
pub(crate) mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category tag for a topic node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum NodeCategory {
    #[default]
    Topic,
    Subtopic,
    Detail,
    Question,
    Decision,
    Action,
    Contradiction,
}

impl NodeCategory {
    /// Category names accepted from the structuring service.
    pub(crate) const NAMES: [&'static str; 7] = [
        "topic",
        "subtopic",
        "detail",
        "question",
        "decision",
        "action",
        "contradiction",
    ];
}

/// Confidence tier assigned to a node by the structuring service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ConfidenceTier {
    High,
    #[default]
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Tier names accepted from the structuring service.
    pub(crate) const NAMES: [&'static str; 3] = ["high", "medium", "low"];
}

/// One node of the topic tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TopicNode {
    /// Stable identifier, reused across updates for nodes that persist
    pub id: String,
    /// Short display phrase
    pub label: String,
    #[serde(default)]
    pub category: NodeCategory,
    /// Speaker attribution like "Speaker 0", when one applies
    #[serde(default)]
    pub speaker: Option<String>,
    /// Seconds into the session where the point was made
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub confidence: ConfidenceTier,
    #[serde(default)]
    pub children: Vec<TopicNode>,
}

impl TopicNode {
    pub(crate) fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        TopicNode {
            id: id.into(),
            label: label.into(),
            category: NodeCategory::default(),
            speaker: None,
            timestamp: None,
            confidence: ConfidenceTier::default(),
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, the node itself included.
    pub(crate) fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TopicNode::subtree_size)
            .sum::<usize>()
    }

    /// Depth-first walk over the subtree.
    pub(crate) fn walk(&self, visit: &mut impl FnMut(&TopicNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Link between two nodes outside the parent/child hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CrossReference {
    pub source_id: String,
    pub target_id: String,
    /// Relation label, e.g. "contradicts", "supports", "related"
    #[serde(default = "default_relation")]
    pub relation: String,
}

fn default_relation() -> String {
    "related".to_string()
}

/// Structuring-service metadata block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TreeMetadata {
    /// Monotonic structure version, stamped by the store on every merge
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub total_speakers: u32,
    #[serde(default)]
    pub duration_seconds: f64,
    /// Stamped by the store on every merge
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Rooted topic tree with cross-references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TreeStructure {
    pub root: TopicNode,
    #[serde(default)]
    pub cross_references: Vec<CrossReference>,
    #[serde(default)]
    pub metadata: TreeMetadata,
}

impl TreeStructure {
    pub(crate) fn new(root: TopicNode) -> Self {
        TreeStructure {
            root,
            cross_references: Vec::new(),
            metadata: TreeMetadata::default(),
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.root.subtree_size()
    }
}

/// One entity in the extraction graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Entity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(rename = "type", default = "default_entity_kind")]
    pub kind: String,
    #[serde(default)]
    pub created_at: String,
    /// Connection count as reported by the extraction service
    #[serde(default)]
    pub degree: u32,
    #[serde(default)]
    pub community: Option<u32>,
}

fn default_entity_kind() -> String {
    "topic".to_string()
}

/// One relationship in the extraction graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    /// Natural-language statement of the relationship
    #[serde(default)]
    pub fact: String,
    #[serde(rename = "type", default = "default_relationship_kind")]
    pub kind: String,
    #[serde(default)]
    pub valid_at: Option<String>,
    #[serde(default)]
    pub invalid_at: Option<String>,
}

fn default_relationship_kind() -> String {
    "related_to".to_string()
}

/// Extraction-service metadata block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub(crate) struct GraphMetadata {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub entity_count: usize,
    #[serde(default)]
    pub relationship_count: usize,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Accumulated entity/relationship graph for a session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub(crate) struct GraphStructure {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

impl GraphStructure {
    pub(crate) fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// The authoritative structure for a session. Exactly one topology is live
/// at any time; a mode switch replaces the other wholesale.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) enum StructureState {
    #[default]
    Empty,
    Tree(TreeStructure),
    Graph(GraphStructure),
}

impl StructureState {
    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, StructureState::Empty)
    }

    pub(crate) fn as_tree(&self) -> Option<&TreeStructure> {
        match self {
            StructureState::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub(crate) fn as_graph(&self) -> Option<&GraphStructure> {
        match self {
            StructureState::Graph(graph) => Some(graph),
            _ => None,
        }
    }
}

/// Which update path a session is committed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StructureMode {
    /// Incremental tree structuring against a reasoning provider
    Tree,
    /// Remote graph extraction service
    Graph,
}

impl fmt::Display for StructureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureMode::Tree => write!(f, "tree"),
            StructureMode::Graph => write!(f, "graph"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtree_size_counts_all_nodes() {
        let mut root = TopicNode::new("root", "Session");
        let mut topic = TopicNode::new("t1", "Topic");
        topic.children.push(TopicNode::new("d1", "Detail"));
        topic.children.push(TopicNode::new("d2", "Detail"));
        root.children.push(topic);
        assert_eq!(root.subtree_size(), 4);
    }

    #[test]
    fn test_walk_visits_depth_first() {
        let mut root = TopicNode::new("root", "Session");
        let mut topic = TopicNode::new("t1", "Topic");
        topic.children.push(TopicNode::new("d1", "Detail"));
        root.children.push(topic);
        root.children.push(TopicNode::new("t2", "Other"));

        let mut seen = Vec::new();
        root.walk(&mut |node| seen.push(node.id.clone()));
        assert_eq!(seen, vec!["root", "t1", "d1", "t2"]);
    }

    #[test]
    fn test_node_deserializes_with_camel_case_and_defaults() {
        let json = r#"{
            "id": "n1",
            "label": "Budget review",
            "category": "decision",
            "speaker": "Speaker 0",
            "timestamp": 12.5,
            "confidence": "high",
            "children": []
        }"#;
        let node: TopicNode = serde_json::from_str(json).expect("Failed to parse node");
        assert_eq!(node.category, NodeCategory::Decision);
        assert_eq!(node.confidence, ConfidenceTier::High);
        assert_eq!(node.speaker.as_deref(), Some("Speaker 0"));

        let minimal: TopicNode =
            serde_json::from_str(r#"{"id": "n2", "label": "x"}"#).expect("Failed to parse node");
        assert_eq!(minimal.category, NodeCategory::Topic);
        assert_eq!(minimal.confidence, ConfidenceTier::Medium);
        assert!(minimal.children.is_empty());
    }

    #[test]
    fn test_cross_reference_uses_camel_case_keys() {
        let json = r#"{"sourceId": "a", "targetId": "b", "relation": "contradicts"}"#;
        let reference: CrossReference =
            serde_json::from_str(json).expect("Failed to parse cross reference");
        assert_eq!(reference.source_id, "a");
        assert_eq!(reference.target_id, "b");
        assert_eq!(reference.relation, "contradicts");
    }

    #[test]
    fn test_entity_accepts_extraction_wire_format() {
        let json = r#"{
            "id": "e-1",
            "name": "Migration plan",
            "summary": "Planned database migration",
            "type": "project",
            "created_at": "2026-02-11T10:00:00Z",
            "degree": 3,
            "community": 1
        }"#;
        let entity: Entity = serde_json::from_str(json).expect("Failed to parse entity");
        assert_eq!(entity.kind, "project");
        assert_eq!(entity.degree, 3);

        let minimal: Entity =
            serde_json::from_str(r#"{"id": "e-2", "name": "x"}"#).expect("Failed to parse entity");
        assert_eq!(minimal.kind, "topic");
        assert_eq!(minimal.community, None);
    }

    #[test]
    fn test_relationship_defaults_kind() {
        let json = r#"{"id": "r-1", "source_id": "a", "target_id": "b", "fact": "a owns b"}"#;
        let relationship: Relationship =
            serde_json::from_str(json).expect("Failed to parse relationship");
        assert_eq!(relationship.kind, "related_to");
        assert!(relationship.valid_at.is_none());
    }

    #[test]
    fn test_structure_state_accessors() {
        let tree = StructureState::Tree(TreeStructure::new(TopicNode::new("root", "Session")));
        assert!(tree.as_tree().is_some());
        assert!(tree.as_graph().is_none());
        assert!(!tree.is_empty());
        assert!(StructureState::Empty.is_empty());
    }
}
