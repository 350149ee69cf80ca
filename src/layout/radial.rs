//! Radial tree layout
//!
//! Places the root at the origin and every other node on a ring whose radius
//! grows with depth. Each child receives an angular sector proportional to
//! its subtree size, so large branches get the room they need and siblings
//! never overlap. Ring spacing widens with total node count to keep dense
//! maps legible.

use serde::Serialize;
use std::collections::BTreeMap;
use std::f64::consts::TAU;

use super::Point;
use crate::structure::{TopicNode, TreeStructure};

/// Ring spacing for the smallest maps.
const RING_BASE: f64 = 150.0;

/// Extra spacing per node in the tree.
const RING_PER_NODE: f64 = 2.0;

/// Spacing cap so huge maps stop growing outward.
const RING_MAX: f64 = 420.0;

/// One laid-out tree node
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlacedNode {
    pub position: Point,
    /// Hops from the root. The root itself is depth 0.
    pub depth: u32,
}

/// Radial layout of a topic tree
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RadialLayout {
    pub nodes: BTreeMap<String, PlacedNode>,
    /// Distance between consecutive rings, for renderer guides
    pub ring_spacing: f64,
}

/// Lay out a topic tree around the origin. Deterministic: the same tree
/// always produces the same positions.
pub(crate) fn layout_radial(tree: &TreeStructure) -> RadialLayout {
    let ring_spacing = ring_spacing(tree.node_count());
    let mut nodes = BTreeMap::new();
    nodes.insert(
        tree.root.id.clone(),
        PlacedNode {
            position: Point::ORIGIN,
            depth: 0,
        },
    );
    place_children(&tree.root, 0.0, TAU, 1, ring_spacing, &mut nodes);
    RadialLayout {
        nodes,
        ring_spacing,
    }
}

fn ring_spacing(total_nodes: usize) -> f64 {
    (RING_BASE + RING_PER_NODE * total_nodes as f64).min(RING_MAX)
}

fn place_children(
    parent: &TopicNode,
    sector_start: f64,
    sector_end: f64,
    depth: u32,
    ring_spacing: f64,
    nodes: &mut BTreeMap<String, PlacedNode>,
) {
    let total: usize = parent.children.iter().map(TopicNode::subtree_size).sum();
    if total == 0 {
        return;
    }

    let radius = ring_spacing * f64::from(depth);
    let mut angle = sector_start;
    for child in &parent.children {
        let share = child.subtree_size() as f64 / total as f64;
        let arc = (sector_end - sector_start) * share;
        let mid = angle + arc / 2.0;
        nodes.insert(
            child.id.clone(),
            PlacedNode {
                position: Point {
                    x: radius * mid.cos(),
                    y: radius * mid.sin(),
                },
                depth,
            },
        );
        // A child's own children stay inside its sector
        place_children(child, angle, angle + arc, depth + 1, ring_spacing, nodes);
        angle += arc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_with_children(id: &str, label: &str, children: Vec<TopicNode>) -> TopicNode {
        let mut node = TopicNode::new(id, label);
        node.children = children;
        node
    }

    fn sample_tree() -> TreeStructure {
        // Root with a three-node branch and a single-node branch
        let big = node_with_children(
            "big",
            "Big branch",
            vec![TopicNode::new("b1", "One"), TopicNode::new("b2", "Two")],
        );
        let small = TopicNode::new("small", "Small branch");
        TreeStructure::new(node_with_children("root", "Session", vec![big, small]))
    }

    fn distance(a: Point, b: Point) -> f64 {
        ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
    }

    #[test]
    fn test_root_sits_at_origin() {
        let layout = layout_radial(&sample_tree());
        assert_eq!(layout.nodes["root"].position, Point::ORIGIN);
        assert_eq!(layout.nodes["root"].depth, 0);
    }

    #[test]
    fn test_every_node_is_placed() {
        let tree = sample_tree();
        let layout = layout_radial(&tree);
        assert_eq!(layout.nodes.len(), tree.node_count());
    }

    #[test]
    fn test_layout_is_deterministic() {
        let tree = sample_tree();
        let first = layout_radial(&tree);
        let second = layout_radial(&tree);
        assert_eq!(first.nodes, second.nodes);
    }

    #[test]
    fn test_depth_maps_to_ring_radius() {
        let layout = layout_radial(&sample_tree());
        let origin = Point::ORIGIN;

        let first_ring = distance(layout.nodes["big"].position, origin);
        assert!((first_ring - layout.ring_spacing).abs() < 1e-9);

        let second_ring = distance(layout.nodes["b1"].position, origin);
        assert!((second_ring - 2.0 * layout.ring_spacing).abs() < 1e-9);
        assert_eq!(layout.nodes["b1"].depth, 2);
    }

    #[test]
    fn test_arc_share_is_proportional_to_subtree_size() {
        // "big" holds 3 of the 4 placed nodes, so its sector is the first
        // three quarters of the circle and its center sits at 3/8 of a turn
        let layout = layout_radial(&sample_tree());

        let big = layout.nodes["big"].position;
        let big_angle = big.y.atan2(big.x);
        assert!((big_angle - 0.375 * TAU).abs() < 1e-9);

        // "small" is centered in the remaining quarter: 7/8 of a turn
        let small = layout.nodes["small"].position;
        let small_angle = small.y.atan2(small.x).rem_euclid(TAU);
        assert!((small_angle - 0.875 * TAU).abs() < 1e-9);
    }

    #[test]
    fn test_children_stay_inside_parent_sector() {
        let layout = layout_radial(&sample_tree());
        for id in ["b1", "b2"] {
            let position = layout.nodes[id].position;
            let angle = position.y.atan2(position.x).rem_euclid(TAU);
            assert!(angle < 0.75 * TAU, "{id} escaped its parent sector");
        }
    }

    #[test]
    fn test_ring_spacing_grows_with_node_count_up_to_cap() {
        let small = layout_radial(&sample_tree());

        let many = (0..200)
            .map(|i| TopicNode::new(format!("c{i}"), "Child"))
            .collect();
        let big = layout_radial(&TreeStructure::new(node_with_children(
            "root", "Session", many,
        )));

        assert!(big.ring_spacing > small.ring_spacing);
        assert_eq!(big.ring_spacing, RING_MAX);
    }

    #[test]
    fn test_lone_root_produces_single_position() {
        let layout = layout_radial(&TreeStructure::new(TopicNode::new("root", "Session")));
        assert_eq!(layout.nodes.len(), 1);
    }
}
