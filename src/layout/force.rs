//! Force-directed graph layout
//!
//! Runs a fixed number of simulation steps synchronously instead of
//! animating to convergence, so the layout is a pure function of the input
//! graph and the iteration count. Four forces act per step: spring
//! attraction along each link toward a target distance, pairwise repulsion,
//! collision avoidance sized by connection degree, and re-centering of the
//! whole layout on the origin. Initial positions come from a golden-angle
//! spiral, so there is no randomness anywhere.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::Point;
use crate::structure::GraphStructure;

/// Simulation steps for a full layout pass.
pub(crate) const FORCE_ITERATIONS: u32 = 300;

/// Golden angle in radians, for the initial spiral.
const SPIRAL_ANGLE: f64 = 2.399_963;

/// Radial growth of the initial spiral per node.
const SPIRAL_SPACING: f64 = 26.0;

/// Target length of a link at rest.
const LINK_DISTANCE: f64 = 160.0;

/// Spring strength pulling links toward their target length.
const LINK_STRENGTH: f64 = 0.08;

/// Pairwise repulsion scale, applied as `REPULSION / distance^2`.
const REPULSION: f64 = 6000.0;

/// Collision radius for an unconnected entity.
const COLLIDE_BASE: f64 = 28.0;

/// Extra collision radius per link an entity participates in.
const COLLIDE_PER_DEGREE: f64 = 4.0;

/// Per-axis displacement cap for one step, keeping early steps stable.
const MAX_STEP: f64 = 32.0;

/// Floor on pair distances so forces stay finite.
const MIN_DISTANCE: f64 = 1e-6;

/// One renderable link whose endpoints both exist in the entity set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LayoutLink {
    pub source_id: String,
    pub target_id: String,
}

/// Force layout of an entity/relationship graph
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ForceLayout {
    pub positions: BTreeMap<String, Point>,
    pub links: Vec<LayoutLink>,
}

/// Lay out an extraction graph with the standard iteration count.
pub(crate) fn layout_force(graph: &GraphStructure) -> ForceLayout {
    layout_force_with_iterations(graph, FORCE_ITERATIONS)
}

/// Lay out an extraction graph with an explicit iteration count. Zero
/// iterations returns the bare spiral initialization.
pub(crate) fn layout_force_with_iterations(
    graph: &GraphStructure,
    iterations: u32,
) -> ForceLayout {
    let index: HashMap<&str, usize> = graph
        .entities
        .iter()
        .enumerate()
        .map(|(i, entity)| (entity.id.as_str(), i))
        .collect();

    // Relationships pointing at unknown entities are dropped; self-loops are
    // rendered but take no part in the simulation
    let links: Vec<LayoutLink> = graph
        .relationships
        .iter()
        .filter(|r| index.contains_key(r.source_id.as_str()) && index.contains_key(r.target_id.as_str()))
        .map(|r| LayoutLink {
            source_id: r.source_id.clone(),
            target_id: r.target_id.clone(),
        })
        .collect();
    let springs: Vec<(usize, usize)> = links
        .iter()
        .filter(|link| link.source_id != link.target_id)
        .map(|link| (index[link.source_id.as_str()], index[link.target_id.as_str()]))
        .collect();

    let count = graph.entities.len();
    let mut degrees = vec![0u32; count];
    for &(source, target) in &springs {
        degrees[source] += 1;
        degrees[target] += 1;
    }

    let mut positions: Vec<Point> = (0..count).map(spiral_position).collect();
    let radii: Vec<f64> = degrees
        .iter()
        .map(|&degree| COLLIDE_BASE + COLLIDE_PER_DEGREE * f64::from(degree))
        .collect();

    let mut forces = vec![(0.0f64, 0.0f64); count];
    for step in 0..iterations {
        let cooling = 1.0 - f64::from(step) / f64::from(iterations);
        for force in &mut forces {
            *force = (0.0, 0.0);
        }

        for i in 0..count {
            for j in (i + 1)..count {
                let (dx, dy) = separation(&positions, i, j);
                let dist = (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE);
                let (ux, uy) = (dx / dist, dy / dist);

                let push = REPULSION / (dist * dist);
                forces[i].0 -= ux * push;
                forces[i].1 -= uy * push;
                forces[j].0 += ux * push;
                forces[j].1 += uy * push;

                let clearance = radii[i] + radii[j];
                if dist < clearance {
                    let overlap = (clearance - dist) * 0.5;
                    forces[i].0 -= ux * overlap;
                    forces[i].1 -= uy * overlap;
                    forces[j].0 += ux * overlap;
                    forces[j].1 += uy * overlap;
                }
            }
        }

        for &(source, target) in &springs {
            let (dx, dy) = separation(&positions, source, target);
            let dist = (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE);
            let (ux, uy) = (dx / dist, dy / dist);
            // Positive when stretched, negative when compressed
            let pull = (dist - LINK_DISTANCE) * LINK_STRENGTH * 0.5;
            forces[source].0 += ux * pull;
            forces[source].1 += uy * pull;
            forces[target].0 -= ux * pull;
            forces[target].1 -= uy * pull;
        }

        for (position, &(fx, fy)) in positions.iter_mut().zip(&forces) {
            position.x += (fx * cooling).clamp(-MAX_STEP, MAX_STEP);
            position.y += (fy * cooling).clamp(-MAX_STEP, MAX_STEP);
        }
        recenter(&mut positions);
    }

    let positions = graph
        .entities
        .iter()
        .zip(&positions)
        .map(|(entity, position)| (entity.id.clone(), *position))
        .collect();
    ForceLayout { positions, links }
}

fn spiral_position(index: usize) -> Point {
    let radius = SPIRAL_SPACING * (index as f64).sqrt();
    let angle = index as f64 * SPIRAL_ANGLE;
    Point {
        x: radius * angle.cos(),
        y: radius * angle.sin(),
    }
}

/// Vector from node `i` to node `j`. Coincident nodes get a deterministic
/// unit separation so forces have a direction to act along.
fn separation(positions: &[Point], i: usize, j: usize) -> (f64, f64) {
    let dx = positions[j].x - positions[i].x;
    let dy = positions[j].y - positions[i].y;
    if dx.abs() < MIN_DISTANCE && dy.abs() < MIN_DISTANCE {
        let angle = (i * 31 + j * 17) as f64;
        (angle.cos(), angle.sin())
    } else {
        (dx, dy)
    }
}

/// Translate the whole layout so its centroid is the origin.
fn recenter(positions: &mut [Point]) {
    if positions.is_empty() {
        return;
    }
    let n = positions.len() as f64;
    let cx = positions.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = positions.iter().map(|p| p.y).sum::<f64>() / n;
    for position in positions {
        position.x -= cx;
        position.y -= cy;
    }
}
