//! Layout engines
//!
//! Pure projections from the authoritative structure to 2D positions. The
//! engines never mutate their input and carry no history: layout is a
//! function of the structure alone, so an unchanged structure always lands
//! in exactly the same place.

pub(crate) mod force;
pub(crate) mod radial;

use serde::Serialize;

use crate::structure::StructureState;
use force::ForceLayout;
use radial::RadialLayout;

/// A 2D position in layout space. The origin is the center of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub(crate) const ORIGIN: Point = Point { x: 0.0, y: 0.0 };
}

/// Laid-out structure, ready for a renderer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum LayoutView {
    Radial(RadialLayout),
    Force(ForceLayout),
}

/// Project the current structure with the engine matching its topology.
pub(crate) fn layout(state: &StructureState) -> Option<LayoutView> {
    match state {
        StructureState::Empty => None,
        StructureState::Tree(tree) => Some(LayoutView::Radial(radial::layout_radial(tree))),
        StructureState::Graph(graph) => Some(LayoutView::Force(force::layout_force(graph))),
    }
}
