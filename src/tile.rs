//! Tile configuration graph (SPEC_FULL.md §4.C): one [`LayerTile`] per layer,
//! connected by the correspondences between layer pairs, optimized by
//! block-coordinate descent to produce the rigid/affine pre-alignment that
//! seeds the spring meshes.

use std::collections::{HashMap, HashSet};

use derive_more::Display;
use log::warn;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    geom::{Point, PointMatch, Vec2},
    model::{Model, ModelKind},
};

/// Identifies one layer (one Z-slice) in the stack.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize)]
pub struct LayerIndex(pub u32);

/// One graph node: a layer together with its current best-fit transform
/// relative to the stack's shared coordinate frame.
#[derive(Clone, Debug)]
pub struct LayerTile {
    pub layer: LayerIndex,
    pub model: Model,
}

/// One graph edge: the correspondence matches tying two layers together,
/// expressed in each layer's own local coordinates.
#[derive(Clone, Debug)]
pub struct TileConnection {
    pub matches: Vec<PointMatch>,
}

impl TileConnection {
    fn weight(&self) -> f64 {
        self.matches.iter().map(|m| m.weight).sum()
    }
}

/// The undirected tile/connection graph plus the bookkeeping to optimize it.
pub struct TileConfiguration {
    graph: UnGraph<LayerTile, TileConnection>,
    nodes: HashMap<LayerIndex, NodeIndex>,
    fixed: HashSet<LayerIndex>,
}

/// Summary of a completed optimization run, folded into the run report.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct TileOptimizerStats {
    pub iterations: usize,
    pub max_delta: f64,
    pub mean_error: f64,
    pub plateaued: bool,
}

impl TileConfiguration {
    pub fn new() -> Self {
        TileConfiguration { graph: UnGraph::new_undirected(), nodes: HashMap::new(), fixed: HashSet::new() }
    }

    /// Marks `layer`'s tile as non-moving during `optimize` (idempotent).
    pub fn fix_tile(&mut self, layer: LayerIndex, kind: ModelKind) {
        self.ensure_tile(layer, kind);
        self.fixed.insert(layer);
    }

    /// Instantiates a tile for `layer`, seeded with the identity transform of
    /// `kind`, if one doesn't already exist.
    pub fn ensure_tile(&mut self, layer: LayerIndex, kind: ModelKind) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&layer) {
            return idx;
        }
        let idx = self.graph.add_node(LayerTile { layer, model: Model::identity(kind) });
        self.nodes.insert(layer, idx);
        idx
    }

    /// Adds (or merges into) the connection between two layers. `matches` are
    /// in each layer's own local coordinate space, `l1` belonging to `a` and
    /// `l2` belonging to `b`.
    pub fn connect(&mut self, a: LayerIndex, b: LayerIndex, matches: Vec<PointMatch>, kind: ModelKind) {
        let ia = self.ensure_tile(a, kind);
        let ib = self.ensure_tile(b, kind);
        if let Some(edge) = self.graph.find_edge(ia, ib) {
            self.graph[edge].matches.extend(matches);
        } else {
            self.graph.add_edge(ia, ib, TileConnection { matches });
        }
    }

    pub fn tile(&self, layer: LayerIndex) -> Option<&LayerTile> {
        self.nodes.get(&layer).map(|&idx| &self.graph[idx])
    }

    pub fn tiles(&self) -> impl Iterator<Item = &LayerTile> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Block-coordinate-descent optimization: each tile in turn refits its
    /// model against every neighbor's *current* world-projected points,
    /// holding every fixed tile at its seeded model throughout. Stops when
    /// the largest per-tile parameter movement drops under
    /// `max_delta_epsilon`, or mean error plateaus over `max_plateau_width`
    /// iterations, or `max_iterations` is spent. Fails with
    /// *not-enough-data-points* if a non-fixed tile never accumulates 3
    /// usable matches.
    pub fn optimize(
        &mut self,
        kind: ModelKind,
        max_iterations: usize,
        max_delta_epsilon: f64,
        max_plateau_width: usize,
    ) -> Result<TileOptimizerStats, AlignError> {
        const MIN_USABLE_MATCHES: usize = 3;

        let fixed_indices: HashSet<NodeIndex> =
            self.fixed.iter().filter_map(|layer| self.nodes.get(layer).copied()).collect();
        let node_indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut plateau = crate::mesh::PlateauDetector::new(max_plateau_width);

        for &idx in &node_indices {
            if fixed_indices.contains(&idx) {
                continue;
            }
            let usable: usize = self.graph.edges(idx).map(|e| e.weight().matches.len()).sum();
            if usable < MIN_USABLE_MATCHES {
                return Err(AlignError::NotEnoughDataPoints { needed: MIN_USABLE_MATCHES, had: usable });
            }
        }

        let mut stats = TileOptimizerStats::default();
        let mut converged = false;
        for iteration in 0..max_iterations {
            let mut max_delta = 0.0_f64;
            let mut total_error = 0.0_f64;
            let mut movable_tiles = 0usize;

            for &idx in &node_indices {
                if fixed_indices.contains(&idx) {
                    continue;
                }
                movable_tiles += 1;

                let mut local_matches = Vec::new();
                let neighbors: Vec<NodeIndex> = self.graph.neighbors(idx).collect();
                for neighbor_idx in neighbors {
                    let edge = self.graph.find_edge(idx, neighbor_idx).expect("neighbor implies edge");
                    let neighbor_model = self.graph[neighbor_idx].model;
                    // Matches are stored local-to-local with `p1` belonging to
                    // whichever tile was `a` in `connect(a, b, ..)`; reorient
                    // so `mine` always belongs to the tile being refit.
                    let idx_is_first = edge_owns_first(&self.graph, edge, idx);
                    for m in &self.graph[edge].matches {
                        let (mine, theirs) = if idx_is_first { (m.p1, m.p2) } else { (m.p2, m.p1) };
                        let theirs_world = neighbor_model.apply(theirs.l);
                        local_matches.push(PointMatch::new(
                            Point::at_rest(mine.l),
                            Point::new(theirs_world, theirs_world),
                            m.weight,
                        ));
                    }
                }

                if local_matches.len() < kind.min_points() {
                    continue;
                }

                // A singular fit here means this tile's neighbor count clears
                // the 3-match floor checked above but not this model kind's
                // own minimum (e.g. homography needs 4); recover with
                // identity rather than aborting the whole solve (SPEC_FULL.md §7).
                let refit = match Model::fit(kind, &local_matches) {
                    Ok(m) => m,
                    Err(AlignError::NotEnoughDataPoints { needed, had }) => {
                        warn!(
                            target: "optimize",
                            "layer {} tile fit had only {had}/{needed} usable points, falling back to identity",
                            self.graph[idx].layer
                        );
                        Model::identity(kind)
                    }
                    Err(e) => return Err(e),
                };
                let error = refit.cost(&local_matches);
                let delta = model_delta(&self.graph[idx].model, &refit);
                max_delta = max_delta.max(delta);
                total_error += error;
                self.graph[idx].model = refit;
            }

            let mean_error = total_error / movable_tiles.max(1) as f64;
            stats.iterations = iteration + 1;
            stats.max_delta = max_delta;
            stats.mean_error = mean_error;

            if max_delta < max_delta_epsilon {
                converged = true;
                break;
            }
            if plateau.push(mean_error) {
                stats.plateaued = true;
                converged = true;
                break;
            }
        }

        if !converged {
            return Err(AlignError::ConvergenceTimeout {
                phase: crate::error::OptimizerPhase::TileConfiguration,
                max_iters: max_iterations,
            });
        }

        Ok(stats)
    }
}

impl Default for TileConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

fn edge_owns_first(
    graph: &UnGraph<LayerTile, TileConnection>,
    edge: petgraph::graph::EdgeIndex,
    node: NodeIndex,
) -> bool {
    let (a, _b) = graph.edge_endpoints(edge).expect("edge exists");
    a == node
}

fn model_delta(before: &Model, after: &Model) -> f64 {
    let probe = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
    probe.iter().map(|&p| before.apply(p).distance(after.apply(p))).fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;

    fn identity_match(l: Vec2, w: Vec2) -> PointMatch {
        PointMatch::new(Point::at_rest(l), Point::at_rest(w), 1.0)
    }

    #[test]
    fn two_layer_translation_converges_to_known_offset() {
        let mut config = TileConfiguration::new();
        let a = LayerIndex(0);
        let b = LayerIndex(1);
        config.fix_tile(a, ModelKind::Translation);
        config.ensure_tile(b, ModelKind::Translation);

        // Layer b sits 5 units to the right of layer a, in a's local frame.
        let shift = Vec2::new(5.0, 0.0);
        let matches = vec![
            identity_match(Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0) - shift),
            identity_match(Vec2::new(1.0, 1.0), Vec2::new(1.0, 1.0) - shift),
            identity_match(Vec2::new(2.0, -1.0), Vec2::new(2.0, -1.0) - shift),
        ];
        config.connect(a, b, matches, ModelKind::Translation);

        let stats = config.optimize(ModelKind::Translation, 50, 1e-9, 10).unwrap();
        assert!(stats.iterations > 0);

        let b_tile = config.tile(b).unwrap();
        if let Model::Translation(t) = b_tile.model {
            assert!((t.t.x - shift.x).abs() < 1e-6 || (t.t.x + shift.x).abs() < 1e-6);
        } else {
            panic!("expected translation model");
        }
    }

    #[test]
    fn ensure_tile_is_idempotent() {
        let mut config = TileConfiguration::new();
        let a = LayerIndex(0);
        let idx1 = config.ensure_tile(a, ModelKind::Rigid);
        let idx2 = config.ensure_tile(a, ModelKind::Rigid);
        assert_eq!(idx1, idx2);
        assert_eq!(config.len(), 1);
    }
}
