//! Correspondence loading and vertex fix-up (SPEC_FULL.md §4.D): parses
//! pairwise point-match records, indexes them by `(layer_a, layer_b)`, and
//! snaps match endpoints onto the owning mesh's lattice vertices.

use std::{collections::HashMap, fs, path::Path};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    geom::{Point, PointMatch, Vec2},
    mesh::{SpringMesh, VertexId},
    tile::LayerIndex,
    tilespec,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PointWire {
    l: [f64; 2],
    w: [f64; 2],
}

impl From<PointWire> for Point {
    fn from(p: PointWire) -> Self {
        Point::new(Vec2::from_array(p.l), Vec2::from_array(p.w))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PointPairWire {
    p1: PointWire,
    p2: PointWire,
    w: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CorrespondenceRecordWire {
    url1: String,
    url2: String,
    #[serde(rename = "correspondencePointPairs")]
    correspondence_point_pairs: Vec<PointPairWire>,
    #[serde(rename = "shouldConnect")]
    should_connect: bool,
}

/// A loaded, layer-resolved correspondence record.
#[derive(Clone, Debug)]
pub struct LoadedCorrespondence {
    pub layer_a: LayerIndex,
    pub layer_b: LayerIndex,
    pub matches: Vec<PointMatch>,
    pub should_connect: bool,
    /// Parallel to `matches`: the mesh-a vertex each match's `p1` was
    /// snapped to, or `None` if it was dropped during fix-up.
    pub p1_vertex: Vec<Option<VertexId>>,
}

#[derive(Default)]
pub struct CorrespondenceIndex {
    records: HashMap<(LayerIndex, LayerIndex), LoadedCorrespondence>,
    pub dropped_out_of_mesh: usize,
}

impl CorrespondenceIndex {
    pub fn get(&self, a: LayerIndex, b: LayerIndex) -> Option<&LoadedCorrespondence> {
        self.records.get(&(a, b))
    }

    pub fn get_mut(&mut self, a: LayerIndex, b: LayerIndex) -> Option<&mut LoadedCorrespondence> {
        self.records.get_mut(&(a, b))
    }

    pub fn records(&self) -> impl Iterator<Item = &LoadedCorrespondence> {
        self.records.values()
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut LoadedCorrespondence> {
        self.records.values_mut()
    }
}

/// Resolves a correspondence-file URL to a layer index: first checks the
/// cache, then falls back to opening the referenced tile-spec file and
/// reading its first tile's `layer` field (§4.D step 1).
pub fn resolve_layer(
    url: &str,
    cache: &mut HashMap<String, LayerIndex>,
) -> Result<LayerIndex, AlignError> {
    if let Some(&layer) = cache.get(url) {
        return Ok(layer);
    }
    let specs = tilespec::read_tile_specs(Path::new(url))?;
    let layer = specs
        .first()
        .map(|t| LayerIndex(t.layer as u32))
        .ok_or_else(|| AlignError::MissingLayer { url: url.to_string() })?;
    cache.insert(url.to_string(), layer);
    Ok(layer)
}

/// Parses a correspondence file and resolves/indexes every record
/// (§4.D steps 1-2). Fails on a duplicate `(layer_a, layer_b)` pair.
pub fn load_correspondence_file(
    path: &Path,
    layer_cache: &mut HashMap<String, LayerIndex>,
    index: &mut CorrespondenceIndex,
) -> Result<(), AlignError> {
    let text = fs::read_to_string(path).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })?;
    let records: Vec<CorrespondenceRecordWire> = serde_json::from_str(&text)
        .map_err(|e| AlignError::InputParse { path: path.to_path_buf(), source: anyhow::Error::new(e) })?;

    for record in records {
        let layer_a = resolve_layer(&record.url1, layer_cache)?;
        let layer_b = resolve_layer(&record.url2, layer_cache)?;

        if index.records.contains_key(&(layer_a, layer_b)) {
            return Err(AlignError::DuplicateCorrespondence { a: layer_a, b: layer_b });
        }

        let matches: Vec<PointMatch> = record
            .correspondence_point_pairs
            .into_iter()
            .map(|pair| PointMatch::new(pair.p1.into(), pair.p2.into(), pair.w))
            .collect();
        let n = matches.len();

        index.records.insert(
            (layer_a, layer_b),
            LoadedCorrespondence {
                layer_a,
                layer_b,
                matches,
                should_connect: record.should_connect,
                p1_vertex: vec![None; n],
            },
        );
    }

    Ok(())
}

/// Snaps every record's `p1` matches onto `mesh[layer_a]`'s lattice vertices
/// (§4.D step 3). Parallel over meshes: each mesh is exclusively owned by
/// its own slab, so no lock is needed (§4.D "Parallelism").
pub fn fixup_matches(meshes: &mut [SpringMesh], index: &mut CorrespondenceIndex) {
    let mut per_layer: HashMap<LayerIndex, Vec<&mut LoadedCorrespondence>> = HashMap::new();
    for record in index.records.values_mut() {
        per_layer.entry(record.layer_a).or_default().push(record);
    }

    let dropped: Vec<usize> = meshes
        .par_iter_mut()
        .map(|mesh| {
            let mut dropped_here = 0;
            if let Some(records) = per_layer.get_mut(&mesh.layer) {
                for record in records.iter_mut() {
                    for (i, m) in record.matches.iter_mut().enumerate() {
                        match mesh.find_vertex_near(m.p1.l) {
                            Some(vertex_id) => {
                                let vertex_w = mesh.vertex(vertex_id).w;
                                if vertex_w != m.p1.w {
                                    mesh.set_active_world(vertex_id, m.p1.w);
                                }
                                record.p1_vertex[i] = Some(vertex_id);
                            }
                            None => {
                                record.p1_vertex[i] = None;
                                dropped_here += 1;
                            }
                        }
                    }
                }
            }
            dropped_here
        })
        .collect();

    index.dropped_out_of_mesh += dropped.into_iter().sum::<usize>();
}
