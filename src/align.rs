//! Elastic aligner orchestrator (SPEC_FULL.md §4.E): wires together the
//! model library, spring meshes, tile configuration and correspondence
//! loader into the full eight-step alignment pipeline.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    config::AlignmentParams,
    correspond::{self, CorrespondenceIndex},
    error::{AlignError, OptimizerPhase},
    geom::{Point, PointMatch, Vec2},
    mesh::{self, MeshParams, Spring, SpringMesh},
    mls::{Control, MlsTransform},
    model::ModelKind,
    report::{RunReport, timed_phase},
    skiplayers::SkipSet,
    tile::{LayerIndex, TileConfiguration},
    tilespec::{self, TileSpec, TransformSpec},
};

/// A cooperative cancel flag (§5): `Ctrl-C` sets it, optimizer phases check
/// it between iterations rather than the process being killed outright.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct AlignmentInputs {
    pub tilespec_files: Vec<PathBuf>,
    pub corr_files: Vec<PathBuf>,
    pub fixed_layers: HashSet<LayerIndex>,
    pub skip_layers: SkipSet,
    pub from_layer: Option<i64>,
    pub to_layer: Option<i64>,
    pub image_width: u32,
    pub image_height: u32,
    pub scene_origin: Vec2,
    pub target_dir: PathBuf,
}

struct LoadedFile {
    path: PathBuf,
    tiles: Vec<TileSpec>,
}

/// Runs the full eight-step pipeline and writes per-layer tile-spec files
/// plus the run report into `inputs.target_dir`.
pub fn run(params: &AlignmentParams, inputs: &AlignmentInputs, cancel: &CancelFlag) -> Result<RunReport, AlignError> {
    let kind = params.model_kind()?;
    let mut report = RunReport::new(params.clone(), Utc::now());

    let result = run_inner(params, inputs, cancel, kind, &mut report);
    match &result {
        Ok(_) => report.status = crate::report::RunStatus::Success,
        Err(AlignError::Canceled { .. }) => report.status = crate::report::RunStatus::Canceled,
        Err(e) => {
            report.status = crate::report::RunStatus::Failed;
            report.error_message = Some(e.to_string());
        }
    }

    let report_path = inputs.target_dir.join("run-report.json");
    report.write(&report_path)?;
    result?;
    Ok(report)
}

fn run_inner(
    params: &AlignmentParams,
    inputs: &AlignmentInputs,
    cancel: &CancelFlag,
    kind: ModelKind,
    report: &mut RunReport,
) -> Result<(), AlignError> {
    // Step 1/2 groundwork: load every tile-spec file and group tiles by layer.
    let mut files = Vec::with_capacity(inputs.tilespec_files.len());
    let mut layer_and_location = Vec::new();
    for path in &inputs.tilespec_files {
        let tiles = tilespec::read_tile_specs(path)?;
        let file_idx = files.len();
        for (tile_idx, tile) in tiles.iter().enumerate() {
            layer_and_location.push((LayerIndex(tile.layer as u32), (file_idx, tile_idx)));
        }
        files.push(LoadedFile { path: path.clone(), tiles });
    }
    let by_layer: HashMap<LayerIndex, Vec<(usize, usize)>> =
        layer_and_location.into_iter().into_group_map();

    let mut layers: Vec<LayerIndex> = by_layer.keys().copied().collect();
    layers.sort();
    let start = inputs.from_layer.map(|v| v as u32).unwrap_or_else(|| layers.first().map(|l| l.0).unwrap_or(0));
    let end = inputs.to_layer.map(|v| v as u32).unwrap_or_else(|| layers.last().map(|l| l.0).unwrap_or(0));
    let active_layers: Vec<LayerIndex> = layers
        .iter()
        .copied()
        .filter(|l| l.0 >= start && l.0 <= end && !inputs.skip_layers.contains(*l))
        .collect();

    info!(target: "wiring", "aligning {} layers ({start}..={end})", active_layers.len());

    // Step 1: one tile per layer in the tile-configuration graph.
    let mut configuration = TileConfiguration::new();
    for &layer in &active_layers {
        if inputs.fixed_layers.contains(&layer) {
            configuration.fix_tile(layer, kind);
        } else {
            configuration.ensure_tile(layer, kind);
        }
    }

    // Step 2: one mesh per layer, sized to the scaled image dimensions.
    let mesh_width = (inputs.image_width as f64 * params.layer_scale).ceil();
    let mesh_height = (inputs.image_height as f64 * params.layer_scale).ceil();
    let mesh_params = MeshParams {
        resolution: params.resolution_spring_mesh,
        width: mesh_width,
        height: mesh_height,
        stiffness: params.stiffness_spring_mesh,
        max_stretch: params.max_stretch_spring_mesh,
        damp: params.damp_spring_mesh,
    };
    let mut meshes: Vec<SpringMesh> =
        active_layers.iter().map(|&layer| SpringMesh::new(layer, mesh_params)).collect();
    let mesh_index: HashMap<LayerIndex, usize> =
        meshes.iter().enumerate().map(|(i, m)| (m.layer, i)).collect();

    // Step 3: load correspondences and snap matches onto lattice vertices.
    let mut index = CorrespondenceIndex::default();
    timed_phase(report, "load-correspondences", || {
        let mut layer_cache = HashMap::new();
        for path in &inputs.corr_files {
            correspond::load_correspondence_file(path, &mut layer_cache, &mut index)?;
        }
        Ok(())
    })?;

    timed_phase(report, "fixup", || {
        correspond::fixup_matches(&mut meshes, &mut index);
        Ok(())
    })?;
    report.dropped_out_of_mesh_matches = index.dropped_out_of_mesh;
    debug!(target: "fixup", "dropped {} out-of-mesh matches", index.dropped_out_of_mesh);

    // Step 4: wire inter-layer constraints.
    timed_phase(report, "wiring", || {
        wire_inter_layer_constraints(params, inputs, &active_layers, &mesh_index, &mut meshes, &mut index, &mut configuration, kind)
    })?;

    if cancel.is_set() {
        return Err(AlignError::Canceled { phase: OptimizerPhase::TileConfiguration });
    }

    // Step 5: pre-align via the tile-configuration solver, then pre-warp
    // every mesh through its tile's resulting model.
    let tile_stats = timed_phase(report, "tile-configuration", || {
        configuration.optimize(
            kind,
            params.max_iterations_spring_mesh,
            params.max_epsilon * params.layer_scale,
            params.max_plateau_width_spring_mesh,
        )
    })?;
    report.tile_configuration = Some(tile_stats);
    info!(target: "optimize", "tile configuration converged in {} iterations (plateau={})", tile_stats.iterations, tile_stats.plateaued);

    for mesh in &mut meshes {
        if let Some(tile) = configuration.tile(mesh.layer) {
            let model = tile.model;
            mesh.prewarp(move |p| model.apply(p));
        }
    }

    if cancel.is_set() {
        return Err(AlignError::Canceled { phase: OptimizerPhase::SpringMeshRelaxation });
    }

    // Step 6: relax the spring meshes.
    let should_cancel = || cancel.is_set();
    let mesh_stats = timed_phase(report, "spring-mesh-relaxation", || {
        if params.use_legacy_optimizer {
            mesh::optimize_meshes2(&mut meshes, params.max_epsilon, params.max_iterations_spring_mesh, &should_cancel)
        } else {
            mesh::optimize_meshes(
                &mut meshes,
                params.max_epsilon,
                params.max_iterations_spring_mesh,
                params.max_plateau_width_spring_mesh,
                &should_cancel,
            )
        }
    })?;
    report.spring_mesh = Some(mesh_stats);
    info!(target: "mesh", "spring mesh relaxation converged in {} iterations (max_delta={:.4})", mesh_stats.iterations, mesh_stats.max_delta);

    // Step 7: unscale every mesh back into world coordinates.
    timed_phase(report, "unscale", || {
        for mesh in &mut meshes {
            mesh.unscale(params.layer_scale, inputs.scene_origin);
        }
        Ok(())
    })?;

    // Step 8: emit per-tile MLS transforms and write updated tile specs.
    timed_phase(report, "emit", || {
        emit(params, &active_layers, &mesh_index, &meshes, &mut files, &by_layer)
    })?;

    std::fs::create_dir_all(&inputs.target_dir)
        .map_err(|source| AlignError::Io { path: inputs.target_dir.clone(), source })?;
    for file in &files {
        let basename = file
            .path
            .file_name()
            .ok_or_else(|| AlignError::InputParse {
                path: file.path.clone(),
                source: anyhow::anyhow!("tile-spec path has no filename"),
            })?;
        let out_path = inputs.target_dir.join(basename);
        tilespec::write_tile_specs(&out_path, &file.tiles)?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn wire_inter_layer_constraints(
    params: &AlignmentParams,
    inputs: &AlignmentInputs,
    active_layers: &[LayerIndex],
    mesh_index: &HashMap<LayerIndex, usize>,
    meshes: &mut [SpringMesh],
    index: &mut CorrespondenceIndex,
    configuration: &mut TileConfiguration,
    kind: ModelKind,
) -> Result<(), AlignError> {
    for (ai, &a) in active_layers.iter().enumerate() {
        let max_b = a.0.saturating_add(params.max_layers_distance as u32).min(active_layers.last().map(|l| l.0).unwrap_or(a.0));
        for &b in active_layers[ai + 1..].iter() {
            if b.0 > max_b {
                continue;
            }
            wire_pair(params, inputs, a, b, mesh_index, meshes, index, configuration, kind)?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn wire_pair(
    params: &AlignmentParams,
    inputs: &AlignmentInputs,
    a: LayerIndex,
    b: LayerIndex,
    mesh_index: &HashMap<LayerIndex, usize>,
    meshes: &mut [SpringMesh],
    index: &mut CorrespondenceIndex,
    configuration: &mut TileConfiguration,
    kind: ModelKind,
) -> Result<(), AlignError> {
    let k_ab = 1.0 / (b.0 as f64 - a.0 as f64).abs().max(1.0);
    let spring_template = Spring::new(0.0, k_ab, params.max_stretch_spring_mesh);

    // Matches always drive mesh springs (above); whether they also drive the
    // rigid-graph pre-alignment is gated on `should_connect` from *either*
    // direction's record (SPEC_FULL.md §4.E step 4, §9 open question).
    let mut should_connect = false;
    let mut connect_matches = Vec::new();

    if let Some(record) = index.get(a, b) {
        should_connect |= record.should_connect;
        wire_direction(a, b, record, spring_template, mesh_index, meshes);
        connect_matches.extend(record.matches.iter().cloned());
    }
    if let Some(record) = index.get(b, a) {
        should_connect |= record.should_connect;
        wire_direction(b, a, record, spring_template, mesh_index, meshes);
        // This record's matches are `b`-local/`a`-local (p1 belongs to `b`);
        // `configuration.connect(a, b, ..)` below expects p1 on `a`'s side.
        connect_matches.extend(record.matches.iter().map(|m| PointMatch::new(m.p2, m.p1, m.weight)));
    }

    if should_connect && !connect_matches.is_empty() {
        configuration.connect(a, b, connect_matches, kind);
        debug!(target: "wiring", "connected tiles for layers {a} <-> {b}");
    }
    if inputs.fixed_layers.contains(&a) {
        configuration.fix_tile(a, kind);
    }
    if inputs.fixed_layers.contains(&b) {
        configuration.fix_tile(b, kind);
    }
    Ok(())
}

/// Wires the springs for one direction of a correspondence record: `src`
/// owns the (already-snapped) active vertex, `dst` receives a fresh passive
/// vertex at each match's `p2`.
fn wire_direction(
    src: LayerIndex,
    dst: LayerIndex,
    record: &crate::correspond::LoadedCorrespondence,
    spring: Spring,
    mesh_index: &HashMap<LayerIndex, usize>,
    meshes: &mut [SpringMesh],
) {
    let (Some(&src_idx), Some(&dst_idx)) = (mesh_index.get(&src), mesh_index.get(&dst)) else {
        return;
    };
    if src_idx == dst_idx {
        return;
    }

    for (i, m) in record.matches.iter().enumerate() {
        let Some(vertex_id) = record.p1_vertex[i] else { continue };

        let passive_id = meshes[dst_idx].add_passive_vertex(m.p2.l, m.p2.w);
        meshes[src_idx].add_cross_spring(mesh::CrossSpring {
            local_active: vertex_id,
            other_layer: dst,
            other_passive: passive_id,
            spring,
        });
    }
}

fn emit(
    params: &AlignmentParams,
    active_layers: &[LayerIndex],
    mesh_index: &HashMap<LayerIndex, usize>,
    meshes: &[SpringMesh],
    files: &mut [LoadedFile],
    by_layer: &HashMap<LayerIndex, Vec<(usize, usize)>>,
) -> Result<(), AlignError> {
    let controls_by_layer: HashMap<LayerIndex, Vec<Control>> = active_layers
        .par_iter()
        .map(|&layer| {
            let mesh = &meshes[mesh_index[&layer]];
            let controls =
                mesh.control_points().map(|(l, w)| Control { l, w, weight: 1.0 }).collect::<Vec<_>>();
            (layer, controls)
        })
        .collect();

    for &layer in active_layers {
        let Some(controls) = controls_by_layer.get(&layer) else { continue };
        let Some(locations) = by_layer.get(&layer) else { continue };

        for &(file_idx, tile_idx) in locations {
            let tile = &mut files[file_idx].tiles[tile_idx];

            let bbox = (tile.bbox_min(), tile.bbox_max());
            let mls = MlsTransform::build(controls, bbox, params.mls_alpha)?;
            tile.transforms.push(TransformSpec::from_mls(&mls));

            let corners = [
                Vec2::new(0.0, 0.0),
                Vec2::new(tile.width as f64, 0.0),
                Vec2::new(0.0, tile.height as f64),
                Vec2::new(tile.width as f64, tile.height as f64),
            ];
            let mut min = Vec2::new(f64::INFINITY, f64::INFINITY);
            let mut max = Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
            for corner in corners {
                let w = tile.apply_chain(corner)?;
                min = Vec2::new(min.x.min(w.x), min.y.min(w.y));
                max = Vec2::new(max.x.max(w.x), max.y.max(w.y));
            }
            tile.bbox = [min.x, min.y, max.x, max.y];
        }
    }
    Ok(())
}

/// A match record purely for tests, avoiding the full correspondence wire
/// format when exercising the orchestrator against synthetic inputs.
#[cfg(test)]
pub fn synthetic_match(l1: Vec2, w1: Vec2, l2: Vec2, w2: Vec2, weight: f64) -> PointMatch {
    PointMatch::new(Point::new(l1, w1), Point::new(l2, w2), weight)
}
