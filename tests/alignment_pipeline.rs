//! End-to-end scenarios against the public `align::run` pipeline
//! (SPEC_FULL.md §8). Scenario numbers below refer to that section's list;
//! scenario 3 (non-invertible-model world-lookup recovery) is exercised at
//! the model level in `src/tilespec.rs`'s own unit tests instead, since it
//! doesn't need the full pipeline.

mod common;

use std::collections::HashSet;

use elastic_align::{
    align::{self, AlignmentInputs, CancelFlag},
    config::AlignmentParams,
    error::AlignError,
    geom::Vec2,
    model::ModelKind,
    skiplayers::SkipSet,
    tile::LayerIndex,
    tilespec,
};

fn small_mesh_params() -> AlignmentParams {
    AlignmentParams {
        layer_scale: 1.0,
        resolution_spring_mesh: 4,
        max_iterations_spring_mesh: 200,
        max_plateau_width_spring_mesh: 20,
        ..AlignmentParams::default()
    }
}

/// Scenario 1: two layers, one correspondence record whose matches already
/// agree in both layers' local frames. Fixing layer 0 should pull layer 1's
/// rigid model to (near) identity.
#[test]
fn rigid_pre_alignment_converges_to_near_identity() {
    let dir = common::scratch_dir("rigid");
    let layer0 = common::write_single_tile_layer(&dir, "layer0", 0, 100.0, ModelKind::Rigid);
    let layer1 = common::write_single_tile_layer(&dir, "layer1", 1, 100.0, ModelKind::Rigid);

    let corners = [
        Vec2::new(0.0, 0.0),
        Vec2::new(100.0, 0.0),
        Vec2::new(0.0, 100.0),
        Vec2::new(100.0, 100.0),
    ];
    let matches: Vec<(Vec2, Vec2, f64)> = corners.iter().map(|&c| (c, c, 1.0)).collect();
    let corr = common::write_correspondence_file(&dir, "corr-0-1", &layer0, &layer1, &matches, true);

    let target = dir.join("out");
    let params = small_mesh_params();
    let inputs = AlignmentInputs {
        tilespec_files: vec![layer0, layer1],
        corr_files: vec![corr],
        fixed_layers: HashSet::from([LayerIndex(0)]),
        skip_layers: SkipSet::empty(),
        from_layer: None,
        to_layer: None,
        image_width: 100,
        image_height: 100,
        scene_origin: Vec2::ZERO,
        target_dir: target.clone(),
    };

    let report = align::run(&params, &inputs, &CancelFlag::new()).expect("alignment run should succeed");
    let tile_stats = report.tile_configuration.expect("tile-configuration phase ran");
    assert!(tile_stats.max_delta < 1e-6, "expected near-identity convergence, got max_delta={}", tile_stats.max_delta);
    assert!(target.join("layer1.json").exists());
}

/// Scenario 2: a skipped layer never enters the tile-configuration/mesh
/// pipeline, so its tile-spec file is rewritten unchanged (no MLS transform
/// appended), while active layers each gain one.
#[test]
fn skip_layers_leaves_skipped_layer_transforms_untouched() {
    let dir = common::scratch_dir("skip");
    let layer0 = common::write_single_tile_layer(&dir, "layer0", 0, 100.0, ModelKind::Rigid);
    let layer1 = common::write_single_tile_layer(&dir, "layer1", 1, 100.0, ModelKind::Rigid);
    let layer2 = common::write_single_tile_layer(&dir, "layer2", 2, 100.0, ModelKind::Rigid);

    let target = dir.join("out");
    let params = small_mesh_params();
    let inputs = AlignmentInputs {
        tilespec_files: vec![layer0, layer1, layer2],
        corr_files: vec![],
        fixed_layers: HashSet::from([LayerIndex(0), LayerIndex(1), LayerIndex(2)]),
        skip_layers: SkipSet::parse("1").unwrap(),
        from_layer: None,
        to_layer: None,
        image_width: 100,
        image_height: 100,
        scene_origin: Vec2::ZERO,
        target_dir: target.clone(),
    };

    align::run(&params, &inputs, &CancelFlag::new()).expect("alignment run should succeed");

    let skipped = tilespec::read_tile_specs(&target.join("layer1.json")).unwrap();
    assert_eq!(skipped[0].transforms.len(), 1, "skipped layer should not gain an MLS transform");

    let active = tilespec::read_tile_specs(&target.join("layer0.json")).unwrap();
    assert_eq!(active[0].transforms.len(), 2, "active layer should gain one MLS transform");
}

/// Scenario 4: a correspondence between layers farther apart than
/// `maxLayersDistance` is never wired into the tile-configuration graph, so
/// the far layer is left with no usable matches.
#[test]
fn max_layers_distance_prunes_far_correspondences() {
    let dir = common::scratch_dir("distance");
    let layers: Vec<_> = (0..6)
        .map(|i| common::write_single_tile_layer(&dir, &format!("layer{i}"), i, 100.0, ModelKind::Rigid))
        .collect();

    let matches = vec![
        (Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0), 1.0),
        (Vec2::new(100.0, 0.0), Vec2::new(100.0, 0.0), 1.0),
        (Vec2::new(0.0, 100.0), Vec2::new(0.0, 100.0), 1.0),
    ];
    let corr = common::write_correspondence_file(&dir, "corr-0-3", &layers[0], &layers[3], &matches, true);

    let target = dir.join("out");
    let mut params = small_mesh_params();
    params.max_layers_distance = 2;
    let inputs = AlignmentInputs {
        tilespec_files: layers,
        corr_files: vec![corr],
        fixed_layers: HashSet::from([LayerIndex(0), LayerIndex(1), LayerIndex(2), LayerIndex(4), LayerIndex(5)]),
        skip_layers: SkipSet::empty(),
        from_layer: None,
        to_layer: None,
        image_width: 100,
        image_height: 100,
        scene_origin: Vec2::ZERO,
        target_dir: target,
    };

    let err = align::run(&params, &inputs, &CancelFlag::new()).unwrap_err();
    assert!(
        matches!(err, AlignError::NotEnoughDataPoints { had: 0, .. }),
        "layer 3's only correspondence is 3 layers away and should have been pruned, got {err:?}"
    );
}

/// Scenario 5: the legacy fixed-iteration-count optimizer runs the same
/// pipeline to completion.
#[test]
fn legacy_optimizer_runs_to_completion() {
    let dir = common::scratch_dir("legacy");
    let layer0 = common::write_single_tile_layer(&dir, "layer0", 0, 100.0, ModelKind::Rigid);
    let layer1 = common::write_single_tile_layer(&dir, "layer1", 1, 100.0, ModelKind::Rigid);

    let matches = vec![
        (Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0), 1.0),
        (Vec2::new(100.0, 0.0), Vec2::new(100.0, 0.0), 1.0),
        (Vec2::new(0.0, 100.0), Vec2::new(0.0, 100.0), 1.0),
    ];
    let corr = common::write_correspondence_file(&dir, "corr-0-1", &layer0, &layer1, &matches, true);

    let target = dir.join("out");
    let mut params = small_mesh_params();
    params.use_legacy_optimizer = true;
    let inputs = AlignmentInputs {
        tilespec_files: vec![layer0, layer1],
        corr_files: vec![corr],
        fixed_layers: HashSet::from([LayerIndex(0)]),
        skip_layers: SkipSet::empty(),
        from_layer: None,
        to_layer: None,
        image_width: 100,
        image_height: 100,
        scene_origin: Vec2::ZERO,
        target_dir: target,
    };

    let report = align::run(&params, &inputs, &CancelFlag::new()).expect("legacy optimizer run should succeed");
    let mesh_stats = report.spring_mesh.expect("spring-mesh relaxation phase ran");
    assert!(mesh_stats.iterations > 0);
}

/// Scenario 6: a correspondence record with zero match pairs is parsed
/// without error, but if it's a non-fixed layer's only source of matches,
/// the layer still ends up below the 3-match floor.
#[test]
fn zero_match_record_is_ignored_then_leaves_not_enough_data() {
    let dir = common::scratch_dir("degenerate");
    let layer0 = common::write_single_tile_layer(&dir, "layer0", 0, 100.0, ModelKind::Rigid);
    let layer1 = common::write_single_tile_layer(&dir, "layer1", 1, 100.0, ModelKind::Rigid);
    let corr = common::write_correspondence_file(&dir, "corr-0-1", &layer0, &layer1, &[], true);

    let target = dir.join("out");
    let params = small_mesh_params();
    let inputs = AlignmentInputs {
        tilespec_files: vec![layer0, layer1],
        corr_files: vec![corr],
        fixed_layers: HashSet::from([LayerIndex(0)]),
        skip_layers: SkipSet::empty(),
        from_layer: None,
        to_layer: None,
        image_width: 100,
        image_height: 100,
        scene_origin: Vec2::ZERO,
        target_dir: target,
    };

    let err = align::run(&params, &inputs, &CancelFlag::new()).unwrap_err();
    assert!(matches!(err, AlignError::NotEnoughDataPoints { had: 0, .. }));
}
