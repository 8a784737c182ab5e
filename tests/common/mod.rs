//! Shared fixture builders for the end-to-end pipeline tests (SPEC_FULL.md
//! §8): writes the same JSON the real CLI reads and writes, so the tests
//! exercise `align::run` exactly as `main.rs` does.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use elastic_align::{
    geom::Vec2,
    model::ModelKind,
    tilespec::{TileSpec, identity_transform_spec},
};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh scratch directory for one test, isolated from parallel test runs
/// by a process-id + counter suffix.
pub fn scratch_dir(label: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("elastic-align-it-{}-{label}-{n}", std::process::id()));
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

/// Writes a tile-spec file holding a single identity-transformed tile for
/// `layer`, `size` on each side.
pub fn write_single_tile_layer(dir: &Path, name: &str, layer: i32, size: f64, kind: ModelKind) -> PathBuf {
    let tile = TileSpec {
        tile_id: format!("{name}-0"),
        layer,
        bbox: [0.0, 0.0, size, size],
        transforms: vec![identity_transform_spec(kind)],
        mipmap_levels: None,
        width: size as u32,
        height: size as u32,
        z: None,
    };
    let path = dir.join(format!("{name}.json"));
    fs::write(&path, serde_json::to_string_pretty(&vec![tile]).unwrap()).expect("write tile spec");
    path
}

/// Writes a correspondence file with a single record between the layers
/// named by `url1`/`url2` (tile-spec file paths, resolved by
/// `correspond::resolve_layer`).
pub fn write_correspondence_file(
    dir: &Path,
    name: &str,
    url1: &Path,
    url2: &Path,
    matches: &[(Vec2, Vec2, f64)],
    should_connect: bool,
) -> PathBuf {
    let pairs: Vec<serde_json::Value> = matches
        .iter()
        .map(|(l1, l2, w)| {
            serde_json::json!({
                "p1": {"l": [l1.x, l1.y], "w": [l1.x, l1.y]},
                "p2": {"l": [l2.x, l2.y], "w": [l2.x, l2.y]},
                "w": w,
            })
        })
        .collect();
    let records = serde_json::json!([{
        "url1": url1.to_str().expect("utf8 path"),
        "url2": url2.to_str().expect("utf8 path"),
        "correspondencePointPairs": pairs,
        "shouldConnect": should_connect,
    }]);
    let path = dir.join(format!("{name}.json"));
    fs::write(&path, serde_json::to_string_pretty(&records).unwrap()).expect("write correspondence file");
    path
}
