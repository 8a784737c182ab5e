//! Tile-spec wire format (SPEC_FULL.md §6): the JSON tile array the
//! orchestrator reads and rewrites with an appended MLS transform.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    geom::Vec2,
    mls::MlsTransform,
    model::{AffineModel, HomographyModel, Model, ModelKind, RigidModel, SimilarityModel, TranslationModel},
};

pub const CLASS_TRANSLATION: &str = "TranslationModel2D";
pub const CLASS_RIGID: &str = "RigidModel2D";
pub const CLASS_SIMILARITY: &str = "SimilarityModel2D";
pub const CLASS_AFFINE: &str = "AffineModel2D";
pub const CLASS_HOMOGRAPHY: &str = "HomographyModel2D";
pub const CLASS_MLS: &str = "MovingLeastSquaresTransform2D";

/// One entry in a tile's `transforms` chain. `className` is a discriminator
/// only (SPEC_FULL.md §9) — behavior is driven entirely by [`TransformSpec::apply`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransformSpec {
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(rename = "dataString")]
    pub data_string: String,
}

impl TransformSpec {
    pub fn from_model(model: &Model) -> Self {
        let class_name = match model.kind() {
            ModelKind::Translation => CLASS_TRANSLATION,
            ModelKind::Rigid => CLASS_RIGID,
            ModelKind::Similarity => CLASS_SIMILARITY,
            ModelKind::Affine => CLASS_AFFINE,
            ModelKind::Homography => CLASS_HOMOGRAPHY,
        }
        .to_string();
        let data_string = model.to_array().iter().map(|v| format!("{v:.17e}")).collect::<Vec<_>>().join(" ");
        TransformSpec { class_name, data_string }
    }

    pub fn from_mls(mls: &MlsTransform) -> Self {
        TransformSpec { class_name: CLASS_MLS.to_string(), data_string: mls.to_data_string() }
    }

    fn parse_array(&self) -> Option<Vec<f64>> {
        self.data_string.split_ascii_whitespace().map(|t| t.parse().ok()).collect()
    }

    pub fn apply(&self, p: Vec2) -> Result<Vec2, AlignError> {
        match self.class_name.as_str() {
            CLASS_TRANSLATION => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Ok(Model::from_array(ModelKind::Translation, &a).ok_or_else(|| self.parse_error())?.apply(p))
            }
            CLASS_RIGID => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Ok(Model::from_array(ModelKind::Rigid, &a).ok_or_else(|| self.parse_error())?.apply(p))
            }
            CLASS_SIMILARITY => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Ok(Model::from_array(ModelKind::Similarity, &a).ok_or_else(|| self.parse_error())?.apply(p))
            }
            CLASS_AFFINE => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Ok(Model::from_array(ModelKind::Affine, &a).ok_or_else(|| self.parse_error())?.apply(p))
            }
            CLASS_HOMOGRAPHY => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Ok(Model::from_array(ModelKind::Homography, &a).ok_or_else(|| self.parse_error())?.apply(p))
            }
            CLASS_MLS => {
                let mls = MlsTransform::from_data_string(&self.data_string).ok_or_else(|| self.parse_error())?;
                mls.apply(p)
            }
            _ => Err(self.parse_error()),
        }
    }

    /// Inverse of [`Self::apply`]. MLS transforms have no closed-form
    /// inverse here (general moving-least-squares inversion needs numerical
    /// root-finding this crate doesn't implement), so they always report
    /// *non-invertible*.
    pub fn apply_inverse(&self, p: Vec2) -> Result<Vec2, AlignError> {
        match self.class_name.as_str() {
            CLASS_TRANSLATION => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Model::from_array(ModelKind::Translation, &a).ok_or_else(|| self.parse_error())?.apply_inverse(p)
            }
            CLASS_RIGID => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Model::from_array(ModelKind::Rigid, &a).ok_or_else(|| self.parse_error())?.apply_inverse(p)
            }
            CLASS_SIMILARITY => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Model::from_array(ModelKind::Similarity, &a).ok_or_else(|| self.parse_error())?.apply_inverse(p)
            }
            CLASS_AFFINE => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Model::from_array(ModelKind::Affine, &a).ok_or_else(|| self.parse_error())?.apply_inverse(p)
            }
            CLASS_HOMOGRAPHY => {
                let a = self.parse_array().ok_or_else(|| self.parse_error())?;
                Model::from_array(ModelKind::Homography, &a).ok_or_else(|| self.parse_error())?.apply_inverse(p)
            }
            _ => Err(AlignError::NonInvertibleModel),
        }
    }

    fn parse_error(&self) -> AlignError {
        AlignError::InputParse {
            path: Path::new(&self.class_name).to_path_buf(),
            source: anyhow::anyhow!("unrecognized or malformed transform dataString"),
        }
    }
}

/// A tile-spec entry. `layer == -1` is rejected at parse time (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileSpec {
    #[serde(rename = "tileId")]
    pub tile_id: String,
    pub layer: i32,
    pub bbox: [f64; 4],
    pub transforms: Vec<TransformSpec>,
    #[serde(rename = "mipmapLevels", skip_serializing_if = "Option::is_none")]
    pub mipmap_levels: Option<serde_json::Value>,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl TileSpec {
    /// Applies the full transform chain, in order, to a local point.
    pub fn apply_chain(&self, local: Vec2) -> Result<Vec2, AlignError> {
        let mut p = local;
        for t in &self.transforms {
            p = t.apply(p)?;
        }
        Ok(p)
    }

    pub fn bbox_min(&self) -> Vec2 {
        Vec2::new(self.bbox[0], self.bbox[1])
    }

    pub fn bbox_max(&self) -> Vec2 {
        Vec2::new(self.bbox[2], self.bbox[3])
    }

    fn contains_world(&self, p: Vec2) -> bool {
        let (min, max) = (self.bbox_min(), self.bbox_max());
        p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
    }

    /// Inverse of [`Self::apply_chain`]: walks the transform chain back to
    /// front.
    pub fn apply_inverse_chain(&self, world: Vec2) -> Result<Vec2, AlignError> {
        let mut p = world;
        for t in self.transforms.iter().rev() {
            p = t.apply_inverse(p)?;
        }
        Ok(p)
    }
}

/// One tile's resolution of a world-space point, surfaced when more than one
/// tile's bbox overlaps it.
pub struct WorldLookupResult<'a> {
    pub tile: &'a TileSpec,
    pub local: Vec2,
    pub visible: bool,
}

/// World-to-local resolution across a set of overlapping tiles (SPEC_FULL.md
/// §7, §8 scenario 3): a non-invertible tile is skipped with a warning; at
/// least one survivor is required, or the whole lookup fails.
pub fn resolve_world_point(tiles: &[TileSpec], world: Vec2) -> Result<WorldLookupResult<'_>, AlignError> {
    let mut survivor = None;
    for tile in tiles {
        if !tile.contains_world(world) {
            continue;
        }
        match tile.apply_inverse_chain(world) {
            Ok(local) => {
                if survivor.is_none() {
                    survivor = Some(WorldLookupResult { tile, local, visible: true });
                }
            }
            Err(_) => {
                log::warn!(target: "emit", "tile {} is non-invertible at {world:?}, skipping", tile.tile_id);
            }
        }
    }
    survivor.ok_or(AlignError::NonInvertibleModel)
}

pub fn read_tile_specs(path: &Path) -> Result<Vec<TileSpec>, AlignError> {
    let text = fs::read_to_string(path).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })?;
    let specs: Vec<TileSpec> = serde_json::from_str(&text)
        .map_err(|e| AlignError::InputParse { path: path.to_path_buf(), source: anyhow::Error::new(e) })?;
    for spec in &specs {
        if spec.layer < 0 {
            return Err(AlignError::InputParse {
                path: path.to_path_buf(),
                source: anyhow::anyhow!("tile {} has invalid layer {}", spec.tile_id, spec.layer),
            });
        }
    }
    Ok(specs)
}

pub fn write_tile_specs(path: &Path, specs: &[TileSpec]) -> Result<(), AlignError> {
    let text = serde_json::to_string_pretty(specs)
        .map_err(|e| AlignError::InputParse { path: path.to_path_buf(), source: anyhow::Error::new(e) })?;
    fs::write(path, text).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })
}

/// Helper used by tests and callers that need a quick affine/rigid/etc.
/// descriptor without going through [`TransformSpec::from_model`].
pub fn identity_transform_spec(kind: ModelKind) -> TransformSpec {
    TransformSpec::from_model(&Model::identity(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::assert_in_delta;

    #[test]
    fn affine_transform_spec_round_trips_through_data_string() {
        let model = Model::Affine(AffineModel { m: [1.1, 0.1, -0.1, 0.9, 3.0, -2.0] });
        let spec = TransformSpec::from_model(&model);
        let p = Vec2::new(5.0, 7.0);
        let expected = model.apply(p);
        let actual = spec.apply(p).unwrap();
        assert_in_delta!(actual.x, expected.x, 1e-9);
        assert_in_delta!(actual.y, expected.y, 1e-9);
    }

    #[test]
    fn chain_of_transforms_applies_in_order() {
        let t1 = TransformSpec::from_model(&Model::Translation(TranslationModel { t: Vec2::new(10.0, 0.0) }));
        let t2 = TransformSpec::from_model(&Model::Translation(TranslationModel { t: Vec2::new(0.0, 5.0) }));
        let spec = TileSpec {
            tile_id: "t0".into(),
            layer: 0,
            bbox: [0.0, 0.0, 100.0, 100.0],
            transforms: vec![t1, t2],
            mipmap_levels: None,
            width: 100,
            height: 100,
            z: None,
        };
        let result = spec.apply_chain(Vec2::new(0.0, 0.0)).unwrap();
        assert_in_delta!(result.x, 10.0, 1e-9);
        assert_in_delta!(result.y, 5.0, 1e-9);
    }

    fn tile_with_transform(tile_id: &str, bbox: [f64; 4], transforms: Vec<TransformSpec>) -> TileSpec {
        TileSpec {
            tile_id: tile_id.to_string(),
            layer: 0,
            bbox,
            transforms,
            mipmap_levels: None,
            width: 100,
            height: 100,
            z: None,
        }
    }

    #[test]
    fn resolve_world_point_skips_non_invertible_survivor_wins() {
        let good = tile_with_transform(
            "good",
            [0.0, 0.0, 100.0, 100.0],
            vec![TransformSpec::from_model(&Model::Translation(TranslationModel { t: Vec2::new(10.0, 0.0) }))],
        );
        let bad = tile_with_transform(
            "bad",
            [0.0, 0.0, 100.0, 100.0],
            vec![TransformSpec::from_model(&Model::Homography(HomographyModel {
                h: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            }))],
        );
        let tiles = vec![bad, good];
        let result = resolve_world_point(&tiles, Vec2::new(50.0, 50.0)).unwrap();
        assert_eq!(result.tile.tile_id, "good");
        assert!(result.visible);
    }

    #[test]
    fn resolve_world_point_fails_when_all_overlapping_tiles_are_non_invertible() {
        let bad = tile_with_transform(
            "bad",
            [0.0, 0.0, 100.0, 100.0],
            vec![TransformSpec::from_model(&Model::Homography(HomographyModel {
                h: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            }))],
        );
        let tiles = vec![bad];
        let err = resolve_world_point(&tiles, Vec2::new(50.0, 50.0)).unwrap_err();
        assert!(matches!(err, AlignError::NonInvertibleModel));
    }

    #[test]
    fn similarity_and_homography_round_trip() {
        let sim = Model::Similarity(SimilarityModel { scale: 1.5, theta: 0.2, t: Vec2::new(1.0, -1.0) });
        let spec = TransformSpec::from_model(&sim);
        let p = Vec2::new(4.0, -2.0);
        let expected = sim.apply(p);
        let actual = spec.apply(p).unwrap();
        assert_in_delta!(actual.x, expected.x, 1e-9);
        assert_in_delta!(actual.y, expected.y, 1e-9);

        let hom = Model::Homography(HomographyModel { h: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.001, 0.0, 1.0] });
        let spec = TransformSpec::from_model(&hom);
        let expected = hom.apply(p);
        let actual = spec.apply(p).unwrap();
        assert_in_delta!(actual.x, expected.x, 1e-9);
        assert_in_delta!(actual.y, expected.y, 1e-9);
    }

    #[test]
    fn rigid_transform_spec_round_trips() {
        let rigid = Model::Rigid(RigidModel { theta: 0.5, t: Vec2::new(2.0, 3.0) });
        let spec = TransformSpec::from_model(&rigid);
        let p = Vec2::new(1.0, 1.0);
        let expected = rigid.apply(p);
        let actual = spec.apply(p).unwrap();
        assert_in_delta!(actual.x, expected.x, 1e-9);
        assert_in_delta!(actual.y, expected.y, 1e-9);
    }

    #[test]
    fn negative_layer_is_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("elastic-align-test-{}.json", std::process::id()));
        let json = r#"[{"tileId":"t","layer":-1,"bbox":[0,0,1,1],"transforms":[],"width":1,"height":1}]"#;
        std::fs::write(&path, json).unwrap();
        let err = read_tile_specs(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, AlignError::InputParse { .. }));
    }
}
