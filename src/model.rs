//! Geometric model library (SPEC_FULL.md §4.A): the closed family of 2D
//! transforms tiles and meshes are warped through.
//!
//! A tagged-variant [`Model`] stands in for the class hierarchy the original
//! pipeline uses; `className`/`dataString` on the wire (`crate::tilespec`) are
//! just a discriminator and a parameter dump for whichever variant this is.

use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    geom::{PointMatch, Vec2, solve2x2, solve_linear},
};

/// `--modelIndex` from the CLI (SPEC_FULL.md §6), selecting which model type
/// a fresh tile/layer starts out with.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModelKind {
    Translation = 0,
    Rigid = 1,
    Similarity = 2,
    Affine = 3,
    Homography = 4,
}

impl ModelKind {
    pub const fn min_points(self) -> usize {
        match self {
            ModelKind::Translation => 1,
            ModelKind::Rigid | ModelKind::Similarity => 2,
            ModelKind::Affine => 3,
            ModelKind::Homography => 4,
        }
    }

    pub const fn from_index(index: u8) -> Option<Self> {
        Some(match index {
            0 => ModelKind::Translation,
            1 => ModelKind::Rigid,
            2 => ModelKind::Similarity,
            3 => ModelKind::Affine,
            4 => ModelKind::Homography,
            _ => return None,
        })
    }

    pub fn identity(self) -> Model {
        match self {
            ModelKind::Translation => Model::Translation(TranslationModel::IDENTITY),
            ModelKind::Rigid => Model::Rigid(RigidModel::IDENTITY),
            ModelKind::Similarity => Model::Similarity(SimilarityModel::IDENTITY),
            ModelKind::Affine => Model::Affine(AffineModel::IDENTITY),
            ModelKind::Homography => Model::Homography(HomographyModel::IDENTITY),
        }
    }
}

/// Canonical 6-value affine representation, `[m00, m10, m01, m11, tx, ty]`,
/// matching `x' = m00*x + m01*y + tx`, `y' = m10*x + m11*y + ty`.
pub type AffineArray = [f64; 6];

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslationModel {
    pub t: Vec2,
}

impl TranslationModel {
    pub const IDENTITY: TranslationModel = TranslationModel { t: Vec2::ZERO };

    pub fn apply(&self, p: Vec2) -> Vec2 {
        p + self.t
    }

    pub fn apply_inverse(&self, p: Vec2) -> Vec2 {
        p - self.t
    }

    pub fn affine_matrix(&self) -> AffineArray {
        [1.0, 0.0, 0.0, 1.0, self.t.x, self.t.y]
    }

    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require_min_points(matches, ModelKind::Translation)?;
        let total_weight: f64 = matches.iter().map(|m| m.weight).sum();
        if total_weight <= 0.0 {
            return Err(AlignError::NotEnoughDataPoints {
                needed: ModelKind::Translation.min_points(),
                had: 0,
            });
        }
        let sum = matches.iter().fold(Vec2::ZERO, |acc, m| acc + (m.p2.w - m.p1.l) * m.weight);
        Ok(TranslationModel { t: sum * (1.0 / total_weight) })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidModel {
    pub theta: f64,
    pub t: Vec2,
}

impl RigidModel {
    pub const IDENTITY: RigidModel = RigidModel { theta: 0.0, t: Vec2::ZERO };

    pub fn apply(&self, p: Vec2) -> Vec2 {
        rotate(p, self.theta) + self.t
    }

    pub fn apply_inverse(&self, p: Vec2) -> Vec2 {
        rotate(p - self.t, -self.theta)
    }

    pub fn affine_matrix(&self) -> AffineArray {
        let (s, c) = self.theta.sin_cos();
        [c, s, -s, c, self.t.x, self.t.y]
    }

    /// Closed-form weighted Kabsch-style fit in 2D: centers both point sets
    /// on their weighted centroid, then recovers the best rotation from the
    /// cross-covariance via `atan2`, and the translation from the centroids.
    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require_min_points(matches, ModelKind::Rigid)?;
        let total_weight: f64 = matches.iter().map(|m| m.weight).sum();
        if total_weight <= 0.0 {
            return Err(AlignError::NotEnoughDataPoints { needed: 2, had: 0 });
        }

        let centroid_src =
            matches.iter().fold(Vec2::ZERO, |acc, m| acc + m.p1.l * m.weight) * (1.0 / total_weight);
        let centroid_dst =
            matches.iter().fold(Vec2::ZERO, |acc, m| acc + m.p2.w * m.weight) * (1.0 / total_weight);

        let (mut sxx, mut sxy) = (0.0, 0.0);
        for m in matches {
            let src = m.p1.l - centroid_src;
            let dst = m.p2.w - centroid_dst;
            sxx += m.weight * src.dot(dst);
            sxy += m.weight * src.cross(dst);
        }
        if sxx == 0.0 && sxy == 0.0 {
            return Err(AlignError::NotEnoughDataPoints { needed: 2, had: matches.len() });
        }

        let theta = sxy.atan2(sxx);
        let t = centroid_dst - rotate(centroid_src, theta);
        Ok(RigidModel { theta, t })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityModel {
    pub scale: f64,
    pub theta: f64,
    pub t: Vec2,
}

impl SimilarityModel {
    pub const IDENTITY: SimilarityModel = SimilarityModel { scale: 1.0, theta: 0.0, t: Vec2::ZERO };

    pub fn apply(&self, p: Vec2) -> Vec2 {
        rotate(p, self.theta) * self.scale + self.t
    }

    pub fn apply_inverse(&self, p: Vec2) -> Result<Vec2, AlignError> {
        if self.scale.abs() < 1e-12 {
            return Err(AlignError::NonInvertibleModel);
        }
        Ok(rotate((p - self.t) * (1.0 / self.scale), -self.theta))
    }

    pub fn affine_matrix(&self) -> AffineArray {
        let (s, c) = self.theta.sin_cos();
        [self.scale * c, self.scale * s, -self.scale * s, self.scale * c, self.t.x, self.t.y]
    }

    /// Treats src/dst as complex numbers: the optimal complex scale-rotation
    /// `z` minimizing `sum w |z*src_i - dst_i|^2` has a closed form in terms
    /// of the centered cross terms, same derivation as the rigid fit but
    /// without normalizing the rotation's magnitude to 1.
    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require_min_points(matches, ModelKind::Similarity)?;
        let total_weight: f64 = matches.iter().map(|m| m.weight).sum();
        if total_weight <= 0.0 {
            return Err(AlignError::NotEnoughDataPoints { needed: 2, had: 0 });
        }

        let centroid_src =
            matches.iter().fold(Vec2::ZERO, |acc, m| acc + m.p1.l * m.weight) * (1.0 / total_weight);
        let centroid_dst =
            matches.iter().fold(Vec2::ZERO, |acc, m| acc + m.p2.w * m.weight) * (1.0 / total_weight);

        let (mut sxx, mut sxy, mut s_src_sq) = (0.0, 0.0, 0.0);
        for m in matches {
            let src = m.p1.l - centroid_src;
            let dst = m.p2.w - centroid_dst;
            sxx += m.weight * src.dot(dst);
            sxy += m.weight * src.cross(dst);
            s_src_sq += m.weight * src.length_sq();
        }
        if s_src_sq < 1e-12 {
            return Err(AlignError::NotEnoughDataPoints { needed: 2, had: matches.len() });
        }

        let a = sxx / s_src_sq;
        let b = sxy / s_src_sq;
        let scale = (a * a + b * b).sqrt();
        let theta = b.atan2(a);
        let t = centroid_dst - rotate(centroid_src, theta) * scale;
        Ok(SimilarityModel { scale, theta, t })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffineModel {
    pub m: AffineArray,
}

impl AffineModel {
    pub const IDENTITY: AffineModel = AffineModel { m: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0] };

    pub fn apply(&self, p: Vec2) -> Vec2 {
        let [m00, m10, m01, m11, tx, ty] = self.m;
        Vec2::new(m00 * p.x + m01 * p.y + tx, m10 * p.x + m11 * p.y + ty)
    }

    pub fn apply_inverse(&self, p: Vec2) -> Result<Vec2, AlignError> {
        let [m00, m10, m01, m11, tx, ty] = self.m;
        let rel = Vec2::new(p.x - tx, p.y - ty);
        solve2x2([[m00, m01], [m10, m11]], [rel.x, rel.y])
            .map(Vec2::from_array)
            .ok_or(AlignError::NonInvertibleModel)
    }

    pub const fn affine_matrix(&self) -> AffineArray {
        self.m
    }

    /// Composes `self` with `other` such that the result first applies
    /// `other`, then `self` (`self.compose(other).apply(p) == self.apply(other.apply(p))`).
    pub fn compose(&self, other: &AffineModel) -> AffineModel {
        let [a00, a10, a01, a11, atx, aty] = self.m;
        let [b00, b10, b01, b11, btx, bty] = other.m;
        AffineModel {
            m: [
                a00 * b00 + a01 * b10,
                a10 * b00 + a11 * b10,
                a00 * b01 + a01 * b11,
                a10 * b01 + a11 * b11,
                a00 * btx + a01 * bty + atx,
                a10 * btx + a11 * bty + aty,
            ],
        }
    }

    /// `self.preconcatenate(other)` applies `self` first, then `other`.
    pub fn preconcatenate(&self, other: &AffineModel) -> AffineModel {
        other.compose(self)
    }

    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require_min_points(matches, ModelKind::Affine)?;
        // Two independent weighted least-squares fits:
        //   x' = a*x + b*y + c
        //   y' = d*x + e*y + f
        // Normal equations share the same 3x3 design matrix (built from src
        // points only), with separate right-hand sides for x' and y'.
        let mut ata = vec![vec![0.0; 3]; 3];
        let mut atbx = vec![0.0; 3];
        let mut atby = vec![0.0; 3];

        for m in matches {
            let row = [m.p1.l.x, m.p1.l.y, 1.0];
            for (i, &ri) in row.iter().enumerate() {
                for (j, &rj) in row.iter().enumerate() {
                    ata[i][j] += m.weight * ri * rj;
                }
                atbx[i] += m.weight * ri * m.p2.w.x;
                atby[i] += m.weight * ri * m.p2.w.y;
            }
        }

        let had = matches.len();
        let x_coeffs = solve_linear(ata.clone(), atbx)
            .ok_or(AlignError::NotEnoughDataPoints { needed: 3, had })?;
        let y_coeffs =
            solve_linear(ata, atby).ok_or(AlignError::NotEnoughDataPoints { needed: 3, had })?;

        Ok(AffineModel {
            m: [x_coeffs[0], y_coeffs[0], x_coeffs[1], y_coeffs[1], x_coeffs[2], y_coeffs[2]],
        })
    }
}

/// Row-major 3x3 projective transform, `h[6]*x + h[7]*y + h[8]` as the
/// homogeneous divisor.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomographyModel {
    pub h: [f64; 9],
}

impl HomographyModel {
    pub const IDENTITY: HomographyModel =
        HomographyModel { h: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0] };

    pub fn apply(&self, p: Vec2) -> Vec2 {
        let h = self.h;
        let w = h[6] * p.x + h[7] * p.y + h[8];
        Vec2::new((h[0] * p.x + h[1] * p.y + h[2]) / w, (h[3] * p.x + h[4] * p.y + h[5]) / w)
    }

    pub fn apply_inverse(&self, p: Vec2) -> Result<Vec2, AlignError> {
        self.inverse().ok_or(AlignError::NonInvertibleModel).map(|inv| inv.apply(p))
    }

    fn determinant(&self) -> f64 {
        let h = self.h;
        h[0] * (h[4] * h[8] - h[5] * h[7]) - h[1] * (h[3] * h[8] - h[5] * h[6])
            + h[2] * (h[3] * h[7] - h[4] * h[6])
    }

    fn inverse(&self) -> Option<HomographyModel> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let h = self.h;
        let adj = [
            h[4] * h[8] - h[5] * h[7],
            h[2] * h[7] - h[1] * h[8],
            h[1] * h[5] - h[2] * h[4],
            h[5] * h[6] - h[3] * h[8],
            h[0] * h[8] - h[2] * h[6],
            h[2] * h[3] - h[0] * h[5],
            h[3] * h[7] - h[4] * h[6],
            h[1] * h[6] - h[0] * h[7],
            h[0] * h[4] - h[1] * h[3],
        ];
        Some(HomographyModel { h: adj.map(|v| v / det) })
    }

    /// Direct linear transform: solves the homogeneous `Ah = 0` system under
    /// the normalization `h[8] = 1`, i.e. an 8-unknown weighted least-squares
    /// solve of `Ah' = b`.
    fn fit(matches: &[PointMatch]) -> Result<Self, AlignError> {
        require_min_points(matches, ModelKind::Homography)?;
        let mut ata = vec![vec![0.0; 8]; 8];
        let mut atb = vec![0.0; 8];

        for m in matches {
            let (x, y) = (m.p1.l.x, m.p1.l.y);
            let (xp, yp) = (m.p2.w.x, m.p2.w.y);
            // x' * (h6*x + h7*y + 1) = h0*x + h1*y + h2
            // y' * (h6*x + h7*y + 1) = h3*x + h4*y + h5
            let row_x = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
            let row_y = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
            for row in [(&row_x, xp), (&row_y, yp)] {
                let (coeffs, rhs) = row;
                for (i, &ci) in coeffs.iter().enumerate() {
                    for (j, &cj) in coeffs.iter().enumerate() {
                        ata[i][j] += m.weight * ci * cj;
                    }
                    atb[i] += m.weight * ci * rhs;
                }
            }
        }

        let had = matches.len();
        let sol = solve_linear(ata, atb)
            .ok_or(AlignError::NotEnoughDataPoints { needed: 4, had })?;
        let mut h = [0.0; 9];
        h[..8].copy_from_slice(&sol);
        h[8] = 1.0;
        Ok(HomographyModel { h })
    }
}

fn rotate(p: Vec2, theta: f64) -> Vec2 {
    let (s, c) = theta.sin_cos();
    Vec2::new(p.x * c - p.y * s, p.x * s + p.y * c)
}

fn require_min_points(matches: &[PointMatch], kind: ModelKind) -> Result<(), AlignError> {
    let needed = kind.min_points();
    if matches.len() < needed {
        return Err(AlignError::NotEnoughDataPoints { needed, had: matches.len() });
    }
    Ok(())
}

/// The tagged-variant stand-in for the transform class hierarchy.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Model {
    Translation(TranslationModel),
    Rigid(RigidModel),
    Similarity(SimilarityModel),
    Affine(AffineModel),
    Homography(HomographyModel),
}

impl Model {
    pub const fn kind(&self) -> ModelKind {
        match self {
            Model::Translation(_) => ModelKind::Translation,
            Model::Rigid(_) => ModelKind::Rigid,
            Model::Similarity(_) => ModelKind::Similarity,
            Model::Affine(_) => ModelKind::Affine,
            Model::Homography(_) => ModelKind::Homography,
        }
    }

    pub fn identity(kind: ModelKind) -> Model {
        kind.identity()
    }

    pub fn fit(kind: ModelKind, matches: &[PointMatch]) -> Result<Model, AlignError> {
        Ok(match kind {
            ModelKind::Translation => Model::Translation(TranslationModel::fit(matches)?),
            ModelKind::Rigid => Model::Rigid(RigidModel::fit(matches)?),
            ModelKind::Similarity => Model::Similarity(SimilarityModel::fit(matches)?),
            ModelKind::Affine => Model::Affine(AffineModel::fit(matches)?),
            ModelKind::Homography => Model::Homography(HomographyModel::fit(matches)?),
        })
    }

    pub fn apply(&self, p: Vec2) -> Vec2 {
        match self {
            Model::Translation(m) => m.apply(p),
            Model::Rigid(m) => m.apply(p),
            Model::Similarity(m) => m.apply(p),
            Model::Affine(m) => m.apply(p),
            Model::Homography(m) => m.apply(p),
        }
    }

    pub fn apply_inverse(&self, p: Vec2) -> Result<Vec2, AlignError> {
        match self {
            Model::Translation(m) => Ok(m.apply_inverse(p)),
            Model::Rigid(m) => Ok(m.apply_inverse(p)),
            Model::Similarity(m) => m.apply_inverse(p),
            Model::Affine(m) => m.apply_inverse(p),
            Model::Homography(m) => m.apply_inverse(p),
        }
    }

    /// Canonical flat parameter vector (native parameterization, not
    /// necessarily the affine array — see [`Self::as_affine`] for that).
    pub fn to_array(&self) -> Vec<f64> {
        match self {
            Model::Translation(m) => vec![m.t.x, m.t.y],
            Model::Rigid(m) => vec![m.theta, m.t.x, m.t.y],
            Model::Similarity(m) => vec![m.scale, m.theta, m.t.x, m.t.y],
            Model::Affine(m) => m.m.to_vec(),
            Model::Homography(m) => m.h.to_vec(),
        }
    }

    pub fn from_array(kind: ModelKind, a: &[f64]) -> Option<Model> {
        Some(match kind {
            ModelKind::Translation if a.len() == 2 => {
                Model::Translation(TranslationModel { t: Vec2::new(a[0], a[1]) })
            }
            ModelKind::Rigid if a.len() == 3 => {
                Model::Rigid(RigidModel { theta: a[0], t: Vec2::new(a[1], a[2]) })
            }
            ModelKind::Similarity if a.len() == 4 => Model::Similarity(SimilarityModel {
                scale: a[0],
                theta: a[1],
                t: Vec2::new(a[2], a[3]),
            }),
            ModelKind::Affine if a.len() == 6 => {
                Model::Affine(AffineModel { m: a.try_into().ok()? })
            }
            ModelKind::Homography if a.len() == 9 => {
                Model::Homography(HomographyModel { h: a.try_into().ok()? })
            }
            _ => return None,
        })
    }

    /// The canonical 6-value affine array, for every model in the
    /// affine-closed family. `None` for [`Model::Homography`], which isn't
    /// representable as a 2x3 affine map.
    pub fn as_affine(&self) -> Option<AffineModel> {
        Some(AffineModel {
            m: match self {
                Model::Translation(m) => m.affine_matrix(),
                Model::Rigid(m) => m.affine_matrix(),
                Model::Similarity(m) => m.affine_matrix(),
                Model::Affine(m) => m.affine_matrix(),
                Model::Homography(_) => return None,
            },
        })
    }

    /// Mean transfer error: the weighted mean distance between `apply(p1.l)`
    /// and the match's target `p2.w`.
    pub fn cost(&self, matches: &[PointMatch]) -> f64 {
        if matches.is_empty() {
            return 0.0;
        }
        let total_weight: f64 = matches.iter().map(|m| m.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        matches.iter().map(|m| m.weight * self.apply(m.p1.l).distance(m.p2.w)).sum::<f64>()
            / total_weight
    }
}

/// Largest integer `L` with `2^L <= 1/scale` (SPEC_FULL.md §4.A, §8).
pub fn best_mipmap_level(scale: f64) -> i32 {
    if scale <= 0.0 {
        return 0;
    }
    (-scale.log2()).floor() as i32
}

/// The affine re-anchoring transform for mip level `level`:
/// `(2^L, 0, 0, 2^L, (2^L - 1)/2, (2^L - 1)/2)`.
pub fn create_scale_level_transform(level: i32) -> AffineModel {
    let s = 2f64.powi(level);
    let offset = (s - 1.0) / 2.0;
    AffineModel { m: [s, 0.0, 0.0, s, offset, offset] }
}

#[cfg(test)]
mod tests {
    use assertables::assert_in_delta;
    use test_case::test_case;

    use super::*;

    fn weighted(pairs: &[(Vec2, Vec2)]) -> Vec<PointMatch> {
        pairs.iter().map(|&(l, w)| PointMatch::new(Point_at(l), Point_at(w), 1.0)).collect()
    }

    #[allow(non_snake_case)]
    fn Point_at(l: Vec2) -> crate::geom::Point {
        // p2 uses its world coordinate as the fit target; p1 uses its local.
        crate::geom::Point::at_rest(l)
    }

    #[test]
    fn translation_fit_recovers_exact_shift() {
        let shift = Vec2::new(3.5, -2.0);
        let matches: Vec<PointMatch> = (0..5)
            .map(|i| {
                let l = Vec2::new(i as f64, (i * 2) as f64);
                PointMatch::new(
                    crate::geom::Point::at_rest(l),
                    crate::geom::Point::at_rest(l + shift),
                    1.0,
                )
            })
            .collect();
        let model = TranslationModel::fit(&matches).unwrap();
        assert_in_delta!(model.t.x, shift.x, 1e-9);
        assert_in_delta!(model.t.y, shift.y, 1e-9);
    }

    #[test]
    fn translation_fit_fails_below_min_points() {
        let err = TranslationModel::fit(&[]).unwrap_err();
        assert!(matches!(err, AlignError::NotEnoughDataPoints { needed: 1, had: 0 }));
    }

    #[test]
    fn rigid_fit_recovers_rotation_and_translation() {
        let theta = 0.3;
        let t = Vec2::new(10.0, -4.0);
        let pts = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(2.0, 3.0)];
        let matches: Vec<PointMatch> = pts
            .iter()
            .map(|&l| {
                let w = rotate(l, theta) + t;
                PointMatch::new(crate::geom::Point::at_rest(l), crate::geom::Point::at_rest(w), 1.0)
            })
            .collect();
        let model = RigidModel::fit(&matches).unwrap();
        assert_in_delta!(model.theta, theta, 1e-9);
        assert_in_delta!(model.t.x, t.x, 1e-9);
        assert_in_delta!(model.t.y, t.y, 1e-9);
    }

    #[test]
    fn affine_fit_recovers_exact_map() {
        let m = AffineModel { m: [1.2, 0.1, -0.2, 0.9, 5.0, -3.0] };
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(4.0, 7.0),
            Vec2::new(-2.0, 3.0),
        ];
        let matches: Vec<PointMatch> = pts
            .iter()
            .map(|&l| {
                let w = m.apply(l);
                PointMatch::new(crate::geom::Point::at_rest(l), crate::geom::Point::at_rest(w), 1.0)
            })
            .collect();
        let fitted = AffineModel::fit(&matches).unwrap();
        for i in 0..6 {
            assert_in_delta!(fitted.m[i], m.m[i], 1e-7);
        }
    }

    #[test]
    fn affine_compose_matches_function_composition() {
        let a = AffineModel { m: [1.0, 0.0, 0.0, 1.0, 1.0, 2.0] };
        let b = AffineModel { m: [2.0, 0.0, 0.0, 2.0, 0.0, 0.0] };
        let composed = a.compose(&b);
        let p = Vec2::new(3.0, 4.0);
        let direct = a.apply(b.apply(p));
        let via_compose = composed.apply(p);
        assert_in_delta!(direct.x, via_compose.x, 1e-9);
        assert_in_delta!(direct.y, via_compose.y, 1e-9);
    }

    #[test]
    fn affine_inverse_round_trips() {
        let m = AffineModel { m: [1.2, 0.1, -0.2, 0.9, 5.0, -3.0] };
        let p = Vec2::new(12.0, -7.0);
        let round_tripped = m.apply_inverse(m.apply(p)).unwrap();
        assert_in_delta!(round_tripped.x, p.x, 1e-9);
        assert_in_delta!(round_tripped.y, p.y, 1e-9);
    }

    #[test]
    fn affine_fit_below_min_points_reports_not_enough() {
        let _ = weighted(&[]);
        let err = AffineModel::fit(&[]).unwrap_err();
        assert!(matches!(err, AlignError::NotEnoughDataPoints { needed: 3, .. }));
    }

    #[test]
    fn homography_fit_recovers_exact_map() {
        let h = HomographyModel { h: [1.0, 0.1, 2.0, -0.05, 1.0, 1.0, 0.001, 0.0005, 1.0] };
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(0.0, 10.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(5.0, 3.0),
        ];
        let matches: Vec<PointMatch> = pts
            .iter()
            .map(|&l| {
                let w = h.apply(l);
                PointMatch::new(crate::geom::Point::at_rest(l), crate::geom::Point::at_rest(w), 1.0)
            })
            .collect();
        let fitted = HomographyModel::fit(&matches).unwrap();
        let p = Vec2::new(3.0, 4.0);
        let expected = h.apply(p);
        let actual = fitted.apply(p);
        assert_in_delta!(actual.x, expected.x, 1e-6);
        assert_in_delta!(actual.y, expected.y, 1e-6);
    }

    #[test_case(1.0, 0)]
    #[test_case(0.5, 1)]
    #[test_case(0.25, 2)]
    #[test_case(0.1, 3)]
    fn best_mipmap_level_matches_spec_table(scale: f64, expected: i32) {
        assert_eq!(best_mipmap_level(scale), expected);
    }

    #[test]
    fn create_scale_level_transform_matches_formula() {
        for level in 0..4 {
            let t = create_scale_level_transform(level);
            let s = 2f64.powi(level);
            let offset = (s - 1.0) / 2.0;
            assert_eq!(t.m, [s, 0.0, 0.0, s, offset, offset]);
        }
    }
}
