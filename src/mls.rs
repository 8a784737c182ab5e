//! Restricted moving-least-squares transform (SPEC_FULL.md §4.F): the
//! per-tile output transform, built from a layer mesh's control points and
//! evaluated with inverse-distance weighting local to each query point.

use serde::{Deserialize, Serialize};

use crate::{
    error::AlignError,
    geom::{Vec2, solve_linear},
    model::AffineModel,
};

/// One weighted control point: `l` is the pre-warp position, `w` its
/// post-warp target, `weight` a nonnegative confidence.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct Control {
    pub l: Vec2,
    pub w: Vec2,
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MlsTransform {
    alpha: f64,
    radius: f64,
    bbox_min: Vec2,
    bbox_max: Vec2,
    controls: Vec<Control>,
    fallback: Option<AffineModel>,
}

const DEFAULT_ALPHA: f64 = 2.0;

impl MlsTransform {
    /// Builds a transform restricted to `tile_bbox` inflated by `2 * median
    /// nearest-neighbor distance` across every control in `all_controls`.
    pub fn build(
        all_controls: &[Control],
        tile_bbox: (Vec2, Vec2),
        alpha: f64,
    ) -> Result<Self, AlignError> {
        let radius = 2.0 * median_nearest_neighbor_distance(all_controls);
        let (min, max) = tile_bbox;
        let inflated_min = Vec2::new(min.x - radius, min.y - radius);
        let inflated_max = Vec2::new(max.x + radius, max.y + radius);

        let restricted: Vec<Control> = all_controls
            .iter()
            .copied()
            .filter(|c| {
                c.w.x >= inflated_min.x
                    && c.w.x <= inflated_max.x
                    && c.w.y >= inflated_min.y
                    && c.w.y <= inflated_max.y
            })
            .collect();

        let fallback = fit_affine(all_controls, |_| 1.0).ok();

        if restricted.len() < 3 && fallback.is_none() {
            return Err(AlignError::NotEnoughDataPoints { needed: 3, had: restricted.len() });
        }

        Ok(MlsTransform {
            alpha,
            radius,
            bbox_min: min,
            bbox_max: max,
            controls: restricted,
            fallback,
        })
    }

    pub fn with_default_alpha(all_controls: &[Control], tile_bbox: (Vec2, Vec2)) -> Result<Self, AlignError> {
        Self::build(all_controls, tile_bbox, DEFAULT_ALPHA)
    }

    /// Evaluates the transform at `x`: exact control hits return their
    /// target directly; otherwise fits a local inverse-distance-weighted
    /// affine and applies it.
    pub fn apply(&self, x: Vec2) -> Result<Vec2, AlignError> {
        for c in &self.controls {
            if (c.l - x).length_sq() < 1e-18 {
                return Ok(c.w);
            }
        }

        if self.controls.len() < 3 {
            return self
                .fallback
                .as_ref()
                .map(|m| m.apply(x))
                .ok_or(AlignError::NotEnoughDataPoints { needed: 3, had: self.controls.len() });
        }

        let two_alpha = 2.0 * self.alpha;
        match fit_affine(&self.controls, |c| c.weight / (c.l - x).length().powf(two_alpha)) {
            Ok(local) => Ok(local.apply(x)),
            Err(_) => self
                .fallback
                .as_ref()
                .map(|m| m.apply(x))
                .ok_or(AlignError::NotEnoughDataPoints { needed: 3, had: self.controls.len() }),
        }
    }

    /// A compact serialization: `alpha radius bbox.min bbox.max n (l w
    /// weight)*n`, space-separated, matching the project's flat
    /// `dataString` convention for transform descriptors.
    pub fn to_data_string(&self) -> String {
        let mut parts = vec![
            format!("{:.17e}", self.alpha),
            format!("{:.17e}", self.radius),
            format!("{:.17e}", self.bbox_min.x),
            format!("{:.17e}", self.bbox_min.y),
            format!("{:.17e}", self.bbox_max.x),
            format!("{:.17e}", self.bbox_max.y),
            self.controls.len().to_string(),
        ];
        for c in &self.controls {
            parts.push(format!("{:.17e}", c.l.x));
            parts.push(format!("{:.17e}", c.l.y));
            parts.push(format!("{:.17e}", c.w.x));
            parts.push(format!("{:.17e}", c.w.y));
            parts.push(format!("{:.17e}", c.weight));
        }
        parts.join(" ")
    }

    pub fn from_data_string(s: &str) -> Option<Self> {
        let mut tokens = s.split_ascii_whitespace();
        let mut next_f64 = || tokens.next()?.parse::<f64>().ok();

        let alpha = next_f64()?;
        let radius = next_f64()?;
        let bbox_min = Vec2::new(next_f64()?, next_f64()?);
        let bbox_max = Vec2::new(next_f64()?, next_f64()?);
        let n: usize = tokens.next()?.parse().ok()?;

        let mut controls = Vec::with_capacity(n);
        for _ in 0..n {
            let l = Vec2::new(next_f64()?, next_f64()?);
            let w = Vec2::new(next_f64()?, next_f64()?);
            let weight = next_f64()?;
            controls.push(Control { l, w, weight });
        }

        let fallback = fit_affine(&controls, |_| 1.0).ok();
        Some(MlsTransform { alpha, radius, bbox_min, bbox_max, controls, fallback })
    }

    pub fn bbox(&self) -> (Vec2, Vec2) {
        (self.bbox_min, self.bbox_max)
    }
}

fn fit_affine(controls: &[Control], weight_fn: impl Fn(&Control) -> f64) -> Result<AffineModel, AlignError> {
    if controls.len() < 3 {
        return Err(AlignError::NotEnoughDataPoints { needed: 3, had: controls.len() });
    }

    let mut ata = vec![vec![0.0; 3]; 3];
    let mut atbx = vec![0.0; 3];
    let mut atby = vec![0.0; 3];

    for c in controls {
        let weight = weight_fn(c);
        if !weight.is_finite() || weight <= 0.0 {
            continue;
        }
        let row = [c.l.x, c.l.y, 1.0];
        for (i, &ri) in row.iter().enumerate() {
            for (j, &rj) in row.iter().enumerate() {
                ata[i][j] += weight * ri * rj;
            }
            atbx[i] += weight * ri * c.w.x;
            atby[i] += weight * ri * c.w.y;
        }
    }

    let had = controls.len();
    let x_coeffs =
        solve_linear(ata.clone(), atbx).ok_or(AlignError::NotEnoughDataPoints { needed: 3, had })?;
    let y_coeffs = solve_linear(ata, atby).ok_or(AlignError::NotEnoughDataPoints { needed: 3, had })?;

    Ok(AffineModel { m: [x_coeffs[0], y_coeffs[0], x_coeffs[1], y_coeffs[1], x_coeffs[2], y_coeffs[2]] })
}

fn median_nearest_neighbor_distance(controls: &[Control]) -> f64 {
    if controls.len() < 2 {
        return 0.0;
    }
    let mut nn_distances: Vec<f64> = controls
        .iter()
        .map(|c| {
            controls
                .iter()
                .filter(|other| (other.l - c.l).length_sq() > 1e-18)
                .map(|other| other.l.distance(c.l))
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    nn_distances.sort_by(f64::total_cmp);
    let mid = nn_distances.len() / 2;
    if nn_distances.len() % 2 == 0 {
        (nn_distances[mid - 1] + nn_distances[mid]) / 2.0
    } else {
        nn_distances[mid]
    }
}
