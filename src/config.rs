//! Layered configuration (SPEC_FULL.md §10.3): an optional TOML config file
//! supplies defaults, CLI flags always win.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::AlignError, model::ModelKind};

/// The fully resolved tuning parameters for one run, embedded verbatim in
/// the run report for reproducibility (§10.3, §10.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignmentParams {
    pub model_index: u8,
    pub layer_scale: f64,
    pub resolution_spring_mesh: u32,
    pub stiffness_spring_mesh: f64,
    pub damp_spring_mesh: f64,
    pub max_stretch_spring_mesh: f64,
    pub max_epsilon: f64,
    pub max_iterations_spring_mesh: usize,
    pub max_plateau_width_spring_mesh: usize,
    pub max_layers_distance: usize,
    pub use_legacy_optimizer: bool,
    pub threads: usize,
    pub mls_alpha: f64,
}

impl AlignmentParams {
    pub fn model_kind(&self) -> Result<ModelKind, AlignError> {
        ModelKind::from_index(self.model_index).ok_or_else(|| AlignError::InputParse {
            path: Path::new("--modelIndex").to_path_buf(),
            source: anyhow::anyhow!("modelIndex must be 0..=4, got {}", self.model_index),
        })
    }
}

impl Default for AlignmentParams {
    fn default() -> Self {
        AlignmentParams {
            model_index: 1,
            layer_scale: 0.1,
            resolution_spring_mesh: 32,
            stiffness_spring_mesh: 0.1,
            damp_spring_mesh: 0.9,
            max_stretch_spring_mesh: 2000.0,
            max_epsilon: 200.0,
            max_iterations_spring_mesh: 1000,
            max_plateau_width_spring_mesh: 200,
            max_layers_distance: 1,
            use_legacy_optimizer: false,
            threads: 0,
            mls_alpha: 2.0,
        }
    }
}

/// Every field optional: only the fields actually present in the TOML file
/// override the hardcoded default, and only when the CLI itself left that
/// flag unset (see [`resolve`]).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AlignmentParamsOverrides {
    pub model_index: Option<u8>,
    pub layer_scale: Option<f64>,
    pub resolution_spring_mesh: Option<u32>,
    pub stiffness_spring_mesh: Option<f64>,
    pub damp_spring_mesh: Option<f64>,
    pub max_stretch_spring_mesh: Option<f64>,
    pub max_epsilon: Option<f64>,
    pub max_iterations_spring_mesh: Option<usize>,
    pub max_plateau_width_spring_mesh: Option<usize>,
    pub max_layers_distance: Option<usize>,
    pub use_legacy_optimizer: Option<bool>,
    pub threads: Option<usize>,
    pub mls_alpha: Option<f64>,
}

pub fn load_config_file(path: &Path) -> Result<AlignmentParamsOverrides, AlignError> {
    let text = fs::read_to_string(path).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })?;
    toml::from_str(&text)
        .map_err(|e| AlignError::InputParse { path: path.to_path_buf(), source: anyhow::Error::new(e) })
}

/// `cli` wins over `file`, which wins over the hardcoded default.
pub fn resolve(cli: AlignmentParamsOverrides, file: AlignmentParamsOverrides) -> AlignmentParams {
    let default = AlignmentParams::default();
    macro_rules! pick {
        ($field:ident) => {
            cli.$field.or(file.$field).unwrap_or(default.$field)
        };
    }
    AlignmentParams {
        model_index: pick!(model_index),
        layer_scale: pick!(layer_scale),
        resolution_spring_mesh: pick!(resolution_spring_mesh),
        stiffness_spring_mesh: pick!(stiffness_spring_mesh),
        damp_spring_mesh: pick!(damp_spring_mesh),
        max_stretch_spring_mesh: pick!(max_stretch_spring_mesh),
        max_epsilon: pick!(max_epsilon),
        max_iterations_spring_mesh: pick!(max_iterations_spring_mesh),
        max_plateau_width_spring_mesh: pick!(max_plateau_width_spring_mesh),
        max_layers_distance: pick!(max_layers_distance),
        use_legacy_optimizer: pick!(use_legacy_optimizer),
        threads: pick!(threads),
        mls_alpha: pick!(mls_alpha),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_value_wins_over_file_value() {
        let cli = AlignmentParamsOverrides { layer_scale: Some(0.5), ..Default::default() };
        let file = AlignmentParamsOverrides { layer_scale: Some(0.2), max_epsilon: Some(50.0), ..Default::default() };
        let resolved = resolve(cli, file);
        assert_eq!(resolved.layer_scale, 0.5);
        assert_eq!(resolved.max_epsilon, 50.0);
    }

    #[test]
    fn unset_fields_fall_back_to_hardcoded_default() {
        let resolved = resolve(AlignmentParamsOverrides::default(), AlignmentParamsOverrides::default());
        assert_eq!(resolved.model_index, AlignmentParams::default().model_index);
    }
}
