//! Error kinds for the alignment engine (SPEC_FULL.md §7).

use std::path::PathBuf;

use thiserror::Error;

use crate::tile::LayerIndex;

/// The engine's single fallible-operation error type.
///
/// Every public function in this crate that can fail returns
/// `Result<T, AlignError>`. The binary maps each variant to one of the exit
/// codes in SPEC_FULL.md §6.
#[derive(Error, Debug)]
pub enum AlignError {
    #[error("failed to parse {path}: {source}")]
    InputParse {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not resolve a layer for tile-spec url {url:?}")]
    MissingLayer { url: String },

    #[error("duplicate correspondence record for layer pair ({a}, {b})")]
    DuplicateCorrespondence { a: LayerIndex, b: LayerIndex },

    #[error("not enough data points to fit a model (needed {needed}, had {had})")]
    NotEnoughDataPoints { needed: usize, had: usize },

    #[error("transform is not invertible at this point")]
    NonInvertibleModel,

    #[error("spring mesh for layer {layer} collapsed (degenerate triangle)")]
    MeshCollapse { layer: LayerIndex },

    #[error("optimizer for phase {phase:?} did not converge within {max_iters} iterations")]
    ConvergenceTimeout { phase: OptimizerPhase, max_iters: usize },

    #[error("run was canceled during phase {phase:?}")]
    Canceled { phase: OptimizerPhase },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which optimizer phase an error/cancellation occurred in, for diagnostics.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OptimizerPhase {
    TileConfiguration,
    SpringMeshRelaxation,
}

impl AlignError {
    /// Maps this error to the process exit code documented in SPEC_FULL.md §6.
    pub const fn exit_code(&self) -> i32 {
        match self {
            AlignError::InputParse { .. } => 1,
            AlignError::MissingLayer { .. } => 1,
            AlignError::DuplicateCorrespondence { .. } => 1,
            AlignError::NotEnoughDataPoints { .. } => 2,
            AlignError::NonInvertibleModel => 2,
            AlignError::MeshCollapse { .. } => 2,
            AlignError::ConvergenceTimeout { .. } => 2,
            AlignError::Canceled { .. } => 2,
            AlignError::Io { .. } => 3,
        }
    }
}
