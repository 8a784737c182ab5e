//! Run report artifact (SPEC_FULL.md §10.4): a JSON summary of timings,
//! convergence stats and dropped-match counts, written once per run —
//! including canceled runs, so a canceled run is still diagnosable.

use std::{fs, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::AlignmentParams, error::AlignError, mesh::MeshOptimizerStats, tile::TileOptimizerStats};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub duration_ms: u128,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum RunStatus {
    Success,
    Canceled,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub params: AlignmentParams,
    pub phases: Vec<PhaseTiming>,
    pub tile_configuration: Option<TileOptimizerStats>,
    pub spring_mesh: Option<MeshOptimizerStats>,
    pub dropped_out_of_mesh_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RunReport {
    pub fn new(params: AlignmentParams, generated_at: DateTime<Utc>) -> Self {
        RunReport {
            generated_at,
            status: RunStatus::Success,
            params,
            phases: Vec::new(),
            tile_configuration: None,
            spring_mesh: None,
            dropped_out_of_mesh_matches: 0,
            error_message: None,
        }
    }

    pub fn record_phase(&mut self, phase: &str, duration: Duration) {
        self.phases.push(PhaseTiming { phase: phase.to_string(), duration_ms: duration.as_millis() });
    }

    pub fn write(&self, path: &Path) -> Result<(), AlignError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| AlignError::InputParse { path: path.to_path_buf(), source: anyhow::Error::new(e) })?;
        fs::write(path, text).map_err(|source| AlignError::Io { path: path.to_path_buf(), source })
    }
}

/// Times a phase closure and records its duration into `report` under
/// `name`, regardless of whether the closure succeeds.
pub fn timed_phase<T>(
    report: &mut RunReport,
    name: &str,
    f: impl FnOnce() -> Result<T, AlignError>,
) -> Result<T, AlignError> {
    let start = std::time::Instant::now();
    let result = f();
    report.record_phase(name, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_phase_accumulates_entries() {
        let mut report = RunReport::new(AlignmentParams::default(), Utc::now());
        report.record_phase("wiring", Duration::from_millis(12));
        report.record_phase("optimize", Duration::from_millis(34));
        assert_eq!(report.phases.len(), 2);
        assert_eq!(report.phases[0].phase, "wiring");
    }
}
