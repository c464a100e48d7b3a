//! `SimulatorConfig`: the per-instance configuration surface for a
//! `FlowSimulator`, loaded from built-in defaults, optionally overridden by
//! a TOML file, and finally by CLI flags (in that order — the same
//! "defaults, then file, then flags" layering the teacher's configuration
//! crate uses).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Construction-time validation failures. These are fatal: a simulator is
/// never partially built with an invalid configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("grid_size must have 2 or 3 entries, got {0}")]
    UnsupportedDimension(usize),
    #[error("grid_size entry {axis} is {value}, but every axis must be positive")]
    NonPositiveGridSize { axis: usize, value: usize },
    #[error("x_range must have one [lower, upper] pair per grid axis ({expected}), got {got}")]
    XRangeLengthMismatch { got: usize, expected: usize },
    #[error("x_range axis {axis} has lower bound {lower} >= upper bound {upper}")]
    InvalidXRange { axis: usize, lower: f64, upper: f64 },
    #[error("rank_distribution must have one entry per grid axis ({expected}), got {got}")]
    RankDistributionLengthMismatch { got: usize, expected: usize },
    #[error("periodic_flag must have one entry per grid axis ({expected}), got {got}")]
    PeriodicFlagLengthMismatch { got: usize, expected: usize },
    #[error("ghost_size must be a positive integer, got {0}")]
    NonPositiveGhostSize { got: i64 },
    #[error("kinematic_viscosity must be non-negative, got {0}")]
    NegativeViscosity(f64),
    #[error("cfl must be in (0, 1], got {0}")]
    InvalidCfl(f64),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    NavierStokes,
    NavierStokesWithForcing,
    PassiveScalar,
}

impl Default for FlowType {
    fn default() -> Self {
        FlowType::NavierStokes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionSetting {
    Single,
    Double,
}

impl Default for PrecisionSetting {
    fn default() -> Self {
        PrecisionSetting::Double
    }
}

/// The parts of `SimulatorConfig` the TOML file may populate. Every field
/// has a default so an absent or partial config file is always valid;
/// unknown fields are ignored rather than rejected, so older simulator
/// versions can read a config file written by a newer one.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorConfigFile {
    pub grid_size: Vec<usize>,
    pub x_range: Vec<[f64; 2]>,
    pub kinematic_viscosity: f64,
    pub cfl: f64,
    pub flow_type: FlowType,
    pub with_free_stream_flow: bool,
    pub precision: PrecisionSetting,
    pub rank_distribution: Vec<i32>,
    pub periodic_flag: Vec<bool>,
    pub ghost_size: i64,
    pub master_rank: i32,
    pub full_exchange: bool,
}

impl Default for SimulatorConfigFile {
    fn default() -> Self {
        Self {
            grid_size: vec![64, 64],
            x_range: vec![[0.0, 1.0], [0.0, 1.0]],
            kinematic_viscosity: 0.01,
            cfl: 0.1,
            flow_type: FlowType::default(),
            with_free_stream_flow: false,
            precision: PrecisionSetting::default(),
            rank_distribution: vec![0, 0],
            periodic_flag: vec![false, false],
            ghost_size: 2,
            master_rank: 0,
            full_exchange: false,
        }
    }
}

/// A validated, ready-to-use simulator configuration. Only reachable through
/// [`SimulatorConfig::validate`], so every `FlowSimulator` is always built
/// from a config that has already passed every §7 `ConfigError` check.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub grid_size: Vec<usize>,
    pub x_range: Vec<[f64; 2]>,
    pub kinematic_viscosity: f64,
    pub cfl: f64,
    pub flow_type: FlowType,
    pub with_free_stream_flow: bool,
    pub precision: PrecisionSetting,
    pub rank_distribution: Vec<i32>,
    pub periodic_flag: Vec<bool>,
    pub ghost_size: usize,
    pub master_rank: i32,
    pub full_exchange: bool,
}

impl SimulatorConfig {
    pub fn dim(&self) -> usize {
        self.grid_size.len()
    }

    /// Per-axis grid spacing implied by `x_range` and `grid_size`.
    pub fn grid_spacing(&self) -> Vec<f64> {
        self.x_range
            .iter()
            .zip(self.grid_size.iter())
            .map(|(&[lo, hi], &n)| (hi - lo) / n as f64)
            .collect()
    }

    /// The ghost width a simulator should actually allocate: at least the
    /// configured `ghost_size`, and at least as wide as any kernel or
    /// interpolation support the caller plans to exercise this step.
    pub fn effective_ghost_width(&self, required_supports: &[usize]) -> usize {
        required_supports
            .iter()
            .copied()
            .fold(self.ghost_size, usize::max)
    }
}

/// Loads built-in defaults, then overlays a TOML file if `path` is given and
/// exists, then validates. Matches the teacher's "defaults, degrade
/// gracefully, validate once at the end" loading shape, except a malformed
/// file is a hard [`ConfigError`] here rather than a silent fallback — a
/// simulator's physical parameters are too load-bearing to gloss over a
/// typo.
pub fn load(path: Option<&Path>) -> Result<SimulatorConfig, ConfigError> {
    let file = match path {
        Some(p) if p.exists() => {
            let content = fs::read_to_string(p).map_err(|source| ConfigError::Io {
                path: p.to_path_buf(),
                source,
            })?;
            toml::from_str::<SimulatorConfigFile>(&content).map_err(|source| {
                ConfigError::Parse {
                    path: p.to_path_buf(),
                    source,
                }
            })?
        }
        Some(p) => {
            tracing::debug!(path = %p.display(), "config file not found, using defaults");
            SimulatorConfigFile::default()
        }
        None => SimulatorConfigFile::default(),
    };
    validate(file)
}

fn validate(file: SimulatorConfigFile) -> Result<SimulatorConfig, ConfigError> {
    let dim = file.grid_size.len();
    if dim != 2 && dim != 3 {
        return Err(ConfigError::UnsupportedDimension(dim));
    }
    for (axis, &n) in file.grid_size.iter().enumerate() {
        if n == 0 {
            return Err(ConfigError::NonPositiveGridSize { axis, value: n });
        }
    }
    if file.x_range.len() != dim {
        return Err(ConfigError::XRangeLengthMismatch {
            got: file.x_range.len(),
            expected: dim,
        });
    }
    for (axis, &[lo, hi]) in file.x_range.iter().enumerate() {
        if lo >= hi {
            return Err(ConfigError::InvalidXRange {
                axis,
                lower: lo,
                upper: hi,
            });
        }
    }
    if file.rank_distribution.len() != dim {
        return Err(ConfigError::RankDistributionLengthMismatch {
            got: file.rank_distribution.len(),
            expected: dim,
        });
    }
    if file.periodic_flag.len() != dim {
        return Err(ConfigError::PeriodicFlagLengthMismatch {
            got: file.periodic_flag.len(),
            expected: dim,
        });
    }
    if file.ghost_size <= 0 {
        return Err(ConfigError::NonPositiveGhostSize { got: file.ghost_size });
    }
    if file.kinematic_viscosity < 0.0 {
        return Err(ConfigError::NegativeViscosity(file.kinematic_viscosity));
    }
    if !(file.cfl > 0.0 && file.cfl <= 1.0) {
        return Err(ConfigError::InvalidCfl(file.cfl));
    }

    Ok(SimulatorConfig {
        grid_size: file.grid_size,
        x_range: file.x_range,
        kinematic_viscosity: file.kinematic_viscosity,
        cfl: file.cfl,
        flow_type: file.flow_type,
        with_free_stream_flow: file.with_free_stream_flow,
        precision: file.precision,
        rank_distribution: file.rank_distribution,
        periodic_flag: file.periodic_flag,
        ghost_size: file.ghost_size as usize,
        master_rank: file.master_rank,
        full_exchange: file.full_exchange,
    })
}

/// CLI-sourced overrides, applied after the TOML file layer. Only the flags
/// `fsi-bin` actually exposes are represented here.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub grid_size: Option<Vec<usize>>,
    pub ghost_size: Option<usize>,
    pub precision: Option<PrecisionSetting>,
}

impl SimulatorConfig {
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(grid_size) = &overrides.grid_size {
            self.grid_size = grid_size.clone();
        }
        if let Some(ghost_size) = overrides.ghost_size {
            self.ghost_size = ghost_size;
        }
        if let Some(precision) = overrides.precision {
            self.precision = precision;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = load(None).unwrap();
        assert_eq!(config.dim(), 2);
        assert_eq!(config.grid_spacing(), vec![1.0 / 64.0, 1.0 / 64.0]);
    }

    #[test]
    fn unsupported_dimension_is_rejected() {
        let mut file = SimulatorConfigFile::default();
        file.grid_size = vec![8];
        let err = validate(file).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedDimension(1));
    }

    #[test]
    fn zero_ghost_size_is_rejected() {
        let mut file = SimulatorConfigFile::default();
        file.ghost_size = 0;
        let err = validate(file).unwrap_err();
        assert_eq!(err, ConfigError::NonPositiveGhostSize { got: 0 });
    }

    #[test]
    fn inverted_x_range_is_rejected() {
        let mut file = SimulatorConfigFile::default();
        file.x_range = vec![[1.0, 0.0], [0.0, 1.0]];
        let err = validate(file).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidXRange { axis: 0, .. }));
    }

    #[test]
    fn toml_file_overlays_defaults_and_ignores_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.toml");
        std::fs::write(
            &path,
            r#"
            grid_size = [32, 32]
            ghost_size = 3
            unknown_field = "ignored"
            "#,
        )
        .unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.grid_size, vec![32, 32]);
        assert_eq!(config.ghost_size, 3);
        // x_range fell through from the default since the file didn't set it.
        assert_eq!(config.x_range, vec![[0.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load(Some(Path::new("/nonexistent/sim.toml"))).unwrap();
        assert_eq!(config.grid_size, vec![64, 64]);
    }

    #[test]
    fn effective_ghost_width_grows_to_cover_required_support() {
        let config = load(None).unwrap();
        assert_eq!(config.effective_ghost_width(&[1]), config.ghost_size);
        assert_eq!(config.effective_ghost_width(&[config.ghost_size + 5]), config.ghost_size + 5);
    }
}
