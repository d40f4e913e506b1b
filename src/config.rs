//! Configuration system using Figment.
//!
//! Settings are loaded from:
//! 1. a TOML file (`sweep_daq.toml` by default)
//! 2. environment variables (prefixed with `SWEEPDAQ_`)
//!
//! Every field has a default, so the engine runs a simulated demo sweep
//! with no file present at all.
//!
//! # Environment Variable Overrides
//!
//! Environment variables with the `SWEEPDAQ_` prefix can override
//! configuration values:
//!
//! ```text
//! SWEEPDAQ_APPLICATION_LOG_LEVEL=debug
//! SWEEPDAQ_STORAGE_BACKEND=raw
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SweepResult;
use crate::sweep::{LinearSweep, ListSweep, SweepSource, TimeSweep};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Run orchestration settings
    pub run: RunSettings,
    /// Flush sink settings
    pub storage: StorageSettings,
    /// Simulated detector settings
    pub detector: DetectorSettings,
    /// Swept axes, outermost first
    pub axes: Vec<AxisDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "sweep_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Run orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunSettings {
    /// Name recorded in the run metadata
    pub run_name: String,
    /// Fill value for unwritten dataset cells
    pub fill_value: f64,
    /// Flush the sink every N chunks (0 = final flush only)
    pub flush_every: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_name: "simulated sweep".to_string(),
            fill_value: f64::NAN,
            flush_every: 8,
        }
    }
}

/// Flush sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Sink backend: csv, raw, or none
    pub backend: String,
    /// Output directory for data files
    pub output_dir: PathBuf,
    /// File name stem; the backend picks the extension
    pub file_stem: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "csv".to_string(),
            output_dir: PathBuf::from("data"),
            file_stem: "run".to_string(),
        }
    }
}

/// Simulated detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorSettings {
    /// Detector channel name
    pub channel: String,
    /// Samples returned per read (>1 models a buffered digitizer)
    pub samples_per_read: usize,
    /// Uniform noise amplitude (0 disables)
    pub noise: f64,
    /// Noise seed, for reproducible runs
    pub seed: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            channel: "sim_pd".to_string(),
            samples_per_read: 1,
            noise: 0.0,
            seed: 0,
        }
    }
}

/// One configured sweep axis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxisDefinition {
    /// Axis name, used for the loop level and coordinate columns
    pub name: String,
    /// The sweep driving this axis
    #[serde(flatten)]
    pub sweep: SweepSpec,
}

/// Declarative sweep description, buildable into a live source.
///
/// ```toml
/// [[axes]]
/// name = "gate_v"
/// kind = "linear"
/// start = -1.0
/// stop = 1.0
/// points = 21
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepSpec {
    /// Arithmetic progression from `start` to `stop` over `points` values.
    Linear { start: f64, stop: f64, points: usize },
    /// Indices `0..points` with a blocking wait between values.
    Timed {
        #[serde(with = "humantime_serde")]
        interval: Duration,
        points: usize,
    },
    /// Explicit value list, yielded in order.
    List { values: Vec<f64> },
}

impl SweepSpec {
    /// Number of values this sweep will yield.
    pub fn points(&self) -> usize {
        match self {
            SweepSpec::Linear { points, .. } | SweepSpec::Timed { points, .. } => *points,
            SweepSpec::List { values } => values.len(),
        }
    }

    /// Builds the live sweep source, checking the parameters.
    pub fn build(&self) -> SweepResult<Box<dyn SweepSource>> {
        match self {
            SweepSpec::Linear {
                start,
                stop,
                points,
            } => Ok(Box::new(LinearSweep::new(*start, *stop, *points)?)),
            SweepSpec::Timed { interval, points } => {
                Ok(Box::new(TimeSweep::new(*interval, *points)?))
            }
            SweepSpec::List { values } => Ok(Box::new(ListSweep::new(values.clone())?)),
        }
    }
}

/// Demo axes used when no configuration file names any.
fn default_axes() -> Vec<AxisDefinition> {
    vec![
        AxisDefinition {
            name: "x".to_string(),
            sweep: SweepSpec::Linear {
                start: -2.0,
                stop: 2.0,
                points: 21,
            },
        },
        AxisDefinition {
            name: "y".to_string(),
            sweep: SweepSpec::Linear {
                start: -2.0,
                stop: 2.0,
                points: 21,
            },
        },
    ]
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `sweep_daq.toml` and environment variables
    ///
    /// Configuration is loaded in this order of precedence (highest to
    /// lowest):
    /// 1. Environment variables (`SWEEPDAQ_` prefix)
    /// 2. `sweep_daq.toml` file
    ///
    /// After loading, configuration is validated.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("sweep_daq.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SWEEPDAQ_").split("_"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        if settings.axes.is_empty() {
            settings.axes = default_axes();
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Storage backend is valid (csv, raw, none)
    /// - At least one axis is defined and axis names are unique
    /// - Each sweep's parameters build a valid source
    /// - The detector returns at least one sample per read
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_backends = ["csv", "raw", "none"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            )));
        }

        if self.axes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one axis must be defined".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for axis in &self.axes {
            if !names.insert(&axis.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate axis name: '{}'",
                    axis.name
                )));
            }
            axis.sweep.build().map_err(|e| {
                ConfigError::ValidationError(format!("Axis '{}': {e}", axis.name))
            })?;
        }

        if self.detector.samples_per_read == 0 {
            return Err(ConfigError::ValidationError(
                "detector.samples_per_read must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
