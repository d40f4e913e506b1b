//! Run metadata structures and handling.
//!
//! Every recorded dataset is only as useful as the context stored next to
//! it. [`RunMetadata`] captures that context for one measurement run:
//! what was swept (axis names and sweep descriptions, outermost first),
//! what was measured, the dataset geometry, free-form parameters, and
//! how the run ended. Sinks embed it next to the data (the CSV sink as
//! `# `-prefixed JSON comment lines) so a stopped run's partial array
//! still says what it was.
//!
//! A [`RunMetadataBuilder`] assembles the document step by step; the run
//! orchestrator fills the axis and shape fields itself and stamps the
//! outcome when the run ends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sweep::SweepDescriptor;

/// One swept axis: level name plus its sweep description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AxisMetadata {
    /// Loop level name, doubling as the coordinate column name in sinks.
    pub name: String,
    /// The sweep that drives this axis.
    pub sweep: SweepDescriptor,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every point of every level was visited.
    Completed,
    /// A stop request ended the run early; unvisited cells hold the fill.
    Stopped,
}

/// Context document stored alongside one run's dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Short name of the run.
    pub run_name: String,
    /// Free-text description of what was measured and why.
    pub description: String,
    /// Swept axes, outermost first.
    pub axes: Vec<AxisMetadata>,
    /// Name of the detector channel that produced the values.
    pub detector: String,
    /// Dataset shape; equals the loop shape plus any trailing sample axis.
    pub shape: Vec<usize>,
    /// Value cells hold until written.
    pub fill_value: f64,
    /// User-defined parameters (sample ID, cooldown, ...).
    pub parameters: HashMap<String, serde_json::Value>,
    /// Environmental conditions (e.g., temperature, humidity).
    pub environment: HashMap<String, f64>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended, once it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// How the run ended, once it has.
    pub outcome: Option<RunOutcome>,
    /// Cells actually written, for cross-checking partial runs.
    pub cells_written: usize,
    /// Version of the sweep engine that recorded the data.
    pub software_version: String,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            run_name: "unnamed run".to_string(),
            description: String::new(),
            axes: Vec::new(),
            detector: String::new(),
            shape: Vec::new(),
            fill_value: f64::NAN,
            parameters: HashMap::new(),
            environment: HashMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            cells_written: 0,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RunMetadata {
    /// Validates the metadata.
    pub fn validate(&self) -> Result<(), String> {
        if self.run_name.is_empty() {
            return Err("Run name cannot be empty.".to_string());
        }
        Ok(())
    }

    /// Stamps the end time and outcome.
    pub fn mark_finished(&mut self, outcome: RunOutcome, cells_written: usize) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
        self.cells_written = cells_written;
    }
}

/// A builder for constructing `RunMetadata` instances.
#[derive(Default)]
pub struct RunMetadataBuilder {
    inner: RunMetadata,
}

impl RunMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_name(mut self, name: &str) -> Self {
        self.inner.run_name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.inner.description = description.to_string();
        self
    }

    pub fn axis(mut self, name: &str, sweep: SweepDescriptor) -> Self {
        self.inner.axes.push(AxisMetadata {
            name: name.to_string(),
            sweep,
        });
        self
    }

    pub fn detector(mut self, name: &str) -> Self {
        self.inner.detector = name.to_string();
        self
    }

    pub fn shape(mut self, shape: Vec<usize>) -> Self {
        self.inner.shape = shape;
        self
    }

    pub fn fill_value(mut self, fill: f64) -> Self {
        self.inner.fill_value = fill;
        self
    }

    pub fn parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.inner.parameters.insert(key.to_string(), value);
        self
    }

    pub fn environment(mut self, key: &str, value: f64) -> Self {
        self.inner.environment.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> RunMetadata {
        self.inner
    }
}
