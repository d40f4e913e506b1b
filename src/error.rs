//! Custom error types for the sweep engine.
//!
//! This module defines the primary error type, `SweepError`, shared by the
//! loop-control and data-recording halves of the crate. Using the `thiserror`
//! crate, it provides a centralized and consistent way to handle the failure
//! modes the engine can produce.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Semantically invalid sweep or run parameters that pass
//!   parsing but are logically wrong (e.g., a linear sweep with fewer than
//!   two points). Raised at construction time, before a run starts.
//! - **`Range`**: A write request whose end position or chunk length falls
//!   outside the target dataset. The writer validates the entire request
//!   before touching the array, so a `Range` error guarantees the dataset
//!   is unchanged.
//! - **`RunActive`**: An attempt to start a measurement run on a controller
//!   that is already driving one, or to reconfigure it mid-run.
//! - **`Storage`** / **`Csv`**: I/O failures from the flush sinks.
//! - **`FeatureNotEnabled`**: A sink was requested whose backend was
//!   compiled out (e.g. `storage_csv`).
//! - **`Instrument`**: Pass-through for errors raised by instrument
//!   collaborators. The engine never retries these; they terminate the
//!   active run and surface to the caller unchanged.
//!
//! Pause, resume, and stop requests are advisory signals and never produce
//! errors, so they have no representation here.

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Errors produced by sweep construction, loop control, and data recording.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Invalid sweep or run configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Write position or chunk length outside the dataset bounds.
    #[error("Range error: {0}")]
    Range(String),

    /// A run is already active on this controller.
    #[error("A measurement run is already active on this controller")]
    RunActive,

    /// I/O failure while flushing to persistent storage.
    #[error("Storage I/O error: {0}")]
    Storage(#[from] std::io::Error),

    /// CSV serialization failure in the CSV flush sink.
    #[cfg(feature = "storage_csv")]
    #[error("CSV storage error: {0}")]
    Csv(#[from] csv::Error),

    /// Use of functionality compiled out by a disabled cargo feature.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// Error propagated from an instrument collaborator.
    #[error("Instrument error: {0}")]
    Instrument(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SweepError::Config("linear sweep requires at least 2 points".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: linear sweep requires at least 2 points"
        );
    }

    #[test]
    fn test_instrument_passthrough() {
        let inner = anyhow::anyhow!("detector timeout");
        let err = SweepError::from(inner);
        assert!(err.to_string().contains("detector timeout"));
    }
}
