//! Sweep sources: finite, restartable sequences of control values.
//!
//! A [`SweepSource`] drives one axis of a measurement. It is created once per
//! measurement configuration and is immutable during a run: every call to
//! [`SweepSource::values`] restarts the sequence from the first value and has
//! no side effects on the source itself.
//!
//! Three variants are provided:
//!
//! - [`LinearSweep`]: an arithmetic progression from `start` to `stop` over a
//!   fixed number of points.
//! - [`TimeSweep`]: yields the point indices `0..points`, sleeping a fixed
//!   interval between successive values. The sleep is a plain blocking wait
//!   and cannot be interrupted; see the loop-level documentation for how stop
//!   requests interact with it.
//! - [`ListSweep`]: an explicit list of setpoints for non-uniform axes.
//!
//! Sweep parameters are validated at construction; a source that constructs
//! successfully always produces exactly `len()` values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SweepError, SweepResult};

/// A finite, ordered, restartable sequence of numeric control values.
///
/// `len()` is fixed for the lifetime of the source. `values()` returns a
/// fresh iterator positioned at the first value; iterating never mutates
/// the source.
pub trait SweepSource: Send {
    /// Number of values the sweep produces.
    fn len(&self) -> usize;

    /// Returns true if the sweep produces no values.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a new pass over the sweep values.
    fn values(&self) -> Box<dyn Iterator<Item = f64> + Send + '_>;

    /// Serializable description of this sweep for run metadata.
    fn describe(&self) -> SweepDescriptor;
}

/// Serializable summary of a sweep, recorded alongside acquired data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepDescriptor {
    /// Arithmetic progression.
    Linear {
        /// First value of the progression.
        start: f64,
        /// Last value of the progression.
        stop: f64,
        /// Number of points, including both endpoints.
        points: usize,
    },
    /// Index sequence paced by a fixed delay.
    Timed {
        /// Delay inserted between successive values.
        #[serde(with = "humantime_serde")]
        interval: Duration,
        /// Number of indices yielded.
        points: usize,
    },
    /// Explicit setpoint list.
    List {
        /// Number of setpoints.
        points: usize,
    },
}

// =============================================================================
// LinearSweep
// =============================================================================

/// Arithmetic progression from `start` to `stop` with `points` values.
///
/// The step is `(stop - start) / (points - 1)`, so both endpoints are
/// included. Construction fails with [`SweepError::Config`] when fewer than
/// two points are requested or an endpoint is not finite.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearSweep {
    start: f64,
    stop: f64,
    points: usize,
    step: f64,
}

impl LinearSweep {
    /// Creates a linear sweep over `[start, stop]` with `points` values.
    pub fn new(start: f64, stop: f64, points: usize) -> SweepResult<Self> {
        if points < 2 {
            return Err(SweepError::Config(format!(
                "linear sweep requires at least 2 points, got {points}"
            )));
        }
        if !start.is_finite() || !stop.is_finite() {
            return Err(SweepError::Config(format!(
                "linear sweep endpoints must be finite, got start={start}, stop={stop}"
            )));
        }
        let step = (stop - start) / (points - 1) as f64;
        Ok(Self {
            start,
            stop,
            points,
            step,
        })
    }

    /// The constant difference between successive values.
    pub fn step(&self) -> f64 {
        self.step
    }

    fn value_at(&self, index: usize) -> f64 {
        self.start + self.step * index as f64
    }
}

impl SweepSource for LinearSweep {
    fn len(&self) -> usize {
        self.points
    }

    fn values(&self) -> Box<dyn Iterator<Item = f64> + Send + '_> {
        Box::new((0..self.points).map(|i| self.value_at(i)))
    }

    fn describe(&self) -> SweepDescriptor {
        SweepDescriptor::Linear {
            start: self.start,
            stop: self.stop,
            points: self.points,
        }
    }
}

// =============================================================================
// TimeSweep
// =============================================================================

/// Index sequence `0..points` with a blocking inter-value delay.
///
/// The first value is yielded immediately; each subsequent value is preceded
/// by `std::thread::sleep(interval)`. The sleep is not cancellable: a stop
/// request issued while it is in progress takes effect only after the wait
/// returns and the following checkpoint is reached.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSweep {
    interval: Duration,
    points: usize,
}

impl TimeSweep {
    /// Creates a timed sweep of `points` indices paced by `interval`.
    pub fn new(interval: Duration, points: usize) -> SweepResult<Self> {
        if points == 0 {
            return Err(SweepError::Config(
                "timed sweep requires at least 1 point".to_string(),
            ));
        }
        Ok(Self { interval, points })
    }

    /// The delay inserted between successive values.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl SweepSource for TimeSweep {
    fn len(&self) -> usize {
        self.points
    }

    fn values(&self) -> Box<dyn Iterator<Item = f64> + Send + '_> {
        let interval = self.interval;
        Box::new((0..self.points).map(move |i| {
            if i > 0 {
                std::thread::sleep(interval);
            }
            i as f64
        }))
    }

    fn describe(&self) -> SweepDescriptor {
        SweepDescriptor::Timed {
            interval: self.interval,
            points: self.points,
        }
    }
}

// =============================================================================
// ListSweep
// =============================================================================

/// Sweep over an explicit, possibly non-uniform list of setpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct ListSweep {
    values: Vec<f64>,
}

impl ListSweep {
    /// Creates a sweep over the given setpoints.
    ///
    /// The list must be non-empty and every entry finite.
    pub fn new(values: Vec<f64>) -> SweepResult<Self> {
        if values.is_empty() {
            return Err(SweepError::Config(
                "list sweep requires at least 1 value".to_string(),
            ));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(SweepError::Config(format!(
                "list sweep values must be finite, got {bad}"
            )));
        }
        Ok(Self { values })
    }
}

impl SweepSource for ListSweep {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn values(&self) -> Box<dyn Iterator<Item = f64> + Send + '_> {
        Box::new(self.values.iter().copied())
    }

    fn describe(&self) -> SweepDescriptor {
        SweepDescriptor::List {
            points: self.values.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Instant;

    #[test]
    fn test_linear_sweep_endpoints_and_step() {
        let sweep = LinearSweep::new(-1.0, 2.0, 7).unwrap();
        let values: Vec<f64> = sweep.values().collect();

        assert_eq!(values.len(), 7);
        assert_relative_eq!(values[0], -1.0);
        assert_relative_eq!(values[6], 2.0, epsilon = 1e-12);
        for pair in values.windows(2) {
            assert_relative_eq!(pair[1] - pair[0], 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_linear_sweep_restarts_from_first_value() {
        let sweep = LinearSweep::new(0.0, 10.0, 11).unwrap();
        let first: Vec<f64> = sweep.values().collect();
        let second: Vec<f64> = sweep.values().collect();
        assert_eq!(first, second);
        assert_relative_eq!(first[0], 0.0);
    }

    #[test]
    fn test_linear_sweep_rejects_short_and_nonfinite() {
        assert!(matches!(
            LinearSweep::new(0.0, 1.0, 1),
            Err(SweepError::Config(_))
        ));
        assert!(matches!(
            LinearSweep::new(f64::NAN, 1.0, 5),
            Err(SweepError::Config(_))
        ));
    }

    #[test]
    fn test_time_sweep_yields_indices_with_delay() {
        let sweep = TimeSweep::new(Duration::from_millis(5), 3).unwrap();
        let begin = Instant::now();
        let values: Vec<f64> = sweep.values().collect();
        let elapsed = begin.elapsed();

        assert_eq!(values, vec![0.0, 1.0, 2.0]);
        // Two inter-value waits of 5 ms each.
        assert!(elapsed >= Duration::from_millis(10));
    }

    #[test]
    fn test_time_sweep_rejects_zero_points() {
        assert!(matches!(
            TimeSweep::new(Duration::from_millis(1), 0),
            Err(SweepError::Config(_))
        ));
    }

    #[test]
    fn test_list_sweep_preserves_order() {
        let sweep = ListSweep::new(vec![3.0, 1.0, 2.0]).unwrap();
        let values: Vec<f64> = sweep.values().collect();
        assert_eq!(values, vec![3.0, 1.0, 2.0]);
        assert_eq!(sweep.len(), 3);
    }

    #[test]
    fn test_list_sweep_rejects_empty_and_nan() {
        assert!(matches!(
            ListSweep::new(Vec::new()),
            Err(SweepError::Config(_))
        ));
        assert!(matches!(
            ListSweep::new(vec![0.0, f64::INFINITY]),
            Err(SweepError::Config(_))
        ));
    }

    #[test]
    fn test_descriptors_serialize() {
        let sweep = LinearSweep::new(0.0, 1.0, 2).unwrap();
        let json = serde_json::to_value(sweep.describe()).unwrap();
        assert_eq!(json["kind"], "linear");
        assert_eq!(json["points"], 2);
    }
}
