//! Simulated bench for demos and tests.
//!
//! A [`SimBench`] models a small optical/electrical bench: any number of
//! settable axes ([`SimActuator`]) and detectors ([`SimDetector`]) that
//! respond to where the axes currently sit. The response is a unit
//! Gaussian centered at the origin of all axes, so a sweep across zero
//! records a peak.
//!
//! Bench state is instance-scoped: every channel holds an `Arc` to the
//! state of the bench that created it, and two benches never interact.
//! Detectors default to noise-free output; tests that want realistic
//! jitter seed it explicitly and stay reproducible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Result};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::instrument::Channel;

/// Axis positions shared by every channel of one bench.
#[derive(Debug, Default)]
pub struct SimBenchState {
    positions: HashMap<String, f64>,
}

impl SimBenchState {
    fn set_position(&mut self, axis: &str, value: f64) {
        self.positions.insert(axis.to_string(), value);
    }

    fn position(&self, axis: &str) -> f64 {
        self.positions.get(axis).copied().unwrap_or(0.0)
    }

    /// Unit Gaussian over the distance of all axes from the origin.
    fn response(&self) -> f64 {
        let r2: f64 = self.positions.values().map(|p| p * p).sum();
        (-r2).exp()
    }
}

/// Factory for channels sharing one simulated bench.
#[derive(Clone, Default)]
pub struct SimBench {
    state: Arc<Mutex<SimBenchState>>,
}

impl SimBench {
    /// Creates a bench with all axes at the origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a settable axis on this bench, initially at 0.
    pub fn actuator(&self, name: &str) -> SimActuator {
        let actuator = SimActuator {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        };
        actuator
            .lock_state()
            .set_position(name, 0.0);
        actuator
    }

    /// Creates a noise-free detector returning `samples_per_read` samples
    /// per acquisition.
    pub fn detector(&self, name: &str, samples_per_read: usize) -> SimDetector {
        SimDetector {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            samples_per_read: samples_per_read.max(1),
            noise: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Current position of an axis, for assertions and status displays.
    pub fn position(&self, axis: &str) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position(axis)
    }
}

/// Settable axis of a [`SimBench`].
pub struct SimActuator {
    name: String,
    state: Arc<Mutex<SimBenchState>>,
}

impl SimActuator {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SimBenchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Channel for SimActuator {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&mut self) -> Result<Vec<f64>> {
        Ok(vec![self.lock_state().position(&self.name)])
    }

    fn write(&mut self, value: f64) -> Result<Vec<f64>> {
        if !value.is_finite() {
            bail!("actuator '{}' rejected non-finite setpoint {value}", self.name);
        }
        self.lock_state().set_position(&self.name, value);
        debug!("sim actuator '{}' moved to {value}", self.name);
        Ok(vec![value])
    }
}

/// Detector of a [`SimBench`].
pub struct SimDetector {
    name: String,
    state: Arc<Mutex<SimBenchState>>,
    samples_per_read: usize,
    noise: f64,
    rng: StdRng,
}

impl SimDetector {
    /// Adds uniform noise of the given amplitude, seeded for reproducibility.
    #[must_use]
    pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
        self.noise = amplitude;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Channel for SimDetector {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read(&mut self) -> Result<Vec<f64>> {
        let signal = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .response();
        let samples = (0..self.samples_per_read)
            .map(|_| {
                if self.noise > 0.0 {
                    signal + self.noise * self.rng.gen_range(-1.0..1.0)
                } else {
                    signal
                }
            })
            .collect();
        Ok(samples)
    }
}
