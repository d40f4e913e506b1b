//! One nesting level of a multi-axis measurement sweep.
//!
//! A [`LoopLevel`] pairs a [`SweepSource`](crate::sweep::SweepSource) with the
//! cooperative control state for that axis: a pause-gate and an advisory stop
//! flag. The control thread iterates the level with [`LoopLevel::iter`]; any
//! other thread (a UI, an operator console) may pause, resume, or stop it
//! through a cloned [`LevelHandle`].
//!
//! # Suspension model
//!
//! Iteration has exactly one suspension point. After a `(position, value)`
//! pair is yielded and the caller returns for the next one, the iterator:
//!
//! 1. blocks until the pause-gate is open,
//! 2. checks — and consumes — the stop flag, ending the sequence without
//!    error when it was set,
//! 3. pulls the next value from the sweep (a [`TimeSweep`] sleeps here,
//!    uninterruptibly) and advances the position.
//!
//! A stop request therefore never interrupts a step in flight, and a stop
//! issued during a timed sweep's inter-value wait is observed only at the
//! checkpoint that follows the wait.
//!
//! # Pause semantics
//!
//! [`LevelHandle::pause`] and [`LevelHandle::resume`] are both a single
//! TOGGLE of the gate: calling either while the gate is already in the
//! requested state flips it to the opposite. This mirrors the control
//! surface of the measurement frontends this engine replaces and is kept
//! for behavioral parity. New call sites should prefer
//! [`LevelHandle::set_paused`], which is an explicit set, together with
//! [`LevelHandle::state`] for readout.
//!
//! [`TimeSweep`]: crate::sweep::TimeSweep

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::sweep::{SweepDescriptor, SweepSource};

/// Observable control state of a loop level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    /// Gate open, no stop pending; iteration proceeds.
    Running,
    /// Gate closed; iteration is blocked at the checkpoint.
    Paused,
    /// Stop latched but not yet consumed by the iterator.
    Stopping,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Running => write!(f, "running"),
            LoopState::Paused => write!(f, "paused"),
            LoopState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Control and status state shared between a level and its handles.
struct LevelShared {
    name: String,
    /// Pause-gate: `true` = open. Guarded by `opened` for blocking waits.
    gate_open: Mutex<bool>,
    opened: Condvar,
    /// Advisory stop flag; latched, consumed on check.
    stop: AtomicBool,
    /// Current position within the sweep (0-based).
    position: AtomicUsize,
    /// Most recently yielded sweep value.
    value: Mutex<f64>,
}

impl LevelShared {
    fn new(name: String) -> Self {
        Self {
            name,
            gate_open: Mutex::new(true),
            opened: Condvar::new(),
            stop: AtomicBool::new(false),
            position: AtomicUsize::new(0),
            value: Mutex::new(f64::NAN),
        }
    }

    /// Blocks the calling thread until the gate is open.
    fn wait_open(&self) {
        let mut open = self
            .gate_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .opened
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Flips the gate and wakes waiters when it opens. Returns the new state.
    fn toggle_gate(&self) -> bool {
        let mut open = self
            .gate_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *open = !*open;
        if *open {
            self.opened.notify_all();
        }
        *open
    }

    fn set_gate_open(&self, new_open: bool) {
        let mut open = self
            .gate_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let was_open = *open;
        *open = new_open;
        if new_open && !was_open {
            self.opened.notify_all();
        }
    }

    fn gate_is_open(&self) -> bool {
        *self
            .gate_open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes the stop flag, clearing it in the same operation.
    fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    fn set_value(&self, v: f64) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = v;
    }

    fn current_value(&self) -> f64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> LoopState {
        if self.stop.load(Ordering::SeqCst) {
            LoopState::Stopping
        } else if self.gate_is_open() {
            LoopState::Running
        } else {
            LoopState::Paused
        }
    }
}

/// Cloneable cross-thread control surface for one loop level.
///
/// Handles are cheap (`Arc` clones) and safe to move into UI or operator
/// threads. Control requests never fail and never block the caller beyond
/// the gate mutex; they are advisory signals observed at the level's
/// checkpoint.
#[derive(Clone)]
pub struct LevelHandle {
    shared: Arc<LevelShared>,
}

impl LevelHandle {
    /// Name of the level this handle controls.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Toggles the pause-gate (compatibility behavior).
    ///
    /// Calling `pause()` on an already-paused level RESUMES it; this is a
    /// single toggle, not an idempotent set. Prefer [`Self::set_paused`]
    /// in new code.
    pub fn pause(&self) {
        self.toggle_pause();
    }

    /// Toggles the pause-gate (compatibility behavior).
    ///
    /// Identical to [`Self::pause`]: calling `resume()` on a running level
    /// pauses it. Prefer [`Self::set_paused`] in new code.
    pub fn resume(&self) {
        self.toggle_pause();
    }

    /// Flips the pause-gate and reports whether the level is now paused.
    pub fn toggle_pause(&self) -> bool {
        let open = self.shared.toggle_gate();
        debug!(
            "loop level '{}': gate {}",
            self.shared.name,
            if open { "opened" } else { "closed" }
        );
        !open
    }

    /// Explicitly opens or closes the pause-gate.
    pub fn set_paused(&self, paused: bool) {
        self.shared.set_gate_open(!paused);
    }

    /// Latches the advisory stop flag.
    ///
    /// The flag is consumed at the next checkpoint, ending that level's
    /// sequence without error. Repeated calls before the flag is observed
    /// have no cumulative effect, and a step already in flight is never
    /// interrupted.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        debug!("loop level '{}': stop requested", self.shared.name);
    }

    /// Current control state of the level.
    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// Current position within the sweep.
    pub fn position(&self) -> usize {
        self.shared.position.load(Ordering::SeqCst)
    }

    /// Most recently yielded sweep value (NaN before the first yield).
    pub fn current_value(&self) -> f64 {
        self.shared.current_value()
    }
}

/// One loop level: a sweep plus its pause/stop control state.
///
/// The level is owned and iterated by the control thread; concurrent
/// control happens through [`LevelHandle`]s.
pub struct LoopLevel {
    sweep: Box<dyn SweepSource>,
    shared: Arc<LevelShared>,
}

impl LoopLevel {
    /// Creates a level named `name` over the given sweep.
    pub fn new(name: impl Into<String>, sweep: Box<dyn SweepSource>) -> Self {
        Self {
            sweep,
            shared: Arc::new(LevelShared::new(name.into())),
        }
    }

    /// Name of this level (used for logging and run metadata).
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of points this level's sweep produces.
    pub fn len(&self) -> usize {
        self.sweep.len()
    }

    /// Returns true if the underlying sweep yields no values.
    pub fn is_empty(&self) -> bool {
        self.sweep.is_empty()
    }

    /// Serializable description of the underlying sweep.
    pub fn describe(&self) -> SweepDescriptor {
        self.sweep.describe()
    }

    /// Returns a cloneable cross-thread control handle.
    pub fn handle(&self) -> LevelHandle {
        LevelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current position within the sweep.
    pub fn position(&self) -> usize {
        self.shared.position.load(Ordering::SeqCst)
    }

    /// Most recently yielded sweep value (NaN before the first yield).
    pub fn current_value(&self) -> f64 {
        self.shared.current_value()
    }

    /// Current control state.
    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    /// Starts a fresh pass over this level.
    ///
    /// Position is reset to 0 and the sweep restarts from its first value.
    /// The pause-gate and a stop flag latched between runs are NOT reset:
    /// a stop issued before the run begins terminates it at the first
    /// checkpoint, which is the behavior an operator aborting during setup
    /// expects.
    pub fn iter(&mut self) -> LevelIter<'_> {
        self.shared.position.store(0, Ordering::SeqCst);
        LevelIter {
            shared: Arc::clone(&self.shared),
            values: self.sweep.values(),
            started: false,
            done: false,
        }
    }
}

/// Iterator over `(position, value)` pairs of one level.
///
/// Created by [`LoopLevel::iter`]. Blocks at the per-step checkpoint while
/// the level is paused; ends early, without error, when a stop request is
/// consumed.
pub struct LevelIter<'a> {
    shared: Arc<LevelShared>,
    values: Box<dyn Iterator<Item = f64> + Send + 'a>,
    started: bool,
    done: bool,
}

impl Iterator for LevelIter<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<(usize, f64)> {
        if self.done {
            return None;
        }

        if self.started {
            // The single designated suspension point: gate first, then the
            // consumed-on-check stop flag.
            self.shared.wait_open();
            if self.shared.take_stop() {
                self.done = true;
                info!(
                    "loop level '{}' stopped at position {}",
                    self.shared.name,
                    self.shared.position.load(Ordering::SeqCst)
                );
                return None;
            }
        }

        let Some(value) = self.values.next() else {
            self.done = true;
            return None;
        };

        let position = if self.started {
            self.shared.position.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.started = true;
            0
        };
        self.shared.set_value(value);
        Some((position, value))
    }
}
