//! Nested-loop controller for multi-axis sweeps.
//!
//! A [`LoopController`] owns an ordered stack of [`LoopLevel`]s, outermost
//! first, and presents run-scoped control over the whole stack:
//!
//! - **Shape**: level lengths, outermost first, matching the axis order of
//!   the dataset the run records into.
//! - **Pause**: pause/resume act on the INNERMOST level only. The outer
//!   levels only advance when the inner ones complete a full pass, so
//!   gating the innermost level suspends the entire run at the finest
//!   granularity.
//! - **Stop**: stopping level `i` also stops every level outside it
//!   (indices `0..=i`). When the inner sequence ends early, each enclosing
//!   level consumes its own latched flag at its next checkpoint and the
//!   run unwinds cleanly from the inside out.
//! - **Run exclusivity**: at most one run may be active per controller;
//!   [`LoopController::begin_run`] hands out a [`RunGuard`] and a second
//!   call while one is live fails with [`SweepError::RunActive`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::error::{SweepError, SweepResult};
use crate::loops::level::{LevelHandle, LoopLevel, LoopState};
use crate::sweep::SweepDescriptor;

/// Ordered stack of loop levels plus run-exclusivity state.
///
/// Built once before a run by pushing levels outermost-first; iterated by
/// the control thread; controlled from other threads through a
/// [`ControllerHandle`].
pub struct LoopController {
    levels: Vec<LoopLevel>,
    active: Arc<AtomicBool>,
}

impl LoopController {
    /// Creates an empty controller.
    pub fn new() -> Self {
        Self {
            levels: Vec::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates a controller from levels ordered outermost-first.
    pub fn from_levels(levels: Vec<LoopLevel>) -> Self {
        Self {
            levels,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends the next-inner level.
    ///
    /// Levels are pushed outermost-first; the last pushed level is the
    /// innermost. Fails with [`SweepError::RunActive`] while a run is
    /// live, since the stack must not change under an iterating run.
    pub fn push_level(&mut self, level: LoopLevel) -> SweepResult<()> {
        if self.is_active() {
            return Err(SweepError::RunActive);
        }
        debug!(
            "controller: added level '{}' ({} points) at depth {}",
            level.name(),
            level.len(),
            self.levels.len()
        );
        self.levels.push(level);
        Ok(())
    }

    /// Number of nesting levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Returns true when no levels have been pushed.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level lengths, outermost first.
    pub fn shape(&self) -> Vec<usize> {
        self.levels.iter().map(LoopLevel::len).collect()
    }

    /// Total number of innermost points in a full run (product of the shape).
    pub fn total_points(&self) -> usize {
        self.levels.iter().map(LoopLevel::len).product()
    }

    /// Current position along every level, outermost first.
    pub fn position(&self) -> Vec<usize> {
        self.levels.iter().map(LoopLevel::position).collect()
    }

    /// Most recent sweep value of every level, outermost first.
    pub fn current_values(&self) -> Vec<f64> {
        self.levels.iter().map(LoopLevel::current_value).collect()
    }

    /// Name and sweep description of every level, outermost first.
    pub fn describe(&self) -> Vec<(String, SweepDescriptor)> {
        self.levels
            .iter()
            .map(|l| (l.name().to_string(), l.describe()))
            .collect()
    }

    /// Borrows a level by index (0 = outermost).
    pub fn level(&self, index: usize) -> Option<&LoopLevel> {
        self.levels.get(index)
    }

    /// Control handle for a single level.
    pub fn level_handle(&self, index: usize) -> Option<LevelHandle> {
        self.levels.get(index).map(LoopLevel::handle)
    }

    /// Mutable access to the level stack for raster iteration.
    pub(crate) fn levels_mut(&mut self) -> &mut [LoopLevel] {
        &mut self.levels
    }

    /// Toggles the pause-gate of the innermost level.
    ///
    /// See [`LevelHandle::pause`] for the toggle semantics. A controller
    /// with no levels ignores the request.
    pub fn pause(&self) {
        if let Some(level) = self.levels.last() {
            level.handle().pause();
        }
    }

    /// Toggles the pause-gate of the innermost level.
    pub fn resume(&self) {
        if let Some(level) = self.levels.last() {
            level.handle().resume();
        }
    }

    /// Explicitly pauses or resumes the innermost level.
    pub fn set_paused(&self, paused: bool) {
        if let Some(level) = self.levels.last() {
            level.handle().set_paused(paused);
        }
    }

    /// Stops level `index` and every level outside it (`0..=index`).
    ///
    /// Fails with [`SweepError::Range`] when the index names no level.
    pub fn stop_through(&self, index: usize) -> SweepResult<()> {
        if index >= self.levels.len() {
            return Err(SweepError::Range(format!(
                "stop index {} out of range for {} levels",
                index,
                self.levels.len()
            )));
        }
        info!("controller: stopping levels 0..={index}");
        for level in &self.levels[..=index] {
            level.handle().stop();
        }
        Ok(())
    }

    /// Stops every level, unwinding the whole run.
    pub fn stop_all(&self) {
        info!("controller: stopping all {} levels", self.levels.len());
        for level in &self.levels {
            level.handle().stop();
        }
    }

    /// Control state of every level, outermost first.
    pub fn states(&self) -> Vec<LoopState> {
        self.levels.iter().map(LoopLevel::state).collect()
    }

    /// Returns true while a [`RunGuard`] from this controller is live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Claims run exclusivity for this controller.
    ///
    /// Returns a guard that releases the claim when dropped. Fails with
    /// [`SweepError::RunActive`] if another guard is still live.
    pub fn begin_run(&self) -> SweepResult<RunGuard> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SweepError::RunActive);
        }
        info!(
            "controller: run started, shape {:?} ({} points)",
            self.shape(),
            self.total_points()
        );
        Ok(RunGuard {
            active: Arc::clone(&self.active),
        })
    }

    /// Cloneable cross-thread handle over the whole controller.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            levels: self.levels.iter().map(LoopLevel::handle).collect(),
            shape: self.shape(),
            active: Arc::clone(&self.active),
        }
    }
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new()
    }
}

/// Run-exclusivity token returned by [`LoopController::begin_run`].
///
/// Dropping the guard (normally or during unwinding) releases the claim.
#[must_use = "the run claim is released when the guard is dropped"]
pub struct RunGuard {
    active: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        debug!("controller: run claim released");
    }
}

/// Cloneable cross-thread control surface over a whole controller.
///
/// Mirrors the controller's pause/stop/status API for operator threads
/// that must not borrow the controller itself.
#[derive(Clone)]
pub struct ControllerHandle {
    levels: Vec<LevelHandle>,
    shape: Vec<usize>,
    active: Arc<AtomicBool>,
}

impl ControllerHandle {
    /// Level lengths, outermost first, captured when the handle was made.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of nesting levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Toggles the pause-gate of the innermost level.
    pub fn pause(&self) {
        if let Some(level) = self.levels.last() {
            level.pause();
        }
    }

    /// Toggles the pause-gate of the innermost level.
    pub fn resume(&self) {
        if let Some(level) = self.levels.last() {
            level.resume();
        }
    }

    /// Explicitly pauses or resumes the innermost level.
    pub fn set_paused(&self, paused: bool) {
        if let Some(level) = self.levels.last() {
            level.set_paused(paused);
        }
    }

    /// Stops level `index` and every level outside it.
    pub fn stop_through(&self, index: usize) -> SweepResult<()> {
        if index >= self.levels.len() {
            return Err(SweepError::Range(format!(
                "stop index {} out of range for {} levels",
                index,
                self.levels.len()
            )));
        }
        for level in &self.levels[..=index] {
            level.stop();
        }
        Ok(())
    }

    /// Stops every level.
    pub fn stop_all(&self) {
        for level in &self.levels {
            level.stop();
        }
    }

    /// Current position along every level, outermost first.
    pub fn position(&self) -> Vec<usize> {
        self.levels.iter().map(LevelHandle::position).collect()
    }

    /// Control state of every level, outermost first.
    pub fn states(&self) -> Vec<LoopState> {
        self.levels.iter().map(LevelHandle::state).collect()
    }

    /// Returns true while a run claim on the controller is live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::{LinearSweep, ListSweep};

    fn controller(shape: &[usize]) -> LoopController {
        let levels = shape
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let values: Vec<f64> = (0..n).map(|v| v as f64).collect();
                LoopLevel::new(format!("axis{i}"), Box::new(ListSweep::new(values).unwrap()))
            })
            .collect();
        LoopController::from_levels(levels)
    }

    #[test]
    fn test_shape_and_total_points() {
        let ctl = controller(&[3, 4, 5]);
        assert_eq!(ctl.depth(), 3);
        assert_eq!(ctl.shape(), vec![3, 4, 5]);
        assert_eq!(ctl.total_points(), 60);
    }

    #[test]
    fn test_push_level_orders_outermost_first() {
        let mut ctl = LoopController::new();
        ctl.push_level(LoopLevel::new(
            "outer",
            Box::new(LinearSweep::new(0.0, 1.0, 2).unwrap()),
        ))
        .unwrap();
        ctl.push_level(LoopLevel::new(
            "inner",
            Box::new(LinearSweep::new(0.0, 1.0, 5).unwrap()),
        ))
        .unwrap();
        assert_eq!(ctl.shape(), vec![2, 5]);
        let names: Vec<String> = ctl.describe().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["outer", "inner"]);
    }

    #[test]
    fn test_begin_run_is_exclusive() {
        let ctl = controller(&[2, 2]);
        let guard = ctl.begin_run().unwrap();
        assert!(ctl.is_active());
        assert!(matches!(ctl.begin_run(), Err(SweepError::RunActive)));
        drop(guard);
        assert!(!ctl.is_active());
        ctl.begin_run().unwrap();
    }

    #[test]
    fn test_push_level_rejected_while_active() {
        let mut ctl = controller(&[2]);
        let _guard = ctl.begin_run().unwrap();
        let level = LoopLevel::new("late", Box::new(LinearSweep::new(0.0, 1.0, 2).unwrap()));
        assert!(matches!(ctl.push_level(level), Err(SweepError::RunActive)));
    }

    #[test]
    fn test_stop_through_cascades_outward_only() {
        let ctl = controller(&[2, 3, 4]);
        ctl.stop_through(1).unwrap();
        assert_eq!(
            ctl.states(),
            vec![LoopState::Stopping, LoopState::Stopping, LoopState::Running]
        );
    }

    #[test]
    fn test_stop_all_latches_every_level() {
        let ctl = controller(&[2, 3]);
        ctl.stop_all();
        assert_eq!(ctl.states(), vec![LoopState::Stopping; 2]);
    }

    #[test]
    fn test_stop_through_out_of_range() {
        let ctl = controller(&[2, 3]);
        let err = ctl.stop_through(2).unwrap_err();
        assert!(matches!(err, SweepError::Range(_)));
        // Nothing was latched.
        assert_eq!(ctl.states(), vec![LoopState::Running; 2]);
    }

    #[test]
    fn test_pause_targets_innermost_level() {
        let ctl = controller(&[2, 3]);
        ctl.pause();
        assert_eq!(ctl.states(), vec![LoopState::Running, LoopState::Paused]);
        ctl.resume();
        assert_eq!(ctl.states(), vec![LoopState::Running; 2]);
    }

    #[test]
    fn test_nested_iteration_restarts_inner_level() {
        let mut ctl = controller(&[2, 3]);
        let mut visits: Vec<(usize, usize)> = Vec::new();

        let (outer, rest) = ctl.levels_mut().split_first_mut().unwrap();
        let inner = &mut rest[0];
        for (i, _) in outer.iter() {
            for (j, _) in inner.iter() {
                visits.push((i, j));
            }
        }

        let expected: Vec<(usize, usize)> =
            (0..2).flat_map(|i| (0..3).map(move |j| (i, j))).collect();
        assert_eq!(visits, expected);
    }

    #[test]
    fn test_handle_controls_from_another_thread() {
        let ctl = controller(&[2, 3]);
        let handle = ctl.handle();
        assert_eq!(handle.shape(), &[2, 3]);

        let worker = std::thread::spawn(move || {
            handle.stop_through(0).unwrap();
            handle.set_paused(true);
        });
        worker.join().ok();

        assert_eq!(
            ctl.states(),
            vec![LoopState::Stopping, LoopState::Paused]
        );
    }
}
