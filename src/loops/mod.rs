//! Cooperative loop control for nested measurement sweeps.
//!
//! The control thread owns a [`LoopController`] and iterates its
//! [`LoopLevel`]s outermost-first; other threads pause, resume, or stop
//! the run through cloned [`LevelHandle`]/[`ControllerHandle`]s. All
//! suspension happens at a single per-step checkpoint inside the level
//! iterator, so a step already in flight is never interrupted.

pub mod controller;
pub mod level;

pub use controller::{ControllerHandle, LoopController, RunGuard};
pub use level::{LevelHandle, LevelIter, LoopLevel, LoopState};
