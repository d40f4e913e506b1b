//! Measurement sweep engine with a streaming N-dimensional data writer.
//!
//! This library contains the loop-control core (sweep sources, nested
//! loop levels with cross-thread pause/stop, run orchestration) and the
//! data-recording core (preallocated datasets, end-anchored chunk
//! placement, flush sinks). Instrument protocol handling stays behind
//! the [`instrument::Channel`] trait and is supplied by collaborator
//! crates; a simulated bench ships for demos and tests.

pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod loops;
pub mod metadata;
pub mod run;
pub mod sweep;
