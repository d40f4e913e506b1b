//! End-anchored chunk placement into a preallocated dataset.
//!
//! The acquisition loop hands this writer a flat chunk of newly read
//! samples together with the coordinate of the chunk's LAST element (the
//! loop position at the moment the read completed). The writer maps that
//! end-anchored request back onto dataset coordinates and writes in place.
//!
//! # Placement
//!
//! For a dataset of shape `(d0, d1, ..., dN-1)`, row-major with the last
//! axis fastest, a chunk of `n` values ending at `end` occupies the `n`
//! consecutive row-major cells that finish at `end`. Depending on `n` and
//! `end` that is a single cell, a contiguous run inside one row, or a span
//! of full-width rows with a partial first and last row. One
//! rank-generic routine handles all three: the start coordinate comes from
//! a mixed-radix borrow of `n - 1` over the inner axes (radixes
//! `d1..dN-1`), and the chunk then fills the flat range `start..=end`.
//!
//! The OUTERMOST axis absorbs any remaining borrow without wrapping. It
//! is the slowest, "page" axis, so a borrow that would carry it below
//! zero means the chunk reaches before the dataset origin; that request
//! fails with [`SweepError::Range`] rather than being clamped or wrapped.
//!
//! # All-or-nothing
//!
//! Every request is fully validated before the first cell is touched. A
//! failed `write_chunk` leaves the dataset bit-identical to before the
//! call. Re-writing previously written cells is permitted, so a retried
//! chunk is idempotent.

use log::{debug, trace};

use crate::data::dataset::Dataset;
use crate::data::storage::FlushSink;
use crate::error::{SweepError, SweepResult};

/// Streaming writer that places end-anchored sample chunks in a dataset.
///
/// Owns the dataset for the duration of the run; an optional
/// [`FlushSink`] persists the array every `flush_every` chunks and once
/// more in [`PositionedWriter::finish`].
pub struct PositionedWriter {
    dataset: Dataset,
    sink: Option<Box<dyn FlushSink>>,
    flush_every: usize,
    chunks_since_flush: usize,
    cells_written: usize,
}

impl PositionedWriter {
    /// Creates a writer over `dataset` with no persistence sink.
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            sink: None,
            flush_every: 0,
            chunks_since_flush: 0,
            cells_written: 0,
        }
    }

    /// Attaches a flush sink.
    ///
    /// The full dataset is flushed after every `flush_every` non-empty
    /// chunks; 0 disables periodic flushing, leaving only the final flush
    /// in [`Self::finish`].
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn FlushSink>, flush_every: usize) -> Self {
        debug!(
            "writer: sink '{}' attached, flushing every {} chunks",
            sink.path().display(),
            flush_every
        );
        self.sink = Some(sink);
        self.flush_every = flush_every;
        self
    }

    /// Borrows the dataset being written.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Total cells written so far (rewrites counted again).
    pub fn cells_written(&self) -> usize {
        self.cells_written
    }

    /// Coordinate of the first element of a `chunk_len`-value chunk ending
    /// at `end_position`.
    ///
    /// Subtracts `chunk_len - 1` from the position using mixed-radix
    /// borrow over the inner axes; the outermost axis absorbs the rest.
    /// Fails with [`SweepError::Range`] when `end_position` is out of
    /// bounds, `chunk_len` is 0, or the borrow would carry the outermost
    /// coordinate below zero.
    pub fn start_position(
        &self,
        end_position: &[usize],
        chunk_len: usize,
    ) -> SweepResult<Vec<usize>> {
        // Validates rank and per-axis bounds of the end coordinate.
        self.dataset.flat_index(end_position)?;
        if chunk_len == 0 {
            return Err(SweepError::Range(
                "chunk length must be at least 1".to_string(),
            ));
        }

        let shape = self.dataset.shape();
        let mut coords: Vec<usize> = end_position.to_vec();
        let mut borrow = chunk_len - 1;
        for axis in (1..shape.len()).rev() {
            let radix = shape[axis];
            let step_back = borrow % radix;
            borrow /= radix;
            if coords[axis] >= step_back {
                coords[axis] -= step_back;
            } else {
                coords[axis] += radix - step_back;
                borrow += 1;
            }
        }
        // Outermost axis: absorbs the remaining borrow, no wraparound.
        if coords[0] < borrow {
            return Err(SweepError::Range(format!(
                "chunk of {chunk_len} values ending at {end_position:?} reaches before the \
                 dataset origin"
            )));
        }
        coords[0] -= borrow;
        Ok(coords)
    }

    /// Places `values` so that the last one lands at `end_position`.
    ///
    /// The whole request is validated first; on any [`SweepError::Range`]
    /// the dataset is unchanged. An empty chunk is a validated no-op.
    pub fn write_chunk(&mut self, end_position: &[usize], values: &[f64]) -> SweepResult<()> {
        if values.is_empty() {
            self.dataset.flat_index(end_position)?;
            return Ok(());
        }
        if values.len() > self.dataset.len() {
            return Err(SweepError::Range(format!(
                "chunk of {} values exceeds dataset capacity {}",
                values.len(),
                self.dataset.len()
            )));
        }

        let start = self.start_position(end_position, values.len())?;
        let start_flat = self.dataset.flat_index(&start)?;
        self.dataset.write_flat_run(start_flat, values)?;

        trace!(
            "writer: {} values placed at {:?}..={:?}",
            values.len(),
            start,
            end_position
        );
        self.cells_written += values.len();
        self.chunks_since_flush += 1;
        if self.flush_every > 0 && self.chunks_since_flush >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Replaces the run context the sink embeds. No-op without a sink.
    pub fn set_metadata(&mut self, metadata: &crate::metadata::RunMetadata) -> SweepResult<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.set_metadata(metadata)?;
        }
        Ok(())
    }

    /// Flushes the dataset to the sink now. No-op without a sink.
    pub fn flush(&mut self) -> SweepResult<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush(&self.dataset)?;
        }
        self.chunks_since_flush = 0;
        Ok(())
    }

    /// Final flush, then hands the dataset back.
    pub fn finish(mut self) -> SweepResult<Dataset> {
        self.flush()?;
        debug!("writer: finished, {} cells written", self.cells_written);
        Ok(self.dataset)
    }
}
