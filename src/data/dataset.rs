//! Preallocated N-dimensional result storage.
//!
//! A [`Dataset`] is a dense, row-major `f64` array whose shape matches the
//! loop stack of a run, outermost axis first and last axis fastest. It is
//! allocated up front at a known fill value so a partially-completed or
//! stopped run still leaves a well-formed array: every cell not yet
//! written holds the fill value.

use ndarray::{aview1, s, ArrayD, IxDyn};

use crate::error::{SweepError, SweepResult};

/// Dense row-major `f64` array with a fixed shape and a known fill value.
pub struct Dataset {
    data: ArrayD<f64>,
    fill: f64,
}

impl Dataset {
    /// Allocates a dataset of the given shape, every cell set to `fill`.
    ///
    /// The shape must have at least one axis and no zero-length axis.
    /// `fill` may be NaN, which is the conventional marker for cells a
    /// stopped run never reached.
    pub fn new(shape: &[usize], fill: f64) -> SweepResult<Self> {
        if shape.is_empty() {
            return Err(SweepError::Config(
                "dataset shape must have at least one axis".to_string(),
            ));
        }
        if let Some(axis) = shape.iter().position(|&n| n == 0) {
            return Err(SweepError::Config(format!(
                "dataset axis {axis} has zero length"
            )));
        }
        // from_elem aborts the process on capacity overflow; reject first.
        shape
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| {
                SweepError::Config(format!("dataset shape {shape:?} overflows usize"))
            })?;
        Ok(Self {
            data: ArrayD::from_elem(IxDyn(shape), fill),
            fill,
        })
    }

    /// Axis lengths, outermost first.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-cell dataset (cannot occur after `new`).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The value unwritten cells hold.
    pub fn fill_value(&self) -> f64 {
        self.fill
    }

    /// Reads one cell, or `None` when the coordinates are out of bounds.
    pub fn get(&self, coords: &[usize]) -> Option<f64> {
        self.data.get(IxDyn(coords)).copied()
    }

    /// Row-major flat offset of a cell.
    ///
    /// Fails with [`SweepError::Range`] when the rank differs from the
    /// dataset's or any coordinate is out of bounds for its axis.
    pub fn flat_index(&self, coords: &[usize]) -> SweepResult<usize> {
        let shape = self.data.shape();
        if coords.len() != shape.len() {
            return Err(SweepError::Range(format!(
                "position has {} coordinates but the dataset has {} axes",
                coords.len(),
                shape.len()
            )));
        }
        let mut flat = 0usize;
        for (axis, (&c, &n)) in coords.iter().zip(shape).enumerate() {
            if c >= n {
                return Err(SweepError::Range(format!(
                    "coordinate {c} exceeds axis {axis} (length {n})"
                )));
            }
            flat = flat * n + c;
        }
        Ok(flat)
    }

    /// Coordinates of a row-major flat offset (inverse of [`Self::flat_index`]).
    pub fn coords_of(&self, flat: usize) -> SweepResult<Vec<usize>> {
        if flat >= self.len() {
            return Err(SweepError::Range(format!(
                "flat offset {flat} exceeds dataset size {}",
                self.len()
            )));
        }
        let shape = self.data.shape();
        let mut coords = vec![0usize; shape.len()];
        let mut rest = flat;
        for (axis, &n) in shape.iter().enumerate().rev() {
            coords[axis] = rest % n;
            rest /= n;
        }
        Ok(coords)
    }

    /// Writes a contiguous row-major run of cells starting at `start`.
    ///
    /// Bounds are checked before any cell changes.
    pub fn write_flat_run(&mut self, start: usize, values: &[f64]) -> SweepResult<()> {
        let total = self.data.len();
        let end = start.checked_add(values.len()).ok_or_else(|| {
            SweepError::Range(format!("run of {} values at {start} overflows", values.len()))
        })?;
        if end > total {
            return Err(SweepError::Range(format!(
                "run of {} values at {start} exceeds dataset size {total}",
                values.len()
            )));
        }
        if values.is_empty() {
            return Ok(());
        }
        let mut flat = self
            .data
            .view_mut()
            .into_shape_with_order(total)
            .map_err(|e| SweepError::Range(format!("dataset view is not contiguous: {e}")))?;
        flat.slice_mut(s![start..end]).assign(&aview1(values));
        Ok(())
    }

    /// Borrows the underlying array.
    pub fn as_array(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Row-major copy of every cell, for serialization sinks.
    pub fn flat_values(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("shape", &self.data.shape())
            .field("fill", &self.fill)
            .finish()
    }
}
