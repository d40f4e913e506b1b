//! Run orchestration: drive the loops, move the axes, record the data.
//!
//! [`SweepRun`] is the control-thread routine that turns a configured
//! [`LoopController`] into a recorded dataset. For every step of the
//! raster it moves the bound actuator of the level that advanced, and at
//! every innermost point it reads the detector and hands the samples to
//! the [`PositionedWriter`] end-anchored at the current loop position.
//!
//! # Acquisition shapes
//!
//! - `samples_per_point == 1`, detector returns one sample: the classic
//!   point-by-point raster; the dataset shape equals the loop shape.
//! - `samples_per_point > 1`: the dataset gains a trailing sample axis of
//!   that length, and each read lands as a run ending at index
//!   `count - 1` of that axis. A short read fills the front of the row; a
//!   read longer than the axis fails the run with a range error.
//! - `samples_per_point == 1`, detector returns a BATCH: the samples are
//!   treated as having accumulated since the previous read, ending at the
//!   current position. Combined with empty reads at the points in
//!   between, this is how hardware-buffered sweeps backfill whole rows in
//!   one call.
//!
//! # Ending
//!
//! A consumed stop request unwinds the loops without error; the run
//! reports [`RunOutcome::Stopped`] and every unvisited cell keeps the
//! fill value. Instrument errors are not retried: the run terminates, a
//! best-effort flush preserves what was recorded, and the error surfaces
//! to the caller.

use chrono::Utc;
use log::{debug, info, warn};

use crate::data::{Dataset, FlushSink, PositionedWriter};
use crate::error::{SweepError, SweepResult};
use crate::instrument::Channel;
use crate::loops::{ControllerHandle, LoopController, LoopLevel};
use crate::metadata::{AxisMetadata, RunMetadata, RunOutcome};

/// Dataset plus its context document, handed back when a run ends.
#[derive(Debug)]
pub struct CompletedRun {
    /// The recorded array; stopped runs leave fill values in unvisited cells.
    pub dataset: Dataset,
    /// Context with the outcome and end time stamped.
    pub metadata: RunMetadata,
}

/// One configured measurement run.
pub struct SweepRun {
    controller: LoopController,
    actuators: Vec<Option<Box<dyn Channel>>>,
    detector: Box<dyn Channel>,
    samples_per_point: usize,
    fill: f64,
    sink: Option<Box<dyn FlushSink>>,
    flush_every: usize,
    metadata: RunMetadata,
}

impl SweepRun {
    /// Creates a run over `controller`, recording `detector`.
    ///
    /// `samples_per_point` above 1 appends a sample axis of that length
    /// to the dataset shape. Fails with [`SweepError::Config`] for an
    /// empty controller or a zero `samples_per_point`.
    pub fn new(
        controller: LoopController,
        detector: Box<dyn Channel>,
        samples_per_point: usize,
    ) -> SweepResult<Self> {
        if controller.is_empty() {
            return Err(SweepError::Config(
                "a run needs at least one loop level".to_string(),
            ));
        }
        if samples_per_point == 0 {
            return Err(SweepError::Config(
                "samples_per_point must be at least 1".to_string(),
            ));
        }

        let metadata = RunMetadata {
            axes: controller
                .describe()
                .into_iter()
                .map(|(name, sweep)| AxisMetadata { name, sweep })
                .collect(),
            detector: detector.name(),
            ..RunMetadata::default()
        };

        let depth = controller.depth();
        let mut run = Self {
            controller,
            actuators: (0..depth).map(|_| None).collect(),
            detector,
            samples_per_point,
            fill: f64::NAN,
            sink: None,
            flush_every: 0,
            metadata,
        };
        run.metadata.shape = run.dataset_shape();
        Ok(run)
    }

    /// Binds the channel that physically moves level `level_index`.
    ///
    /// Levels without an actuator (timed waits, software axes) are legal
    /// and simply advance without an instrument write.
    pub fn bind_actuator(
        &mut self,
        level_index: usize,
        actuator: Box<dyn Channel>,
    ) -> SweepResult<()> {
        if level_index >= self.actuators.len() {
            return Err(SweepError::Range(format!(
                "actuator index {level_index} out of range for {} levels",
                self.actuators.len()
            )));
        }
        self.actuators[level_index] = Some(actuator);
        Ok(())
    }

    /// Sets the fill value for unwritten cells (default NaN).
    #[must_use]
    pub fn with_fill(mut self, fill: f64) -> Self {
        self.fill = fill;
        self.metadata.fill_value = fill;
        self
    }

    /// Attaches a flush sink, persisting every `flush_every` chunks.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn FlushSink>, flush_every: usize) -> Self {
        self.sink = Some(sink);
        self.flush_every = flush_every;
        self
    }

    /// The run context assembled so far.
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Mutable access for naming the run and adding parameters.
    pub fn metadata_mut(&mut self) -> &mut RunMetadata {
        &mut self.metadata
    }

    /// Cross-thread pause/stop handle for operator consoles.
    pub fn handle(&self) -> ControllerHandle {
        self.controller.handle()
    }

    fn dataset_shape(&self) -> Vec<usize> {
        let mut shape = self.controller.shape();
        if self.samples_per_point > 1 {
            shape.push(self.samples_per_point);
        }
        shape
    }

    /// Executes the raster to completion, stop, or first error.
    pub fn execute(mut self) -> SweepResult<CompletedRun> {
        self.metadata.validate().map_err(SweepError::Config)?;
        let guard = self.controller.begin_run()?;

        let shape = self.dataset_shape();
        self.metadata.shape = shape.clone();
        self.metadata.started_at = Utc::now();
        self.metadata.finished_at = None;
        self.metadata.outcome = None;

        let mut writer = PositionedWriter::new(Dataset::new(&shape, self.fill)?);
        if let Some(sink) = self.sink.take() {
            writer = writer.with_sink(sink, self.flush_every);
        }
        writer.set_metadata(&self.metadata)?;
        info!(
            "run '{}' started over shape {:?}",
            self.metadata.run_name, shape
        );

        let total = self.controller.total_points();
        let visited = {
            let mut raster = Raster {
                detector: self.detector.as_mut(),
                writer: &mut writer,
                samples_per_point: self.samples_per_point,
                position: vec![0; self.controller.depth()],
                visited: 0,
            };
            let result = descend(
                &mut raster,
                self.controller.levels_mut(),
                &mut self.actuators,
                0,
            );
            if let Err(e) = result {
                if let Err(flush_err) = raster.writer.flush() {
                    warn!("flush after failed run also failed: {flush_err}");
                }
                return Err(e);
            }
            raster.visited
        };
        drop(guard);

        let outcome = if visited == total {
            RunOutcome::Completed
        } else {
            RunOutcome::Stopped
        };
        self.metadata.mark_finished(outcome, writer.cells_written());
        writer.set_metadata(&self.metadata)?;
        let dataset = writer.finish()?;
        info!(
            "run '{}' {}: {visited}/{total} points, {} cells written",
            self.metadata.run_name,
            match outcome {
                RunOutcome::Completed => "completed",
                RunOutcome::Stopped => "stopped",
            },
            self.metadata.cells_written
        );

        Ok(CompletedRun {
            dataset,
            metadata: self.metadata,
        })
    }
}

impl std::fmt::Debug for SweepRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepRun")
            .field("samples_per_point", &self.samples_per_point)
            .field("fill", &self.fill)
            .field("flush_every", &self.flush_every)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Per-run state threaded through the recursive raster.
struct Raster<'a> {
    detector: &'a mut dyn Channel,
    writer: &'a mut PositionedWriter,
    samples_per_point: usize,
    position: Vec<usize>,
    visited: usize,
}

fn descend(
    ctx: &mut Raster<'_>,
    levels: &mut [LoopLevel],
    actuators: &mut [Option<Box<dyn Channel>>],
    depth: usize,
) -> SweepResult<()> {
    let Some((level, rest_levels)) = levels.split_first_mut() else {
        return Ok(());
    };
    let Some((actuator, rest_actuators)) = actuators.split_first_mut() else {
        return Ok(());
    };

    let innermost = rest_levels.is_empty();
    for (pos, value) in level.iter() {
        if let Some(chan) = actuator.as_mut() {
            chan.write(value)?;
        }
        ctx.position[depth] = pos;

        if innermost {
            let samples = ctx.detector.read()?;
            if samples.is_empty() {
                debug!("empty read at {:?}", ctx.position);
            } else {
                let mut end = ctx.position.clone();
                if ctx.samples_per_point > 1 {
                    end.push(samples.len() - 1);
                }
                ctx.writer.write_chunk(&end, &samples)?;
            }
            ctx.visited += 1;
        } else {
            descend(ctx, rest_levels, rest_actuators, depth + 1)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::SimBench;
    use crate::loops::LoopLevel;
    use crate::sweep::LinearSweep;

    fn linear_level(name: &str, points: usize) -> LoopLevel {
        LoopLevel::new(
            name,
            Box::new(LinearSweep::new(-2.0, 2.0, points).unwrap()),
        )
    }

    fn two_axis_run(bench: &SimBench, points: usize) -> SweepRun {
        let controller = LoopController::from_levels(vec![
            linear_level("x", points),
            linear_level("y", points),
        ]);
        let mut run =
            SweepRun::new(controller, Box::new(bench.detector("pd", 1)), 1).unwrap();
        run.bind_actuator(0, Box::new(bench.actuator("x"))).unwrap();
        run.bind_actuator(1, Box::new(bench.actuator("y"))).unwrap();
        run
    }

    #[test]
    fn test_full_raster_records_every_cell() {
        let bench = SimBench::new();
        let done = two_axis_run(&bench, 5).execute().unwrap();

        assert_eq!(done.dataset.shape(), &[5, 5]);
        assert!(done.dataset.as_array().iter().all(|v| v.is_finite()));
        assert_eq!(done.metadata.outcome, Some(RunOutcome::Completed));
        assert_eq!(done.metadata.cells_written, 25);

        // The Gaussian bench peaks where both axes cross zero.
        let peak = done.dataset.get(&[2, 2]).unwrap();
        assert!(done
            .dataset
            .as_array()
            .iter()
            .all(|&v| v <= peak + 1e-12));
    }

    #[test]
    fn test_metadata_captures_axes_and_shape() {
        let bench = SimBench::new();
        let run = two_axis_run(&bench, 3);
        let meta = run.metadata();
        assert_eq!(meta.axes.len(), 2);
        assert_eq!(meta.axes[0].name, "x");
        assert_eq!(meta.shape, vec![3, 3]);
        assert_eq!(meta.detector, "pd");
    }

    #[test]
    fn test_sample_axis_is_appended_for_buffered_detectors() {
        let bench = SimBench::new();
        let controller = LoopController::from_levels(vec![linear_level("x", 4)]);
        let mut run =
            SweepRun::new(controller, Box::new(bench.detector("digitizer", 6)), 6).unwrap();
        run.bind_actuator(0, Box::new(bench.actuator("x"))).unwrap();

        let done = run.execute().unwrap();
        assert_eq!(done.dataset.shape(), &[4, 6]);
        assert_eq!(done.metadata.cells_written, 24);
        assert!(done.dataset.as_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_stop_before_execute_ends_at_first_checkpoint() {
        let bench = SimBench::new();
        let run = two_axis_run(&bench, 4);
        run.handle().stop_all();

        let done = run.execute().unwrap();
        assert_eq!(done.metadata.outcome, Some(RunOutcome::Stopped));
        // The first innermost point has no checkpoint before it.
        assert_eq!(done.metadata.cells_written, 1);
        assert!(done.dataset.get(&[0, 0]).unwrap().is_finite());
        assert!(done.dataset.get(&[0, 1]).unwrap().is_nan());
    }

    #[test]
    fn test_empty_controller_is_rejected() {
        let bench = SimBench::new();
        let err = SweepRun::new(
            LoopController::new(),
            Box::new(bench.detector("pd", 1)),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, SweepError::Config(_)));
    }

    #[test]
    fn test_actuator_index_out_of_range() {
        let bench = SimBench::new();
        let controller = LoopController::from_levels(vec![linear_level("x", 3)]);
        let mut run =
            SweepRun::new(controller, Box::new(bench.detector("pd", 1)), 1).unwrap();
        let err = run
            .bind_actuator(1, Box::new(bench.actuator("x")))
            .unwrap_err();
        assert!(matches!(err, SweepError::Range(_)));
    }

    struct FailingDetector {
        reads_before_failure: usize,
    }

    impl Channel for FailingDetector {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn read(&mut self) -> anyhow::Result<Vec<f64>> {
            if self.reads_before_failure == 0 {
                anyhow::bail!("link dropped");
            }
            self.reads_before_failure -= 1;
            Ok(vec![0.0])
        }
    }

    #[test]
    fn test_instrument_error_terminates_run() {
        let controller = LoopController::from_levels(vec![linear_level("x", 5)]);
        let run = SweepRun::new(
            controller,
            Box::new(FailingDetector {
                reads_before_failure: 2,
            }),
            1,
        )
        .unwrap();

        let err = run.execute().unwrap_err();
        assert!(matches!(err, SweepError::Instrument(_)));
        assert!(err.to_string().contains("link dropped"));
    }
}
