//! Command-line runner for simulated sweep recordings.
//!
//! Loads `sweep_daq.toml` (or `--config <path>`), builds the configured
//! loop stack over the simulated bench, records the sweep, and persists
//! the dataset through the configured sink. `--stop-after-ms` and
//! `--pause-demo` spawn an operator thread that drives the controller
//! handle from outside the run, demonstrating the cooperative
//! pause/stop paths.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use sweep_daq::config::{Settings, SweepSpec};
use sweep_daq::data::{CsvSink, FlushSink, RawSink};
use sweep_daq::instrument::SimBench;
use sweep_daq::loops::{LoopController, LoopLevel};
use sweep_daq::run::SweepRun;

/// Sweep engine demo: record a simulated measurement raster.
#[derive(Parser)]
#[command(name = "sweep_daq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "sweep_daq.toml")]
    config: PathBuf,

    /// Override the storage backend (csv, raw, none)
    #[arg(long)]
    backend: Option<String>,

    /// Override the output directory for data files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the point count of every linear and timed axis
    #[arg(long)]
    points: Option<usize>,

    /// Issue a cross-thread stop this many milliseconds into the run
    #[arg(long)]
    stop_after_ms: Option<u64>,

    /// Pause, resume, and stop the run from an operator thread
    #[arg(long)]
    pause_demo: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(backend) = cli.backend {
        settings.storage.backend = backend;
    }
    if let Some(output_dir) = cli.output_dir {
        settings.storage.output_dir = output_dir;
    }
    if let Some(points) = cli.points {
        for axis in &mut settings.axes {
            match &mut axis.sweep {
                SweepSpec::Linear { points: n, .. } | SweepSpec::Timed { points: n, .. } => {
                    *n = points;
                }
                SweepSpec::List { .. } => {}
            }
        }
    }
    settings.validate()?;

    env_logger::Builder::from_env(
        Env::default().default_filter_or(&settings.application.log_level),
    )
    .init();

    let mut controller = LoopController::new();
    for axis in &settings.axes {
        controller.push_level(LoopLevel::new(&axis.name, axis.sweep.build()?))?;
    }

    let bench = SimBench::new();
    let mut detector = bench.detector(
        &settings.detector.channel,
        settings.detector.samples_per_read,
    );
    if settings.detector.noise > 0.0 {
        detector = detector.with_noise(settings.detector.noise, settings.detector.seed);
    }

    let mut run = SweepRun::new(
        controller,
        Box::new(detector),
        settings.detector.samples_per_read,
    )?;
    for (index, axis) in settings.axes.iter().enumerate() {
        run.bind_actuator(index, Box::new(bench.actuator(&axis.name)))?;
    }
    run = run.with_fill(settings.run.fill_value);
    run.metadata_mut().run_name = settings.run.run_name.clone();

    let axis_names: Vec<String> = settings.axes.iter().map(|a| a.name.clone()).collect();
    let mut sink_path = None;
    run = match settings.storage.backend.as_str() {
        "csv" => {
            std::fs::create_dir_all(&settings.storage.output_dir).with_context(|| {
                format!(
                    "creating storage directory {}",
                    settings.storage.output_dir.display()
                )
            })?;
            let path = settings
                .storage
                .output_dir
                .join(format!("{}.csv", settings.storage.file_stem));
            let sink = CsvSink::new(&path).with_axis_names(axis_names);
            sink_path = Some(path);
            run.with_sink(Box::new(sink), settings.run.flush_every)
        }
        "raw" => {
            std::fs::create_dir_all(&settings.storage.output_dir).with_context(|| {
                format!(
                    "creating storage directory {}",
                    settings.storage.output_dir.display()
                )
            })?;
            let path = settings
                .storage
                .output_dir
                .join(format!("{}.f64", settings.storage.file_stem));
            let sink = RawSink::new(&path);
            sink_path = Some(sink.path().to_path_buf());
            run.with_sink(Box::new(sink), settings.run.flush_every)
        }
        _ => run,
    };

    let mut operators = Vec::new();
    if let Some(delay_ms) = cli.stop_after_ms {
        let handle = run.handle();
        operators.push(std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(delay_ms));
            info!("operator: requesting stop after {delay_ms} ms");
            handle.stop_all();
        }));
    }
    if cli.pause_demo {
        let handle = run.handle();
        operators.push(std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            info!("operator: pausing the innermost level");
            handle.set_paused(true);
            std::thread::sleep(Duration::from_millis(150));
            info!("operator: resuming");
            handle.set_paused(false);
            std::thread::sleep(Duration::from_millis(150));
            info!("operator: requesting stop");
            handle.stop_all();
        }));
    }

    let done = run.execute()?;
    for operator in operators {
        let _ = operator.join();
    }

    println!(
        "run '{}' {:?}: shape {:?}, {} cells written",
        done.metadata.run_name,
        done.metadata
            .outcome
            .unwrap_or(sweep_daq::metadata::RunOutcome::Completed),
        done.dataset.shape(),
        done.metadata.cells_written
    );
    if let Some(path) = sink_path {
        println!("data written to {}", path.display());
    }

    Ok(())
}
