//! Flush sinks for persisting datasets with clean feature flag handling.
//!
//! A sink serializes the FULL dataset on every flush, truncating its
//! target file first. Rewriting the whole array keeps the on-disk copy
//! well-formed after a stop or crash mid-run, at the cost of write
//! amplification that is negligible at the dataset sizes this engine
//! records.

use std::path::{Path, PathBuf};

use crate::data::dataset::Dataset;
use crate::error::SweepResult;
use crate::metadata::RunMetadata;

/// Destination for periodic full-dataset flushes.
pub trait FlushSink: Send {
    /// Serializes the complete dataset, replacing any previous flush.
    fn flush(&mut self, dataset: &Dataset) -> SweepResult<()>;

    /// Replaces the run context embedded in subsequent flushes.
    ///
    /// Called once before the first flush and again when the run ends, so
    /// the final file carries the outcome. Sinks without a metadata
    /// representation keep this default.
    fn set_metadata(&mut self, _metadata: &RunMetadata) -> SweepResult<()> {
        Ok(())
    }

    /// Target path, for logging and run metadata.
    fn path(&self) -> &Path;
}

// ============================================================================
// CSV Sink
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use serde::Serialize;

    use crate::error::SweepError;

    /// Long-format CSV sink: one record per cell, coordinate columns first.
    ///
    /// An optional metadata document is written as `# `-prefixed JSON lines
    /// ahead of the header, so the file stays loadable by tools that skip
    /// comment lines.
    pub struct CsvSink {
        path: PathBuf,
        axis_names: Option<Vec<String>>,
        metadata: Option<serde_json::Value>,
    }

    impl CsvSink {
        /// Creates a sink targeting `path`; the file is created on first flush.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                axis_names: None,
                metadata: None,
            }
        }

        /// Names the coordinate columns (default `axis0`, `axis1`, ...).
        #[must_use]
        pub fn with_axis_names(mut self, names: Vec<String>) -> Self {
            self.axis_names = Some(names);
            self
        }

        /// Attaches a metadata document to embed as comment lines.
        pub fn with_metadata<T: Serialize>(mut self, metadata: &T) -> SweepResult<Self> {
            let value = serde_json::to_value(metadata)
                .map_err(|e| SweepError::Config(format!("unserializable metadata: {e}")))?;
            self.metadata = Some(value);
            Ok(self)
        }

        fn header(&self, ndim: usize) -> Vec<String> {
            let mut columns: Vec<String> = match &self.axis_names {
                Some(names) if names.len() == ndim => names.clone(),
                _ => (0..ndim).map(|i| format!("axis{i}")).collect(),
            };
            columns.push("value".to_string());
            columns
        }
    }

    impl FlushSink for CsvSink {
        fn set_metadata(&mut self, metadata: &RunMetadata) -> SweepResult<()> {
            self.metadata = Some(
                serde_json::to_value(metadata)
                    .map_err(|e| SweepError::Config(format!("unserializable metadata: {e}")))?,
            );
            Ok(())
        }

        fn flush(&mut self, dataset: &Dataset) -> SweepResult<()> {
            let mut file = File::create(&self.path)?;

            if let Some(metadata) = &self.metadata {
                let json = serde_json::to_string_pretty(metadata)
                    .map_err(|e| SweepError::Config(format!("unserializable metadata: {e}")))?;
                for line in json.lines() {
                    file.write_all(b"# ")?;
                    file.write_all(line.as_bytes())?;
                    file.write_all(b"\n")?;
                }
            }

            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(self.header(dataset.ndim()))?;

            let mut record: Vec<String> = Vec::with_capacity(dataset.ndim() + 1);
            for (flat, &value) in dataset.as_array().iter().enumerate() {
                let coords = dataset.coords_of(flat)?;
                record.clear();
                record.extend(coords.iter().map(usize::to_string));
                record.push(value.to_string());
                writer.write_record(&record)?;
            }
            writer.flush()?;

            log::debug!(
                "flushed {} cells to '{}'",
                dataset.len(),
                self.path.display()
            );
            Ok(())
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    use crate::error::SweepError;

    /// Placeholder kept so callers compile without the `storage_csv` feature.
    pub struct CsvSink {
        path: PathBuf,
    }

    impl CsvSink {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        #[must_use]
        pub fn with_axis_names(self, _names: Vec<String>) -> Self {
            self
        }

        pub fn with_metadata<T: serde::Serialize>(self, _metadata: &T) -> SweepResult<Self> {
            Ok(self)
        }
    }

    impl FlushSink for CsvSink {
        fn flush(&mut self, _dataset: &Dataset) -> SweepResult<()> {
            Err(SweepError::FeatureNotEnabled("storage_csv".to_string()))
        }

        fn set_metadata(&mut self, _metadata: &RunMetadata) -> SweepResult<()> {
            Err(SweepError::FeatureNotEnabled("storage_csv".to_string()))
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvSink;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvSink;

// ============================================================================
// Raw Sink
// ============================================================================

/// Binary sink: cells as little-endian `f64` in row-major order, plus a
/// `<path>.json` sidecar recording shape, fill, and run context so the
/// blob can be reloaded without guessing.
pub struct RawSink {
    path: PathBuf,
    sidecar: PathBuf,
    metadata: Option<serde_json::Value>,
}

impl RawSink {
    /// Creates a sink targeting `path`; files are created on first flush.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut sidecar = path.clone().into_os_string();
        sidecar.push(".json");
        Self {
            path,
            sidecar: PathBuf::from(sidecar),
            metadata: None,
        }
    }

    /// Path of the JSON sidecar describing the blob layout.
    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }
}

impl FlushSink for RawSink {
    fn set_metadata(&mut self, metadata: &RunMetadata) -> SweepResult<()> {
        self.metadata = Some(
            serde_json::to_value(metadata)
                .map_err(|e| crate::error::SweepError::Config(format!(
                    "unserializable metadata: {e}"
                )))?,
        );
        Ok(())
    }

    fn flush(&mut self, dataset: &Dataset) -> SweepResult<()> {
        use std::io::Write;

        let file = std::fs::File::create(&self.path)?;
        let mut out = std::io::BufWriter::new(file);
        for &value in dataset.as_array() {
            out.write_all(&value.to_le_bytes())?;
        }
        out.flush()?;

        let mut layout = serde_json::json!({
            "element": "f64le",
            "order": "row-major",
            "shape": dataset.shape(),
            "fill": dataset.fill_value(),
        });
        if let (Some(object), Some(metadata)) = (layout.as_object_mut(), &self.metadata) {
            object.insert("run".to_string(), metadata.clone());
        }
        std::fs::write(&self.sidecar, layout.to_string())?;

        log::debug!(
            "flushed {} cells to '{}'",
            dataset.len(),
            self.path.display()
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dataset() -> Dataset {
        let mut ds = Dataset::new(&[2, 3], 0.0).unwrap();
        ds.write_flat_run(0, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        ds
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_sink_writes_header_and_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut sink = CsvSink::new(&path)
            .with_axis_names(vec!["gate_v".to_string(), "bias_v".to_string()]);

        sink.flush(&sample_dataset()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("gate_v,bias_v,value"));
        assert_eq!(lines.next(), Some("0,0,1"));
        assert_eq!(text.lines().count(), 1 + 6);
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_sink_embeds_metadata_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let meta = serde_json::json!({ "sample": "wafer-7" });
        let mut sink = CsvSink::new(&path).with_metadata(&meta).unwrap();

        sink.flush(&sample_dataset()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# {"));
        assert!(text.contains("wafer-7"));
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_sink_reflush_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let mut sink = CsvSink::new(&path);

        sink.flush(&sample_dataset()).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        sink.flush(&sample_dataset()).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_raw_sink_is_little_endian_row_major() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.f64");
        let mut sink = RawSink::new(&path);

        sink.flush(&sample_dataset()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 6 * 8);
        let mut first = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        assert_eq!(f64::from_le_bytes(first), 1.0);
        let mut last = [0u8; 8];
        last.copy_from_slice(&bytes[40..]);
        assert_eq!(f64::from_le_bytes(last), 6.0);
    }

    #[test]
    fn test_raw_sink_sidecar_records_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.f64");
        let mut sink = RawSink::new(&path);

        sink.flush(&sample_dataset()).unwrap();

        let sidecar: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.sidecar_path()).unwrap())
                .unwrap();
        assert_eq!(sidecar["shape"], serde_json::json!([2, 3]));
        assert_eq!(sidecar["element"], "f64le");
    }

    #[test]
    fn test_raw_sink_sidecar_embeds_run_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RawSink::new(dir.path().join("run.f64"));
        let meta = crate::metadata::RunMetadataBuilder::new()
            .run_name("sidecar check")
            .build();
        sink.set_metadata(&meta).unwrap();

        sink.flush(&sample_dataset()).unwrap();

        let sidecar: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.sidecar_path()).unwrap())
                .unwrap();
        assert_eq!(sidecar["run"]["run_name"], "sidecar check");
    }
}
