//! Dataset storage and the streaming chunk writer.

pub mod dataset;
pub mod storage;
pub mod writer;

pub use dataset::Dataset;
pub use storage::{CsvSink, FlushSink, RawSink};
pub use writer::PositionedWriter;
