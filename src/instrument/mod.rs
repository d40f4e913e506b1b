//! Instrument channel abstraction.
//!
//! The engine never talks wire protocols. Everything it needs from
//! hardware is behind [`Channel`]: a named endpoint that yields a buffer
//! of samples on [`Channel::read`] and, for settable axes, accepts a
//! value on [`Channel::write`]. Device-specific command encoding,
//! framing, and retry live in the collaborator crates that implement
//! this trait; their failures surface as [`anyhow::Error`] and terminate
//! the active run without retry at this layer.

use anyhow::{anyhow, Result};

pub mod sim;

pub use sim::{SimActuator, SimBench, SimDetector};

/// One named instrument endpoint.
///
/// `read` returns every sample acquired since the call, oldest first; a
/// buffered digitizer may return many per call, a DC meter exactly one.
pub trait Channel: Send {
    /// Stable name used in logs and run metadata.
    fn name(&self) -> String;

    /// Acquires the next buffer of samples.
    fn read(&mut self) -> Result<Vec<f64>>;

    /// Applies a setpoint and returns the readback samples.
    ///
    /// Read-only channels keep this default, which reports the channel
    /// as unwritable.
    fn write(&mut self, _value: f64) -> Result<Vec<f64>> {
        Err(anyhow!("channel '{}' does not support writing", self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ReadOnly;

    impl Channel for ReadOnly {
        fn name(&self) -> String {
            "thermometer".to_string()
        }

        fn read(&mut self) -> Result<Vec<f64>> {
            Ok(vec![21.5])
        }
    }

    #[test]
    fn test_default_write_is_unsupported() {
        let mut ch = ReadOnly;
        let err = ch.write(1.0).unwrap_err();
        assert!(err.to_string().contains("thermometer"));
        assert_eq!(ch.read().unwrap(), vec![21.5]);
    }
}
