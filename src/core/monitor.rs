//! Threshold-crossing alert debouncing
//!
//! Emits at most one alert per upward crossing: readings that stay above the
//! threshold are silent, and dropping back below re-arms the monitor.

use crate::core::parser::VoltageReading;

/// Default alert threshold in volts
pub const DEFAULT_THRESHOLD_VOLTS: f64 = 4.0;

/// Alert emitted once per upward threshold crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdAlert {
    /// Voltage that crossed the threshold
    pub value: f64,
    /// Threshold that was exceeded
    pub threshold: f64,
    /// Sequence number of the triggering reading
    pub sequence: u64,
}

/// Tracks whether the stream is currently above the threshold
#[derive(Debug, Clone)]
pub struct ThresholdMonitor {
    threshold_volts: f64,
    was_above: bool,
}

impl ThresholdMonitor {
    /// Create a monitor with the given threshold
    pub fn new(threshold_volts: f64) -> Self {
        Self {
            threshold_volts,
            was_above: false,
        }
    }

    /// Configured threshold in volts
    pub fn threshold(&self) -> f64 {
        self.threshold_volts
    }

    /// Whether the last observed reading was above the threshold
    pub fn is_above(&self) -> bool {
        self.was_above
    }

    /// Evaluate one reading, returning an alert only on the transition from
    /// at-or-below to above the threshold
    pub fn observe(&mut self, reading: &VoltageReading) -> Option<ThresholdAlert> {
        let above = reading.value > self.threshold_volts;
        let crossed = above && !self.was_above;
        self.was_above = above;

        crossed.then_some(ThresholdAlert {
            value: reading.value,
            threshold: self.threshold_volts,
            sequence: reading.sequence,
        })
    }

    /// Forget the crossing state (reconnect)
    pub fn reset(&mut self) {
        self.was_above = false;
    }
}

impl Default for ThresholdMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_VOLTS)
    }
}
