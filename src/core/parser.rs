//! Frame decoding for the Arduino voltage stream
//!
//! Two mutually exclusive wire formats:
//! - **LineTagged**: the firmware prints a marker line followed by the value
//!   on its own line. A bare in-range number also counts, for firmware
//!   variants that omit the marker.
//! - **RawScan**: unstructured byte chunks are tokenized and the first token
//!   that parses into a plausible voltage wins (at most one reading per
//!   chunk).
//!
//! Malformed input never fails the parser; frames that yield nothing are
//! dropped.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Marker line that arms parsing of the following line as a voltage value
pub const VOLTAGE_MARKER: &str = "Tensiunea de pe pin:";

/// Plausible voltage range for a 5 V Arduino analog pin
pub const VOLTAGE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=5.5;

/// Longest line the parser will buffer before giving up on the stream
/// producing a newline
const MAX_LINE_LEN: usize = 4096;

/// Wire format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseMode {
    /// Marker line followed by a value line
    #[default]
    LineTagged,
    /// Unstructured chunks scanned for embedded decimal numbers
    RawScan,
}

impl ParseMode {
    /// Get all modes
    pub fn all() -> &'static [ParseMode] {
        &[ParseMode::LineTagged, ParseMode::RawScan]
    }

    /// Get name
    pub fn name(&self) -> &'static str {
        match self {
            ParseMode::LineTagged => "Line-tagged",
            ParseMode::RawScan => "Raw scan",
        }
    }
}

/// One decoded voltage sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageReading {
    /// Measured voltage in volts
    pub value: f64,
    /// Strictly increasing per-session counter, starting at 0
    pub sequence: u64,
}

/// Stateful decoder turning a byte stream into discrete voltage readings
pub struct FrameParser {
    mode: ParseMode,
    armed: bool,
    scratch: Vec<u8>,
    sequence: u64,
    token_re: Regex,
}

impl FrameParser {
    /// Create a parser for the given wire format
    pub fn new(mode: ParseMode) -> Self {
        Self {
            mode,
            armed: false,
            scratch: Vec::with_capacity(256),
            sequence: 0,
            // optional integer part, optional one decimal point, digits
            token_re: Regex::new(r"^\d*\.?\d+$").expect("token pattern is valid"),
        }
    }

    /// Wire format this parser decodes
    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Sequence number the next reading will carry
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    /// Drop buffered state and restart sequence numbering (reconnect)
    pub fn reset(&mut self) {
        self.armed = false;
        self.scratch.clear();
        self.sequence = 0;
    }

    /// Feed a chunk of received bytes, returning any readings it completed.
    ///
    /// Never fails: frames that decode to nothing are silently discarded.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<VoltageReading> {
        match self.mode {
            ParseMode::LineTagged => self.push_lines(chunk),
            ParseMode::RawScan => self.scan_chunk(chunk),
        }
    }

    fn push_lines(&mut self, chunk: &[u8]) -> Vec<VoltageReading> {
        let mut readings = Vec::new();

        for &byte in chunk {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.scratch).trim().to_string();
                self.scratch.clear();
                if let Some(reading) = self.accept_line(&line) {
                    readings.push(reading);
                }
            } else {
                self.scratch.push(byte);
                if self.scratch.len() > MAX_LINE_LEN {
                    trace!("dropping oversized unterminated line");
                    self.scratch.clear();
                    self.armed = false;
                }
            }
        }

        readings
    }

    fn accept_line(&mut self, line: &str) -> Option<VoltageReading> {
        if line.is_empty() {
            return None;
        }

        if self.armed {
            self.armed = false;
            return match line.parse::<f64>() {
                Ok(value) => Some(self.emit(value)),
                Err(_) => {
                    trace!(line, "dropped malformed value line");
                    None
                }
            };
        }

        if line.contains(VOLTAGE_MARKER) {
            self.armed = true;
            return None;
        }

        // Some firmware variants print the value alone without the marker.
        if self.token_re.is_match(line) {
            if let Ok(value) = line.parse::<f64>() {
                if VOLTAGE_RANGE.contains(&value) {
                    return Some(self.emit(value));
                }
            }
        }

        None
    }

    fn scan_chunk(&mut self, chunk: &[u8]) -> Vec<VoltageReading> {
        let text = String::from_utf8_lossy(chunk);

        for token in text.split(|c: char| !(c.is_ascii_digit() || c == '.')) {
            if token.is_empty() || !self.token_re.is_match(token) {
                continue;
            }
            if let Ok(value) = token.parse::<f64>() {
                // First in-range token wins; the rest of the chunk is
                // skipped even if it holds further candidates.
                if VOLTAGE_RANGE.contains(&value) {
                    return vec![self.emit(value)];
                }
                trace!(value, "token out of voltage range");
            }
        }

        Vec::new()
    }

    fn emit(&mut self, value: f64) -> VoltageReading {
        let reading = VoltageReading {
            value,
            sequence: self.sequence,
        };
        self.sequence += 1;
        reading
    }
}
