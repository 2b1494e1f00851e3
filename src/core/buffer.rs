//! Bounded history of recent readings for charting
//!
//! The session worker appends while the renderer reads; snapshots are
//! copy-on-read so readers never block the writer.

use crate::core::parser::VoltageReading;
use parking_lot::RwLock;
use std::collections::VecDeque;

/// Default number of chart points kept
pub const DEFAULT_CAPACITY: usize = 100;

/// Sliding-window store of recent readings (FIFO eviction when full)
#[derive(Debug)]
pub struct DisplayBuffer {
    points: RwLock<VecDeque<VoltageReading>>,
    capacity: usize,
}

impl DisplayBuffer {
    /// Create a buffer with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` readings
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest when full
    pub fn append(&self, reading: VoltageReading) {
        let mut points = self.points.write();
        points.push_back(reading);
        while points.len() > self.capacity {
            points.pop_front();
        }
    }

    /// Copy of the current contents in insertion order
    pub fn snapshot(&self) -> Vec<VoltageReading> {
        self.points.read().iter().copied().collect()
    }

    /// Most recent reading, if any
    pub fn latest(&self) -> Option<VoltageReading> {
        self.points.read().back().copied()
    }

    /// Number of stored readings
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    /// Maximum number of readings kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all readings (reconnect)
    pub fn clear(&self) {
        self.points.write().clear();
    }
}

impl Default for DisplayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sequence: u64) -> VoltageReading {
        VoltageReading {
            value: sequence as f64 / 100.0,
            sequence,
        }
    }

    #[test]
    fn test_eviction_keeps_last_capacity_in_order() {
        let buffer = DisplayBuffer::new();
        for i in 0..105 {
            buffer.append(reading(i));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot[0].sequence, 5);
        assert_eq!(snapshot[99].sequence, 104);
        assert!(snapshot.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let buffer = DisplayBuffer::with_capacity(3);
        for i in 0..10 {
            buffer.append(reading(i));
            assert!(buffer.len() <= 3);
        }
    }

    #[test]
    fn test_latest_and_clear() {
        let buffer = DisplayBuffer::new();
        assert!(buffer.latest().is_none());

        buffer.append(reading(0));
        buffer.append(reading(1));
        assert_eq!(buffer.latest().map(|r| r.sequence), Some(1));

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let buffer = DisplayBuffer::new();
        buffer.append(reading(0));

        let snapshot = buffer.snapshot();
        buffer.append(reading(1));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 2);
    }
}
