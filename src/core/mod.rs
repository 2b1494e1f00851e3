//! Core module containing the main functionality of Voltmon
//!
//! This module provides:
//! - Serial port enumeration (registry)
//! - Session management with state machine and a dedicated read worker
//! - Frame decoding for the two Arduino wire formats
//! - Threshold-crossing alert debouncing
//! - Bounded display history for charting

pub mod buffer;
pub mod monitor;
pub mod parser;
pub mod registry;
pub mod session;
