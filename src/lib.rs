//! # Voltmon Core Library
//!
//! Core library for a desktop Arduino voltage monitor with support for:
//! - Serial port enumeration with descriptive device names
//! - Session lifecycle management (open/close with a documented state machine)
//! - Two wire formats: line-tagged Arduino output and raw byte scanning
//! - Debounced threshold-crossing alerts (one alert per crossing)
//! - Bounded sliding-window history for live charting
//!
//! The GUI is an external collaborator: it subscribes to the session's event
//! stream and renders the display buffer. Nothing in this crate touches a UI
//! toolkit directly.
//!
//! ## Example
//!
//! ```rust,no_run
//! use voltmon::{SerialSession, SessionConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = SerialSession::new();
//!     let mut rx = session.subscribe();
//!
//!     session.open(SessionConfig::new("/dev/ttyACM0", 9600)).await?;
//!
//!     while let Ok(event) = rx.recv().await {
//!         match event {
//!             SessionEvent::Reading(reading) => println!("{:.2} V", reading.value),
//!             SessionEvent::Alert(alert) => println!("ALERT: {:.2} V", alert.value),
//!             SessionEvent::ReadFailure(_) => break,
//!             _ => {}
//!         }
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::MonitorConfig;
pub use crate::core::buffer::DisplayBuffer;
pub use crate::core::monitor::{ThresholdAlert, ThresholdMonitor};
pub use crate::core::parser::{FrameParser, ParseMode, VoltageReading};
pub use crate::core::registry::{list_ports, PortDescriptor, RegistryError};
pub use crate::core::session::{
    OpenError, SerialSession, SessionConfig, SessionEvent, SessionState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
