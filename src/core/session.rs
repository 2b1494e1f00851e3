//! Serial session lifecycle and the read-and-parse worker
//!
//! A `SerialSession` owns at most one open device handle at a time and moves
//! through Closed → Opening → Open → Closing → Closed. While Open, a
//! dedicated worker task polls the device, feeds the frame parser, and
//! publishes readings, alerts, and diagnostics on a broadcast channel. The
//! UI collaborator consumes that channel from its own context; nothing here
//! calls into UI code directly.

use crate::core::buffer::DisplayBuffer;
use crate::core::monitor::{ThresholdAlert, ThresholdMonitor, DEFAULT_THRESHOLD_VOLTS};
use crate::core::parser::{FrameParser, ParseMode, VoltageReading};
use crate::core::registry;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One device poll blocks at most this long when no data is ready
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `close()` waits for the worker to acknowledge before
/// force-releasing the device
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Total window for retrying an open that hits a handle the OS has not
/// released yet
const OPEN_RETRY_WINDOW: Duration = Duration::from_secs(1);
const OPEN_RETRY_STEP: Duration = Duration::from_millis(100);

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device held
    Closed,
    /// Open in progress
    Opening,
    /// Device held, read worker running
    Open,
    /// Close in progress, waiting for the worker
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Opening => write!(f, "opening"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Open-time error types (all terminal for that attempt)
#[derive(Error, Debug)]
pub enum OpenError {
    /// Port name absent from the current registry snapshot
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// The OS reports the device held by another process
    #[error("Port already in use: {0}")]
    AlreadyInUse(String),

    /// Access-control failure
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other open failure
    #[error("Open failed: {0}")]
    OpenFailed(String),
}

/// Per-connect configuration, immutable for the session's lifetime.
///
/// Framing is fixed at 8 data bits, one stop bit, no parity; only the baud
/// rate is configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port name (e.g., COM3, /dev/ttyACM0)
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Wire format the firmware speaks
    pub parse_mode: ParseMode,
    /// Alert threshold in volts
    pub threshold_volts: f64,
}

impl SessionConfig {
    /// Create a configuration with default parse mode and threshold
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            parse_mode: ParseMode::default(),
            threshold_volts: DEFAULT_THRESHOLD_VOLTS,
        }
    }

    /// Set the wire format
    #[must_use]
    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = mode;
        self
    }

    /// Set the alert threshold
    #[must_use]
    pub fn threshold_volts(mut self, volts: f64) -> Self {
        self.threshold_volts = volts;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("COM1", 9600)
    }
}

/// Events published to the UI collaborator, in production order
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A voltage reading was decoded
    Reading(VoltageReading),
    /// Session state changed
    StateChanged(SessionState),
    /// The threshold was crossed upward
    Alert(ThresholdAlert),
    /// The read loop hit an I/O error and the session closed itself.
    /// Emitted at most once per session; there is no automatic reopen.
    ReadFailure(String),
    /// Diagnostic trace of connect/disconnect/parse events
    Log(String),
}

/// Serial session owning one device handle, its read worker, and the chart
/// history.
///
/// The session outlives individual connections: `subscribe()` and `buffer()`
/// stay valid across open/close cycles.
pub struct SerialSession {
    id: Uuid,
    state: Arc<RwLock<SessionState>>,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    buffer: Arc<DisplayBuffer>,
    event_tx: broadcast::Sender<SessionEvent>,
    // one flag per connection: a worker that overstays the close grace
    // period keeps its own (set) flag and can never observe a successor's
    stop: Mutex<Arc<AtomicBool>>,
    worker_done: Mutex<Option<oneshot::Receiver<()>>>,
    config: RwLock<Option<SessionConfig>>,
}

impl SerialSession {
    /// Create a closed session
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            id: Uuid::new_v4(),
            state: Arc::new(RwLock::new(SessionState::Closed)),
            port: Arc::new(Mutex::new(None)),
            buffer: Arc::new(DisplayBuffer::new()),
            event_tx,
            stop: Mutex::new(Arc::new(AtomicBool::new(true))),
            worker_done: Mutex::new(None),
            config: RwLock::new(None),
        }
    }

    /// Unique session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the session currently holds an open device
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Configuration of the current (or last) connection
    pub fn config(&self) -> Option<SessionConfig> {
        self.config.read().clone()
    }

    /// Chart history fed by the read worker
    pub fn buffer(&self) -> Arc<DisplayBuffer> {
        self.buffer.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Open the configured device and start the read worker.
    ///
    /// Fails with [`OpenError::PortNotFound`] when the port is absent from
    /// the registry snapshot, [`OpenError::AlreadyInUse`] when the OS holds
    /// the device for someone else (retried for up to one second to ride out
    /// handle-release latency), and [`OpenError::PermissionDenied`] for
    /// access-control failures. On success the session is Open and readings
    /// start flowing on the event channel.
    pub async fn open(&self, config: SessionConfig) -> Result<(), OpenError> {
        if matches!(
            self.state(),
            SessionState::Open | SessionState::Closing
        ) {
            // A previous connection that was never torn down cleanly; close
            // it and let the OS release the handle before reopening.
            self.log(format!(
                "closing previous connection before reopening {}",
                config.port_name
            ));
            self.close().await;
        }

        if !self.try_begin_open() {
            // another caller is mid-open on this session
            return Err(OpenError::AlreadyInUse(config.port_name.clone()));
        }
        self.log(format!(
            "connecting to {} at {} baud ({} mode)",
            config.port_name,
            config.baud_rate,
            config.parse_mode.name()
        ));

        let snapshot = match registry::list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                self.set_state(SessionState::Closed);
                return Err(OpenError::OpenFailed(e.to_string()));
            }
        };
        if !snapshot
            .iter()
            .any(|p| p.system_name == config.port_name)
        {
            self.set_state(SessionState::Closed);
            return Err(OpenError::PortNotFound(config.port_name.clone()));
        }

        let port = match self.open_with_retry(&config).await {
            Ok(port) => port,
            Err(e) => {
                self.set_state(SessionState::Closed);
                return Err(e);
            }
        };

        *self.port.lock() = Some(port);
        let stop = Arc::new(AtomicBool::new(false));
        *self.stop.lock() = stop.clone();
        self.buffer.clear();
        *self.config.write() = Some(config.clone());

        let (done_tx, done_rx) = oneshot::channel();
        *self.worker_done.lock() = Some(done_rx);

        let worker = ReadWorker {
            session_id: self.id,
            port_name: config.port_name.clone(),
            state: self.state.clone(),
            port: self.port.clone(),
            buffer: self.buffer.clone(),
            event_tx: self.event_tx.clone(),
            stop,
            parser: FrameParser::new(config.parse_mode),
            monitor: ThresholdMonitor::new(config.threshold_volts),
        };
        tokio::spawn(async move {
            worker.run().await;
            let _ = done_tx.send(());
        });

        self.set_state(SessionState::Open);
        info!(session = %self.id, port = %config.port_name, baud = config.baud_rate, "port opened");
        self.log(format!("port {} opened", config.port_name));
        Ok(())
    }

    /// Close the session.
    ///
    /// Idempotent and infallible: signals the worker, waits up to the grace
    /// period for it to acknowledge, then force-releases the device either
    /// way. The session always ends Closed.
    pub async fn close(&self) {
        if self.state() == SessionState::Closed {
            return;
        }

        self.set_state(SessionState::Closing);
        self.stop.lock().store(true, Ordering::SeqCst);

        let done = self.worker_done.lock().take();
        if let Some(done) = done {
            if tokio::time::timeout(CLOSE_GRACE, done).await.is_err() {
                warn!(session = %self.id, "read worker did not stop within grace period");
            }
        }

        *self.port.lock() = None;
        self.set_state(SessionState::Closed);
        info!(session = %self.id, "port closed");
        self.log("port closed");
    }

    async fn open_with_retry(
        &self,
        config: &SessionConfig,
    ) -> Result<Box<dyn SerialPort>, OpenError> {
        let deadline = Instant::now() + OPEN_RETRY_WINDOW;
        loop {
            match Self::open_port(config) {
                Ok(port) => return Ok(port),
                Err(OpenError::AlreadyInUse(name)) if Instant::now() < deadline => {
                    // The OS can keep a freshly released handle busy for a
                    // moment after an ungraceful shutdown.
                    debug!(port = %name, "port busy, retrying open");
                    tokio::time::sleep(OPEN_RETRY_STEP).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn open_port(config: &SessionConfig) -> Result<Box<dyn SerialPort>, OpenError> {
        serialport::new(&config.port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| classify_open_error(&config.port_name, &e))
    }

    fn set_state(&self, next: SessionState) {
        *self.state.write() = next;
        let _ = self.event_tx.send(SessionEvent::StateChanged(next));
    }

    /// Claim the Closed → Opening transition. Exactly one of any concurrent
    /// callers wins; losers must not touch the shared connection fields.
    fn try_begin_open(&self) -> bool {
        {
            let mut state = self.state.write();
            if *state != SessionState::Closed {
                return false;
            }
            *state = SessionState::Opening;
        }
        let _ = self
            .event_tx
            .send(SessionEvent::StateChanged(SessionState::Opening));
        true
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(session = %self.id, "{message}");
        let _ = self.event_tx.send(SessionEvent::Log(message));
    }
}

impl Default for SerialSession {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_open_error(port_name: &str, err: &serialport::Error) -> OpenError {
    let name = port_name.to_string();
    match err.kind() {
        serialport::ErrorKind::NoDevice => OpenError::PortNotFound(name),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            OpenError::PermissionDenied(name)
        }
        _ => {
            let text = err.to_string();
            let lower = text.to_lowercase();
            if lower.contains("busy") || lower.contains("in use") || lower.contains("locked") {
                OpenError::AlreadyInUse(name)
            } else {
                OpenError::OpenFailed(text)
            }
        }
    }
}

/// The dedicated read-and-parse worker for one connection.
///
/// Generic over the handle so the loop can be driven by any `Read`
/// implementation; the session instantiates it with the real device.
struct ReadWorker<P: Read + Send> {
    session_id: Uuid,
    port_name: String,
    state: Arc<RwLock<SessionState>>,
    port: Arc<Mutex<Option<P>>>,
    buffer: Arc<DisplayBuffer>,
    event_tx: broadcast::Sender<SessionEvent>,
    stop: Arc<AtomicBool>,
    parser: FrameParser,
    monitor: ThresholdMonitor,
}

impl<P: Read + Send> ReadWorker<P> {
    async fn run(mut self) {
        let mut buf = vec![0u8; 1024];

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let result = {
                let mut guard = self.port.lock();
                match guard.as_mut() {
                    Some(port) => port.read(&mut buf),
                    // handle was force-released under us
                    None => break,
                }
            };

            match result {
                Ok(0) => {
                    if self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    self.fail("device reported end of stream".to_string());
                    return;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    self.ingest(&chunk);
                    // keep the executor serviced between blocking polls
                    tokio::task::yield_now().await;
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    // no data in this poll
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => {
                    if self.stop.load(Ordering::SeqCst) {
                        // caller-initiated close interrupted the in-flight
                        // read; swallow it
                        break;
                    }
                    self.fail(e.to_string());
                    return;
                }
            }
        }
    }

    fn ingest(&mut self, chunk: &[u8]) {
        let readings = self.parser.push_bytes(chunk);
        if readings.is_empty() {
            debug!(
                session = %self.session_id,
                len = chunk.len(),
                "chunk yielded no readings"
            );
            let _ = self.event_tx.send(SessionEvent::Log(format!(
                "received {} bytes, no reading decoded",
                chunk.len()
            )));
            return;
        }

        for reading in readings {
            self.buffer.append(reading);
            let _ = self.event_tx.send(SessionEvent::Reading(reading));
            let _ = self.event_tx.send(SessionEvent::Log(format!(
                "voltage read: {:.2} V",
                reading.value
            )));

            if let Some(alert) = self.monitor.observe(&reading) {
                warn!(
                    session = %self.session_id,
                    value = alert.value,
                    threshold = alert.threshold,
                    "threshold exceeded"
                );
                let _ = self.event_tx.send(SessionEvent::Alert(alert));
            }
        }
    }

    /// Terminal I/O failure: report once, release the device, end Closed.
    fn fail(&self, message: String) {
        warn!(session = %self.session_id, port = %self.port_name, "read failure: {message}");
        let _ = self.event_tx.send(SessionEvent::ReadFailure(message));
        *self.port.lock() = None;
        *self.state.write() = SessionState::Closed;
        let _ = self
            .event_tx
            .send(SessionEvent::StateChanged(SessionState::Closed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_session_is_closed() {
        let session = SerialSession::new();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_open());
        assert!(session.config().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = SerialSession::new();
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_unknown_port_fails_fast() {
        let session = SerialSession::new();
        let config = SessionConfig::new("voltmon-no-such-port", 9600);
        let err = session.open(config).await.unwrap_err();
        assert!(matches!(err, OpenError::PortNotFound(_)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_open_emits_state_transitions() {
        let session = SerialSession::new();
        let mut rx = session.subscribe();

        let config = SessionConfig::new("voltmon-no-such-port", 9600);
        assert!(session.open(config).await.is_err());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![SessionState::Opening, SessionState::Closed]);
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new("/dev/ttyACM0", 115_200)
            .parse_mode(ParseMode::RawScan)
            .threshold_volts(3.3);
        assert_eq!(config.parse_mode, ParseMode::RawScan);
        assert_eq!(config.threshold_volts, 3.3);
        assert_eq!(config.baud_rate, 115_200);
    }

    #[test]
    fn test_classify_no_device() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "gone");
        assert!(matches!(
            classify_open_error("COM9", &err),
            OpenError::PortNotFound(_)
        ));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "eacces",
        );
        assert!(matches!(
            classify_open_error("COM9", &err),
            OpenError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_classify_busy_text_as_in_use() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::Other),
            "Device or resource busy",
        );
        assert!(matches!(
            classify_open_error("COM9", &err),
            OpenError::AlreadyInUse(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_open_claim_has_one_winner() {
        let session = SerialSession::new();
        assert!(session.try_begin_open());
        assert_eq!(session.state(), SessionState::Opening);
        // a second caller racing into open() must not also claim it
        assert!(!session.try_begin_open());
    }

    // Scripted stand-in for the device handle, driving the worker loop
    // through the paths real hardware would take.
    enum ScriptStep {
        Chunk(&'static [u8]),
        Fail(std::io::ErrorKind),
        StopAndFail(Arc<AtomicBool>),
    }

    struct ScriptedPort {
        steps: std::collections::VecDeque<ScriptStep>,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.steps.pop_front() {
                Some(ScriptStep::Chunk(data)) => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                Some(ScriptStep::Fail(kind)) => {
                    Err(std::io::Error::new(kind, "scripted failure"))
                }
                Some(ScriptStep::StopAndFail(stop)) => {
                    // the caller closes while this read is in flight
                    stop.store(true, Ordering::SeqCst);
                    Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "interrupted",
                    ))
                }
                None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
            }
        }
    }

    struct WorkerHarness {
        state: Arc<RwLock<SessionState>>,
        port: Arc<Mutex<Option<ScriptedPort>>>,
        buffer: Arc<DisplayBuffer>,
        rx: broadcast::Receiver<SessionEvent>,
    }

    fn scripted_worker(
        steps: Vec<ScriptStep>,
        stop: Arc<AtomicBool>,
    ) -> (ReadWorker<ScriptedPort>, WorkerHarness) {
        let (event_tx, rx) = broadcast::channel(64);
        let state = Arc::new(RwLock::new(SessionState::Open));
        let port = Arc::new(Mutex::new(Some(ScriptedPort {
            steps: steps.into(),
        })));
        let buffer = Arc::new(DisplayBuffer::new());

        let worker = ReadWorker {
            session_id: Uuid::new_v4(),
            port_name: "scripted".to_string(),
            state: state.clone(),
            port: port.clone(),
            buffer: buffer.clone(),
            event_tx,
            stop,
            parser: FrameParser::new(ParseMode::LineTagged),
            monitor: ThresholdMonitor::new(DEFAULT_THRESHOLD_VOLTS),
        };

        (
            worker,
            WorkerHarness {
                state,
                port,
                buffer,
                rx,
            },
        )
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_worker_reports_read_failure_once_and_closes() {
        let stop = Arc::new(AtomicBool::new(false));
        let (worker, mut harness) = scripted_worker(
            vec![
                ScriptStep::Chunk(b"Tensiunea de pe pin:\n4.5\n"),
                ScriptStep::Fail(std::io::ErrorKind::BrokenPipe),
            ],
            stop,
        );

        worker.run().await;

        let events = drain(&mut harness.rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::ReadFailure(_)))
            .count();
        assert_eq!(failures, 1);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Alert(_))));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::StateChanged(SessionState::Closed))
        ));
        assert_eq!(*harness.state.read(), SessionState::Closed);
        assert!(harness.port.lock().is_none());
        assert_eq!(harness.buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_worker_end_of_stream_is_a_failure() {
        let stop = Arc::new(AtomicBool::new(false));
        let (worker, mut harness) = scripted_worker(vec![ScriptStep::Chunk(b"")], stop);

        worker.run().await;

        let events = drain(&mut harness.rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::ReadFailure(_)))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(*harness.state.read(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_worker_swallows_error_from_caller_initiated_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        let (worker, mut harness) =
            scripted_worker(vec![ScriptStep::StopAndFail(stop.clone())], stop);

        worker.run().await;

        let events = drain(&mut harness.rx);
        assert!(events
            .iter()
            .all(|e| !matches!(e, SessionEvent::ReadFailure(_))));
        // the worker leaves the transition to close()
        assert_eq!(*harness.state.read(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_stopped_worker_never_touches_a_replacement_port() {
        // a worker that overstayed the close grace period holds its own,
        // already-set flag; a handle installed by a later open() must stay
        // untouched
        let stop = Arc::new(AtomicBool::new(true));
        let (worker, mut harness) =
            scripted_worker(vec![ScriptStep::Chunk(b"3.0\n")], stop);

        worker.run().await;

        assert!(drain(&mut harness.rx).is_empty());
        let untouched = harness.port.lock().as_ref().map(|p| p.steps.len());
        assert_eq!(untouched, Some(1));
        assert!(harness.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_worker_logs_discarded_chunks() {
        let stop = Arc::new(AtomicBool::new(false));
        let (worker, mut harness) = scripted_worker(
            vec![
                ScriptStep::Chunk(b"???garbage???\n"),
                ScriptStep::Fail(std::io::ErrorKind::BrokenPipe),
            ],
            stop,
        );

        worker.run().await;

        let events = drain(&mut harness.rx);
        assert!(events.iter().any(
            |e| matches!(e, SessionEvent::Log(m) if m.contains("no reading decoded"))
        ));
    }
}
