//! Serial bridge
//!
//! [`SerialBridge`] is the single owner of the controller connection. The
//! open [`SerialLink`] lives on a dedicated `serial-io` thread; every caller
//! talks to that thread over a channel and awaits a oneshot reply, so reads
//! and writes on the port are never interleaved.
//!
//! Line commands run strictly one at a time in submission order. Each is
//! answered by the controller's terminal line: `ok` resolves to a
//! [`CommandReply`], `error:N` and `ALARM:N` resolve to structured
//! [`ControllerError`]s. Every line the controller prints is also published on
//! the [`EventBus`] as it arrives.

mod io_loop;

use crate::communication::serial::{detect_port, list_ports, RealSerialPort};
use crate::communication::simulator::SimulatedGrbl;
use crate::communication::{ConnectionParams, SerialLink};
use crate::firmware::grbl::{
    validate_command, JogRequest, RealtimeCommand, StatusReport, HOME, UNLOCK,
};
use async_trait::async_trait;
use gcodebridge_core::{
    AppEvent, ConnectionError, ConnectionEvent, ControllerError, DisconnectReason, Error,
    EventBus, EventCategory, EventFilter, MachineEvent, Result,
};
use io_loop::{IoLoop, IoRequest};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle as TaskHandle;

/// Timing and limits for the bridge
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Pause after the wake-up sequence before input is discarded
    pub init_delay: Duration,
    /// How long a line command may wait for its terminal response
    pub command_timeout: Duration,
    /// Response timeout for the homing cycle
    pub home_timeout: Duration,
    /// How long [`Controller::query_status`] waits for a report
    pub status_timeout: Duration,
    /// Longest accepted command, in bytes
    pub max_command_length: usize,
    /// Most requests allowed to wait on the serial line at once
    pub queue_depth: usize,
    /// Longest controller output line kept before it is discarded
    pub max_line_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            init_delay: Duration::from_millis(2000),
            command_timeout: Duration::from_millis(5000),
            home_timeout: Duration::from_millis(60_000),
            status_timeout: Duration::from_millis(1000),
            max_command_length: 256,
            queue_depth: 32,
            max_line_bytes: crate::communication::line::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Connection state as seen by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BridgeState {
    /// No controller attached
    Disconnected,
    /// Attached to the controller on `port`
    Connected {
        /// Port name
        port: String,
    },
}

impl BridgeState {
    /// Whether a controller is attached
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Successful outcome of a line command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    /// The command as written, without its newline
    pub command: String,
    /// The terminal line (`ok`)
    pub response: String,
    /// Informational lines printed before the terminal line
    pub lines: Vec<String>,
}

/// Per-call overrides for [`Controller::connect`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Port name or `"auto"`; the configured port when absent
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate; the configured rate when absent
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

/// Operations the HTTP surface drives
#[async_trait]
pub trait Controller: Send + Sync {
    /// Send one line command and wait for its terminal response
    async fn send_command(&self, command: &str) -> Result<CommandReply>;

    /// Run the homing cycle (`$H`)
    async fn home(&self) -> Result<CommandReply>;

    /// Relative jog
    async fn jog(&self, request: JogRequest) -> Result<CommandReply>;

    /// Clear an alarm lock (`$X`)
    async fn unlock(&self) -> Result<CommandReply>;

    /// Write a realtime byte without waiting for an acknowledgement
    async fn realtime(&self, command: RealtimeCommand) -> Result<()>;

    /// Poll for and return the next status report
    async fn query_status(&self) -> Result<StatusReport>;

    /// Open the controller port and attach to it; returns the port name
    async fn connect(&self, options: ConnectOptions) -> Result<String>;

    /// Detach from the controller; a no-op when not connected
    async fn disconnect(&self) -> Result<()>;

    /// Current connection state
    fn state(&self) -> BridgeState;

    /// Bus carrying controller output and connection events
    fn events(&self) -> Arc<EventBus>;
}

/// Opens a [`SerialLink`] for the bridge
///
/// Called on a blocking thread. Returns the resolved port name with the link.
pub trait LinkOpener: Send + Sync {
    /// Open a link for `params`
    fn open(&self, params: &ConnectionParams) -> Result<(String, Box<dyn SerialLink>)>;
}

/// Opens real serial ports, auto-detecting when the port is `"auto"`
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl LinkOpener for SerialPortOpener {
    fn open(&self, params: &ConnectionParams) -> Result<(String, Box<dyn SerialLink>)> {
        let mut params = params.clone();
        if params.is_auto() {
            let ports = list_ports()?;
            params.port = detect_port(&ports)?.port_name;
        }

        let port = RealSerialPort::open(&params)?;
        Ok((params.port, Box::new(port)))
    }
}

/// Opens a fresh [`SimulatedGrbl`] on every connect
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatorOpener;

impl LinkOpener for SimulatorOpener {
    fn open(&self, _params: &ConnectionParams) -> Result<(String, Box<dyn SerialLink>)> {
        let sim = SimulatedGrbl::new();
        Ok((sim.name(), Box::new(sim)))
    }
}

struct LinkHandle {
    port: String,
    requests: mpsc::UnboundedSender<IoRequest>,
    pending: Arc<AtomicUsize>,
    alive: Arc<AtomicBool>,
    /// Set once the wake-up sequence has finished
    ready: bool,
    thread: Option<JoinHandle<()>>,
}

impl LinkHandle {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Alive and past initialisation
    fn is_active(&self) -> bool {
        self.ready && self.is_alive()
    }

    /// Claim a queue slot, failing with `Busy` when the queue is full
    fn reserve(&self, depth: usize) -> std::result::Result<(), ControllerError> {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < depth).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|pending| ControllerError::Busy { pending })
    }

    fn release(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn submit(&self, request: IoRequest) -> Result<()> {
        self.requests.send(request).map_err(|_| {
            Error::from(ConnectionError::ConnectionLost {
                reason: "serial I/O thread has stopped".to_string(),
            })
        })
    }

    /// Stop the I/O thread and wait for it to let go of the port
    fn close(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Serial I/O thread panicked");
            }
        }
    }
}

/// The serial bridge
pub struct SerialBridge {
    config: BridgeConfig,
    params: Mutex<ConnectionParams>,
    events: Arc<EventBus>,
    opener: Arc<dyn LinkOpener>,
    link: Mutex<Option<LinkHandle>>,
    connecting: tokio::sync::Mutex<()>,
    user_disconnected: AtomicBool,
}

impl SerialBridge {
    /// Create a disconnected bridge
    ///
    /// `params` are used by [`Controller::connect`] unless overridden per call.
    pub fn new(
        config: BridgeConfig,
        params: ConnectionParams,
        opener: Arc<dyn LinkOpener>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            params: Mutex::new(params),
            events,
            opener,
            link: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
            user_disconnected: AtomicBool::new(false),
        }
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connection parameters the next connect will use
    pub fn connection_params(&self) -> ConnectionParams {
        self.params.lock().clone()
    }

    /// Name of the attached port, if any
    pub fn port_name(&self) -> Option<String> {
        match self.state() {
            BridgeState::Connected { port } => Some(port),
            BridgeState::Disconnected => None,
        }
    }

    /// Requests currently queued or awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.link
            .lock()
            .as_ref()
            .map(|h| h.pending.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Take ownership of an open link and start the I/O thread
    ///
    /// Runs the wake-up sequence before returning, then publishes `Connected`.
    pub async fn attach(&self, link: Box<dyn SerialLink>, port: impl Into<String>) -> Result<()> {
        let port = port.into();
        let (ready_tx, ready_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));

        let stale = {
            let mut guard = self.link.lock();
            if let Some(handle) = guard.as_ref() {
                if handle.is_alive() {
                    return Err(ConnectionError::AlreadyConnected {
                        port: handle.port.clone(),
                    }
                    .into());
                }
            }
            let stale = guard.take();

            let (requests, inbox) = mpsc::unbounded_channel();
            let pending = Arc::new(AtomicUsize::new(0));
            let io = IoLoop::new(
                link,
                port.clone(),
                inbox,
                self.events.clone(),
                &self.config,
                alive.clone(),
                pending.clone(),
            );
            let thread = std::thread::Builder::new()
                .name("serial-io".to_string())
                .spawn(move || io.run(ready_tx))?;

            *guard = Some(LinkHandle {
                port: port.clone(),
                requests,
                pending,
                alive: alive.clone(),
                ready: false,
                thread: Some(thread),
            });
            stale
        };

        // A link that died on its own leaves a finished thread behind.
        if let Some(stale) = stale {
            stale.close();
        }

        let ready = ready_rx.await.unwrap_or_else(|_| {
            Err(ConnectionError::ConnectionLost {
                reason: "serial I/O thread exited during initialisation".to_string(),
            }
            .into())
        });

        if let Err(e) = ready {
            if let Some(handle) = self.take_link(&alive) {
                let _ = tokio::task::spawn_blocking(move || handle.close()).await;
            }
            return Err(e);
        }

        // A disconnect may have taken the link while it was initialising.
        let installed = match self.link.lock().as_mut() {
            Some(handle) if Arc::ptr_eq(&handle.alive, &alive) && handle.is_alive() => {
                handle.ready = true;
                true
            }
            _ => false,
        };
        if !installed {
            tracing::info!("Link to {} closed during initialisation", port);
            return Err(ConnectionError::ConnectionLost {
                reason: "disconnected while the controller was initialising".to_string(),
            }
            .into());
        }

        self.user_disconnected.store(false, Ordering::SeqCst);
        tracing::info!("Connected to controller on {}", port);
        self.publish(AppEvent::Connection(ConnectionEvent::Connected { port }));
        Ok(())
    }

    /// Retry [`Controller::connect`] every `interval` while disconnected
    ///
    /// A lost link is retried straight away rather than on the next tick.
    /// Stops retrying after an explicit disconnect until the next successful
    /// connect. The task ends when the bridge is dropped.
    pub fn spawn_supervisor(self: &Arc<Self>, interval: Duration) -> TaskHandle<()> {
        let bridge = Arc::downgrade(self);
        let events = self.events.clone();
        let link_lost = Arc::new(Notify::new());

        let wake = link_lost.clone();
        let subscription = events.subscribe(
            EventFilter::Categories(vec![EventCategory::Connection]),
            move |event| {
                if let AppEvent::Connection(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::ConnectionLost,
                    ..
                }) = event
                {
                    wake.notify_one();
                }
            },
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = link_lost.notified() => {
                        tracing::info!("Controller link lost, reconnecting");
                    }
                }
                let Some(bridge) = bridge.upgrade() else {
                    break;
                };
                if bridge.state().is_connected()
                    || bridge.user_disconnected.load(Ordering::SeqCst)
                {
                    continue;
                }

                tracing::debug!("Attempting to reconnect");
                if let Err(e) = bridge.connect(ConnectOptions::default()).await {
                    tracing::warn!("Reconnect failed: {}", e);
                }
            }

            events.unsubscribe(subscription);
        })
    }

    /// Disconnect for process shutdown
    pub async fn shutdown(&self) {
        self.close(DisconnectReason::Shutdown).await;
    }

    async fn close(&self, reason: DisconnectReason) {
        let Some(handle) = self.link.lock().take() else {
            return;
        };

        let was_active = handle.is_active();
        let port = handle.port.clone();
        if tokio::task::spawn_blocking(move || handle.close())
            .await
            .is_err()
        {
            tracing::error!("Failed to join serial I/O thread for {}", port);
        }

        if was_active {
            tracing::info!("Disconnected from {}", port);
            self.publish(AppEvent::Connection(ConnectionEvent::Disconnected {
                port,
                reason,
            }));
        }
    }

    fn take_link(&self, alive: &Arc<AtomicBool>) -> Option<LinkHandle> {
        let mut guard = self.link.lock();
        if guard.as_ref().is_some_and(|h| Arc::ptr_eq(&h.alive, alive)) {
            guard.take()
        } else {
            None
        }
    }

    /// Queue a line command and return the receiver for its outcome
    fn enqueue(
        &self,
        line: String,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<CommandReply>>> {
        let guard = self.link.lock();
        let handle = guard
            .as_ref()
            .filter(|h| h.is_active())
            .ok_or(ConnectionError::NotConnected)?;

        handle.reserve(self.config.queue_depth)?;
        let (reply, rx) = oneshot::channel();
        if let Err(e) = handle.submit(IoRequest::Command {
            line,
            timeout,
            reply,
        }) {
            handle.release();
            return Err(e);
        }
        Ok(rx)
    }

    async fn execute(&self, line: String, timeout: Duration) -> Result<CommandReply> {
        let rx = self.enqueue(line, timeout)?;
        await_reply(rx).await
    }

    fn publish(&self, event: AppEvent) {
        let _ = self.events.publish(event);
    }
}

async fn await_reply<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await.unwrap_or_else(|_| {
        Err(ConnectionError::ConnectionLost {
            reason: "serial I/O thread dropped the request".to_string(),
        }
        .into())
    })
}

#[async_trait]
impl Controller for SerialBridge {
    async fn send_command(&self, command: &str) -> Result<CommandReply> {
        let line = validate_command(command, self.config.max_command_length)?;
        self.execute(line, self.config.command_timeout).await
    }

    async fn home(&self) -> Result<CommandReply> {
        let rx = self.enqueue(HOME.to_string(), self.config.home_timeout)?;
        self.publish(AppEvent::Machine(MachineEvent::HomingStarted));
        await_reply(rx).await
    }

    async fn jog(&self, request: JogRequest) -> Result<CommandReply> {
        let line = request.to_command()?;
        let line = validate_command(&line, self.config.max_command_length)?;
        self.execute(line, self.config.command_timeout).await
    }

    async fn unlock(&self) -> Result<CommandReply> {
        self.execute(UNLOCK.to_string(), self.config.command_timeout)
            .await
    }

    async fn realtime(&self, command: RealtimeCommand) -> Result<()> {
        let rx = {
            let guard = self.link.lock();
            let handle = guard
                .as_ref()
                .filter(|h| h.is_active())
                .ok_or(ConnectionError::NotConnected)?;
            let (reply, rx) = oneshot::channel();
            handle.submit(IoRequest::Realtime { command, reply })?;
            rx
        };
        await_reply(rx).await
    }

    async fn query_status(&self) -> Result<StatusReport> {
        let rx = {
            let guard = self.link.lock();
            let handle = guard
                .as_ref()
                .filter(|h| h.is_active())
                .ok_or(ConnectionError::NotConnected)?;
            handle.reserve(self.config.queue_depth)?;
            let (reply, rx) = oneshot::channel();
            if let Err(e) = handle.submit(IoRequest::Status {
                timeout: self.config.status_timeout,
                reply,
            }) {
                handle.release();
                return Err(e);
            }
            rx
        };
        await_reply(rx).await
    }

    async fn connect(&self, options: ConnectOptions) -> Result<String> {
        let _attempt = self.connecting.lock().await;

        if let BridgeState::Connected { port } = self.state() {
            return Err(ConnectionError::AlreadyConnected { port }.into());
        }

        let mut params = self.params.lock().clone();
        if let Some(port) = options.port {
            params.port = port;
        }
        if let Some(baud_rate) = options.baud_rate {
            params.baud_rate = baud_rate;
        }
        if params.baud_rate == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "baud rate must be non-zero".to_string(),
            }
            .into());
        }

        let target = if params.is_auto() {
            "auto".to_string()
        } else {
            params.port.clone()
        };
        tracing::info!("Connecting to {} at {} baud", target, params.baud_rate);
        self.publish(AppEvent::Connection(ConnectionEvent::Connecting {
            port: target.clone(),
        }));

        let opener = self.opener.clone();
        let open_params = params.clone();
        let result = match tokio::task::spawn_blocking(move || opener.open(&open_params)).await {
            Ok(Ok((port, link))) => self.attach(link, port.clone()).await.map(|()| port),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::other(format!("port open task failed: {}", e))),
        };

        match &result {
            Ok(_) => *self.params.lock() = params,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", target, e);
                self.publish(AppEvent::Connection(ConnectionEvent::ConnectionFailed {
                    port: target,
                    error: e.to_string(),
                }));
            }
        }
        result
    }

    async fn disconnect(&self) -> Result<()> {
        self.user_disconnected.store(true, Ordering::SeqCst);
        self.close(DisconnectReason::UserRequested).await;
        Ok(())
    }

    fn state(&self) -> BridgeState {
        match self.link.lock().as_ref() {
            Some(handle) if handle.is_active() => BridgeState::Connected {
                port: handle.port.clone(),
            },
            _ => BridgeState::Disconnected,
        }
    }

    fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }
}

impl std::fmt::Debug for SerialBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBridge")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> SerialBridge {
        SerialBridge::new(
            BridgeConfig {
                init_delay: Duration::ZERO,
                ..BridgeConfig::default()
            },
            ConnectionParams::default(),
            Arc::new(SimulatorOpener),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn test_bridge_state_serialization() {
        let state = BridgeState::Connected {
            port: "/dev/ttyUSB0".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["port"], "/dev/ttyUSB0");

        let json = serde_json::to_value(BridgeState::Disconnected).unwrap();
        assert_eq!(json["state"], "disconnected");
    }

    #[test]
    fn test_connect_options_are_optional() {
        let options: ConnectOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ConnectOptions::default());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let bridge = bridge();
        assert_eq!(bridge.state(), BridgeState::Disconnected);

        let err = bridge.send_command("G0 X1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::NotConnected)
        ));
        assert!(bridge.realtime(RealtimeCommand::FeedHold).await.is_err());
        assert!(bridge.query_status().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_command_checked_before_connection() {
        let bridge = bridge();
        let err = bridge.send_command("  ").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Controller(ControllerError::InvalidCommand { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let bridge = bridge();
        bridge.disconnect().await.unwrap();
        bridge.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_simulator() {
        let bridge = bridge();
        let port = bridge.connect(ConnectOptions::default()).await.unwrap();
        assert_eq!(port, "simulator");
        assert_eq!(bridge.port_name().as_deref(), Some("simulator"));

        let err = bridge
            .connect(ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::AlreadyConnected { .. })
        ));

        bridge.disconnect().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Disconnected);
    }
}
