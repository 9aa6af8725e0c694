//! The `serial-io` thread
//!
//! Owns the [`SerialLink`] for the lifetime of a connection. Each pass of the
//! loop drains the request inbox, writes the next queued command if none is
//! awaiting a response, reads whatever the controller sent, and expires
//! overdue requests.

use super::{BridgeConfig, CommandReply};
use crate::communication::line::LineAssembler;
use crate::communication::SerialLink;
use crate::firmware::grbl::{
    decode_alarm, decode_error, GrblResponse, GrblResponseParser, RealtimeCommand, StatusReport,
    WAKE_UP,
};
use gcodebridge_core::{
    AppEvent, CommunicationEvent, ConnectionError, ConnectionEvent, ControllerError,
    DisconnectReason, Error, ErrorEvent, EventBus, MachineEvent, Result,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// A request handed to the I/O thread
pub(crate) enum IoRequest {
    /// Line command, answered by its terminal response
    Command {
        line: String,
        timeout: Duration,
        reply: oneshot::Sender<Result<CommandReply>>,
    },
    /// Wait for the next status report, polling with `?` if needed
    Status {
        timeout: Duration,
        reply: oneshot::Sender<Result<StatusReport>>,
    },
    /// Single realtime byte, written ahead of any queued command
    Realtime {
        command: RealtimeCommand,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct Queued {
    line: String,
    timeout: Duration,
    reply: oneshot::Sender<Result<CommandReply>>,
}

struct InFlight {
    line: String,
    lines: Vec<String>,
    timeout: Duration,
    deadline: Instant,
    reply: oneshot::Sender<Result<CommandReply>>,
}

struct StatusWaiter {
    timeout: Duration,
    deadline: Instant,
    reply: oneshot::Sender<Result<StatusReport>>,
}

enum Exit {
    /// Every request sender was dropped
    Closed,
    /// The link failed
    Failed(io::Error),
}

pub(crate) struct IoLoop {
    link: Box<dyn SerialLink>,
    port: String,
    requests: mpsc::UnboundedReceiver<IoRequest>,
    events: Arc<EventBus>,
    init_delay: Duration,
    alive: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    lines: LineAssembler,
    parser: GrblResponseParser,
    queue: VecDeque<Queued>,
    in_flight: Option<InFlight>,
    status_waiters: Vec<StatusWaiter>,
    /// `ok`/`error` lines still owed to commands that timed out
    unacknowledged: usize,
}

impl IoLoop {
    pub(crate) fn new(
        link: Box<dyn SerialLink>,
        port: String,
        requests: mpsc::UnboundedReceiver<IoRequest>,
        events: Arc<EventBus>,
        config: &BridgeConfig,
        alive: Arc<AtomicBool>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            link,
            port,
            requests,
            events,
            init_delay: config.init_delay,
            alive,
            pending,
            lines: LineAssembler::with_max_line_bytes(config.max_line_bytes),
            parser: GrblResponseParser::new(),
            queue: VecDeque::new(),
            in_flight: None,
            status_waiters: Vec::new(),
            unacknowledged: 0,
        }
    }

    /// Thread body: initialise the controller, then serve requests until the
    /// bridge lets go or the link fails
    pub(crate) fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        if let Err(e) = self.initialize() {
            self.alive.store(false, Ordering::SeqCst);
            let _ = ready.send(Err(ConnectionError::FailedToOpen {
                port: self.port.clone(),
                reason: e.to_string(),
            }
            .into()));
            return;
        }
        let _ = ready.send(Ok(()));

        match self.serve() {
            Exit::Closed => {
                self.alive.store(false, Ordering::SeqCst);
                tracing::debug!("Serial I/O loop for {} stopped", self.port);
                self.fail_all("disconnected");
            }
            Exit::Failed(e) => {
                self.alive.store(false, Ordering::SeqCst);
                tracing::error!("Serial link {} failed: {}", self.port, e);
                self.fail_all(&e.to_string());
                self.publish(AppEvent::Error(ErrorEvent::new(
                    "serial-io",
                    format!("{}: {}", self.port, e),
                )));
                self.publish(AppEvent::Connection(ConnectionEvent::Disconnected {
                    port: self.port.clone(),
                    reason: DisconnectReason::ConnectionLost,
                }));
            }
        }
    }

    /// Wake GRBL up and discard its startup chatter
    fn initialize(&mut self) -> io::Result<()> {
        self.link.write_all(WAKE_UP)?;
        if !self.init_delay.is_zero() {
            std::thread::sleep(self.init_delay);
        }
        self.link.clear_input()?;
        self.lines.clear();
        tracing::debug!("Controller on {} initialised", self.port);
        Ok(())
    }

    fn serve(&mut self) -> Exit {
        let mut buf = [0u8; 256];

        loop {
            loop {
                match self.requests.try_recv() {
                    Ok(request) => {
                        if let Err(e) = self.accept(request) {
                            return Exit::Failed(e);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Exit::Closed,
                }
            }

            if let Err(e) = self.write_next() {
                return Exit::Failed(e);
            }

            match self.link.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    for line in self.lines.push(&buf[..n]) {
                        self.handle_line(line);
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Exit::Failed(e),
            }

            self.expire(Instant::now());
        }
    }

    fn accept(&mut self, request: IoRequest) -> io::Result<()> {
        match request {
            IoRequest::Command {
                line,
                timeout,
                reply,
            } => {
                self.queue.push_back(Queued {
                    line,
                    timeout,
                    reply,
                });
                Ok(())
            }
            IoRequest::Status { timeout, reply } => {
                let poll = self.status_waiters.is_empty();
                self.status_waiters.push(StatusWaiter {
                    timeout,
                    deadline: Instant::now() + timeout,
                    reply,
                });
                if poll {
                    self.link.write_all(&[RealtimeCommand::StatusQuery.byte()])?;
                }
                Ok(())
            }
            IoRequest::Realtime { command, reply } => {
                match self.link.write_all(&[command.byte()]) {
                    Ok(()) => {
                        tracing::debug!("Realtime command '{}' written", command);
                        let _ = reply.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(ConnectionError::ConnectionLost {
                            reason: e.to_string(),
                        }
                        .into()));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Write the next queued command unless one is already awaiting its response
    fn write_next(&mut self) -> io::Result<()> {
        if self.in_flight.is_some() {
            return Ok(());
        }
        let Some(next) = self.queue.pop_front() else {
            return Ok(());
        };

        let mut wire = Vec::with_capacity(next.line.len() + 1);
        wire.extend_from_slice(next.line.as_bytes());
        wire.push(b'\n');

        if let Err(e) = self.link.write_all(&wire) {
            self.finish();
            let _ = next.reply.send(Err(ConnectionError::ConnectionLost {
                reason: e.to_string(),
            }
            .into()));
            return Err(e);
        }

        tracing::debug!("TX: {}", next.line);
        self.publish(AppEvent::Communication(CommunicationEvent::DataSent {
            data: next.line.clone(),
        }));

        self.in_flight = Some(InFlight {
            line: next.line,
            lines: Vec::new(),
            timeout: next.timeout,
            deadline: Instant::now() + next.timeout,
            reply: next.reply,
        });
        Ok(())
    }

    fn handle_line(&mut self, line: String) {
        tracing::debug!("RX: {}", line);
        self.publish(AppEvent::Communication(CommunicationEvent::DataReceived {
            data: line.clone(),
        }));

        let Some(response) = self.parser.parse(&line) else {
            return;
        };

        if matches!(response, GrblResponse::Ok | GrblResponse::Error(_)) && self.unacknowledged > 0
        {
            self.unacknowledged -= 1;
            tracing::debug!("'{}' answers a command that already timed out", line);
            return;
        }

        match response {
            GrblResponse::Ok => self.complete(&line, |command, lines| {
                Ok(CommandReply {
                    command,
                    response: "ok".to_string(),
                    lines,
                })
            }),
            GrblResponse::Error(code) => {
                let message = decode_error(code);
                self.complete(&line, move |_, _| {
                    Err(ControllerError::CommandRejected { code, message }.into())
                });
            }
            GrblResponse::Alarm(code) => {
                let message = decode_alarm(code);
                tracing::warn!("Controller alarm {}: {}", code, message);
                self.publish(AppEvent::Machine(MachineEvent::AlarmTriggered {
                    code,
                    message: message.clone(),
                }));
                self.complete(&line, move |_, _| {
                    Err(ControllerError::Alarm { code, message }.into())
                });
            }
            GrblResponse::Status(report) => {
                self.publish(AppEvent::Machine(MachineEvent::StatusReport {
                    state: report.state.clone(),
                    machine_pos: report.machine_pos,
                    work_pos: report.work_pos,
                }));
                for waiter in std::mem::take(&mut self.status_waiters) {
                    self.finish();
                    let _ = waiter.reply.send(Ok(report.clone()));
                }
            }
            GrblResponse::Version(_) => {
                tracing::info!("Controller on {} reset: {}", self.port, line);
                self.unacknowledged = 0;
                if let Some(in_flight) = self.in_flight.take() {
                    self.finish();
                    let _ = in_flight.reply.send(Err(ControllerError::Reset.into()));
                }
            }
            GrblResponse::Setting { .. } | GrblResponse::Feedback(_) | GrblResponse::Message(_) => {
                // Output still owed to a timed-out command precedes its terminal line.
                if self.unacknowledged > 0 {
                    return;
                }
                if let Some(in_flight) = self.in_flight.as_mut() {
                    in_flight.lines.push(line);
                }
            }
        }
    }

    /// Resolve the in-flight command with a terminal response
    fn complete<F>(&mut self, terminal: &str, outcome: F)
    where
        F: FnOnce(String, Vec<String>) -> Result<CommandReply>,
    {
        match self.in_flight.take() {
            Some(in_flight) => {
                self.finish();
                let _ = in_flight
                    .reply
                    .send(outcome(in_flight.line, in_flight.lines));
            }
            None => tracing::debug!("Ignoring '{}' with no command pending", terminal),
        }
    }

    fn expire(&mut self, now: Instant) {
        if self.in_flight.as_ref().is_some_and(|f| f.deadline <= now) {
            if let Some(in_flight) = self.in_flight.take() {
                tracing::warn!(
                    "No response to '{}' within {}ms",
                    in_flight.line,
                    in_flight.timeout.as_millis()
                );
                self.publish(AppEvent::Communication(CommunicationEvent::Timeout {
                    operation: format!("command '{}'", in_flight.line),
                }));
                self.unacknowledged += 1;
                self.finish();
                let _ = in_flight.reply.send(Err(ControllerError::Timeout {
                    timeout_ms: in_flight.timeout.as_millis() as u64,
                }
                .into()));
            }
        }

        if self.status_waiters.iter().any(|w| w.deadline <= now) {
            let (expired, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.status_waiters)
                .into_iter()
                .partition(|w| w.deadline <= now);
            self.status_waiters = waiting;
            for waiter in expired {
                self.publish(AppEvent::Communication(CommunicationEvent::Timeout {
                    operation: "status query".to_string(),
                }));
                self.finish();
                let _ = waiter.reply.send(Err(ControllerError::Timeout {
                    timeout_ms: waiter.timeout.as_millis() as u64,
                }
                .into()));
            }
        }
    }

    /// Fail every outstanding request once the link is gone
    fn fail_all(&mut self, reason: &str) {
        let lost = || -> Error {
            ConnectionError::ConnectionLost {
                reason: reason.to_string(),
            }
            .into()
        };

        if let Some(in_flight) = self.in_flight.take() {
            self.finish();
            let _ = in_flight.reply.send(Err(lost()));
        }
        for queued in std::mem::take(&mut self.queue) {
            self.finish();
            let _ = queued.reply.send(Err(lost()));
        }
        for waiter in std::mem::take(&mut self.status_waiters) {
            self.finish();
            let _ = waiter.reply.send(Err(lost()));
        }

        // Requests that raced the shutdown are still in the channel.
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                IoRequest::Command { reply, .. } => {
                    self.finish();
                    let _ = reply.send(Err(lost()));
                }
                IoRequest::Status { reply, .. } => {
                    self.finish();
                    let _ = reply.send(Err(lost()));
                }
                IoRequest::Realtime { reply, .. } => {
                    let _ = reply.send(Err(lost()));
                }
            }
        }
    }

    fn finish(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn publish(&self, event: AppEvent) {
        // No subscribers is normal.
        let _ = self.events.publish(event);
    }
}
