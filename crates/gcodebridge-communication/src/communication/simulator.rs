//! In-process GRBL simulator
//!
//! Emulates enough of GRBL 1.1 to drive the bridge without hardware:
//! acknowledgements, error codes for malformed blocks, the alarm lock,
//! status reports, and the informational `$` commands. Used by the
//! `--simulate` mode and by tests.

use super::SerialLink;
use crate::firmware::grbl::RealtimeCommand;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const BANNER: &str = "Grbl 1.1h ['$' for help]";

const SETTINGS: &[(u16, &str)] = &[
    (0, "10"),
    (1, "25"),
    (10, "1"),
    (13, "0"),
    (20, "0"),
    (21, "0"),
    (22, "1"),
    (100, "250.000"),
    (101, "250.000"),
    (102, "250.000"),
    (110, "500.000"),
    (111, "500.000"),
    (112, "500.000"),
    (120, "10.000"),
    (121, "10.000"),
    (122, "10.000"),
    (130, "200.000"),
    (131, "200.000"),
    (132, "200.000"),
];

const G_CODES: &[f64] = &[
    0.0, 1.0, 2.0, 3.0, 4.0, 10.0, 17.0, 18.0, 19.0, 20.0, 21.0, 28.0, 30.0, 38.2, 40.0, 43.1,
    49.0, 53.0, 54.0, 55.0, 56.0, 57.0, 58.0, 59.0, 80.0, 90.0, 91.0, 92.0, 93.0, 94.0,
];

const M_CODES: &[f64] = &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 8.0, 9.0, 30.0];

#[derive(Debug, Default)]
struct SimState {
    rx_line: Vec<u8>,
    outbox: VecDeque<u8>,
    received: Vec<String>,
    realtime: Vec<RealtimeCommand>,
    alarm_locked: bool,
    holding: bool,
    relative: bool,
    position: [f64; 3],
    feed_rate: f64,
    silent: bool,
    failed: bool,
}

impl SimState {
    fn reply(&mut self, line: &str) {
        self.outbox.extend(line.as_bytes());
        self.outbox.extend(b"\r\n");
    }

    fn ok(&mut self) {
        self.reply("ok");
    }

    fn error(&mut self, code: u8) {
        self.reply(&format!("error:{}", code));
    }

    fn state_name(&self) -> &'static str {
        if self.alarm_locked {
            "Alarm"
        } else if self.holding {
            "Hold:0"
        } else {
            "Idle"
        }
    }

    fn realtime(&mut self, command: RealtimeCommand) {
        self.realtime.push(command);
        if self.silent {
            return;
        }
        match command {
            RealtimeCommand::StatusQuery => {
                let [x, y, z] = self.position;
                let report = format!(
                    "<{}|MPos:{:.3},{:.3},{:.3}|FS:{:.0},0|WCO:0.000,0.000,0.000>",
                    self.state_name(),
                    x,
                    y,
                    z,
                    self.feed_rate
                );
                self.reply(&report);
            }
            RealtimeCommand::FeedHold => self.holding = true,
            RealtimeCommand::CycleStart => self.holding = false,
            RealtimeCommand::SoftReset => {
                self.rx_line.clear();
                self.holding = false;
                self.reply("");
                self.reply(BANNER);
            }
            RealtimeCommand::JogCancel => {}
        }
    }

    fn execute(&mut self, line: String) {
        self.received.push(line.clone());
        if self.silent {
            return;
        }

        let upper = line.trim().to_ascii_uppercase();
        match upper.as_str() {
            "$" => {
                self.reply("[HLP:$$ $# $G $I $N $x=val $Nx=line $J=line $SLP $C $X $H ~ ! ? ctrl-x]");
                self.ok();
            }
            "$$" => {
                for (number, value) in SETTINGS {
                    self.reply(&format!("${}={}", number, value));
                }
                self.ok();
            }
            "$I" => {
                self.reply("[VER:1.1h.20190825:]");
                self.reply("[OPT:V,15,128]");
                self.ok();
            }
            "$G" => {
                let distance = if self.relative { "G91" } else { "G90" };
                let gc = format!(
                    "[GC:G0 G54 G17 G21 {} G94 M5 M9 T0 F{:.0} S0]",
                    distance, self.feed_rate
                );
                self.reply(&gc);
                self.ok();
            }
            "$#" => {
                for name in ["G54", "G55", "G28", "G30", "G92"] {
                    self.reply(&format!("[{}:0.000,0.000,0.000]", name));
                }
                self.reply("[TLO:0.000]");
                self.ok();
            }
            "$X" => {
                if self.alarm_locked {
                    self.alarm_locked = false;
                    self.reply("[MSG:Caution: Unlocked]");
                }
                self.ok();
            }
            "$H" => {
                self.alarm_locked = false;
                self.position = [0.0; 3];
                self.ok();
            }
            _ => {
                if let Some(block) = upper.strip_prefix("$J=") {
                    if self.alarm_locked {
                        self.error(9);
                    } else {
                        let block = block.to_string();
                        self.run_block(&block, true);
                    }
                } else if let Some(setting) = upper.strip_prefix('$') {
                    let valid = setting
                        .split_once('=')
                        .is_some_and(|(n, _)| n.trim().parse::<u16>().is_ok());
                    if valid {
                        self.ok();
                    } else {
                        self.error(3);
                    }
                } else if self.alarm_locked {
                    self.error(9);
                } else {
                    self.run_block(&upper, false);
                }
            }
        }
    }

    fn run_block(&mut self, block: &str, jog: bool) {
        match self.apply_block(block, jog) {
            Ok(()) => self.ok(),
            Err(code) => self.error(code),
        }
    }

    fn apply_block(&mut self, block: &str, jog: bool) -> Result<(), u8> {
        let words = parse_words(block)?;

        let mut relative = if jog { false } else { self.relative };
        let mut feed = None;
        let mut target: [Option<f64>; 3] = [None; 3];
        let mut feed_motion = false;

        for (letter, value) in &words {
            match letter {
                'G' => {
                    if !G_CODES.iter().any(|g| (g - value).abs() < 1e-6) {
                        return Err(20);
                    }
                    match *value as u32 {
                        90 => relative = false,
                        91 => relative = true,
                        1..=3 => feed_motion = true,
                        _ => {}
                    }
                }
                'M' => {
                    if !M_CODES.iter().any(|m| (m - value).abs() < 1e-6) {
                        return Err(20);
                    }
                }
                'X' => target[0] = Some(*value),
                'Y' => target[1] = Some(*value),
                'Z' => target[2] = Some(*value),
                'F' => {
                    if *value < 0.0 {
                        return Err(4);
                    }
                    feed = Some(*value);
                }
                'S' | 'T' | 'N' | 'P' | 'L' | 'I' | 'J' | 'K' | 'R' => {}
                _ => return Err(20),
            }
        }

        let effective_feed = feed.unwrap_or(if jog { 0.0 } else { self.feed_rate });
        if (jog || feed_motion) && effective_feed <= 0.0 {
            return Err(22);
        }

        if !jog {
            self.relative = relative;
        }
        if let Some(feed) = feed {
            self.feed_rate = feed;
        }

        for (axis, value) in target.iter().enumerate() {
            if let Some(value) = value {
                if relative {
                    self.position[axis] += value;
                } else {
                    self.position[axis] = *value;
                }
            }
        }

        Ok(())
    }
}

/// Split a G-code block into (letter, value) words
///
/// Errors carry the GRBL error code: 1 for a missing letter, 2 for a bad number.
fn parse_words(block: &str) -> Result<Vec<(char, f64)>, u8> {
    let mut cleaned = String::with_capacity(block.len());
    let mut in_comment = false;
    for c in block.chars() {
        match c {
            '(' => in_comment = true,
            ')' => in_comment = false,
            ';' if !in_comment => break,
            c if in_comment || c.is_whitespace() => {}
            c => cleaned.push(c),
        }
    }

    let mut words = Vec::new();
    let mut chars = cleaned.chars().peekable();
    while let Some(letter) = chars.next() {
        if !letter.is_ascii_alphabetic() {
            return Err(1);
        }
        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let value = number.parse::<f64>().map_err(|_| 2u8)?;
        words.push((letter.to_ascii_uppercase(), value));
    }
    Ok(words)
}

/// Simulated GRBL controller behind the [`SerialLink`] interface
pub struct SimulatedGrbl {
    name: String,
    state: Arc<Mutex<SimState>>,
    poll_interval: Duration,
}

impl SimulatedGrbl {
    /// Create a simulator that has just printed its startup banner
    pub fn new() -> Self {
        let mut state = SimState::default();
        state.reply(BANNER);
        Self {
            name: "simulator".to_string(),
            state: Arc::new(Mutex::new(state)),
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Start in the alarm lock, as GRBL does when homing is enabled
    pub fn start_locked(self) -> Self {
        {
            let mut state = self.state.lock();
            state.alarm_locked = true;
            state.reply("[MSG:'$H'|'$X' to unlock]");
        }
        self
    }

    /// Override the port name reported by [`SerialLink::name`]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// A handle for inspecting and steering the simulator from outside
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: self.state.clone(),
        }
    }
}

impl Default for SimulatedGrbl {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for SimulatedGrbl {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.failed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"));
        }

        for &byte in data {
            if let Some(command) = RealtimeCommand::from_byte(byte) {
                state.realtime(command);
                continue;
            }
            match byte {
                b'\n' | b'\r' => {
                    let raw = std::mem::take(&mut state.rx_line);
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if !line.is_empty() {
                        state.execute(line);
                    }
                }
                _ => state.rx_line.push(byte),
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.state.lock();
            if state.failed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device removed"));
            }
            if !state.outbox.is_empty() {
                let n = buf.len().min(state.outbox.len());
                for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        std::thread::sleep(self.poll_interval);
        Ok(0)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().outbox.clear();
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Shared view of a running [`SimulatedGrbl`]
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorHandle {
    /// Line commands the simulator has received, in order
    pub fn received_lines(&self) -> Vec<String> {
        self.state.lock().received.clone()
    }

    /// Realtime commands the simulator has received, in order
    pub fn realtime_received(&self) -> Vec<RealtimeCommand> {
        self.state.lock().realtime.clone()
    }

    /// Current machine position (X, Y, Z)
    pub fn position(&self) -> [f64; 3] {
        self.state.lock().position
    }

    /// Whether the alarm lock is engaged
    pub fn is_alarm_locked(&self) -> bool {
        self.state.lock().alarm_locked
    }

    /// Raise an alarm as if a limit switch tripped
    pub fn trigger_alarm(&self, code: u8) {
        let mut state = self.state.lock();
        state.alarm_locked = true;
        state.reply(&format!("ALARM:{}", code));
    }

    /// Push an unsolicited line to the output
    pub fn inject_line(&self, line: &str) {
        self.state.lock().reply(line);
    }

    /// Stop answering, as a hung controller would
    pub fn set_silent(&self, silent: bool) {
        self.state.lock().silent = silent;
    }

    /// Fail all further I/O, as an unplugged device would
    pub fn unplug(&self) {
        self.state.lock().failed = true;
    }
}
