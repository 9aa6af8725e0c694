//! GRBL Response Parser
//!
//! Classifies the lines GRBL prints: acknowledgements, errors, alarms,
//! status reports, settings, feedback messages, and the startup banner.

use gcodebridge_core::{CNCPoint, Units};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error_decoder;

/// GRBL response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// Error response with error code
    Error(u8),
    /// Alarm response with alarm code
    Alarm(u8),
    /// Status report (`<...>`)
    Status(StatusReport),
    /// Setting response (`$n=value`)
    Setting { number: u16, value: String },
    /// Startup banner (`Grbl 1.1h ['$' for help]`)
    Version(String),
    /// Bracketed feedback (`[MSG:...]`, `[GC:...]`, `[VER:...]`)
    Feedback(String),
    /// Anything else
    Message(String),
}

impl GrblResponse {
    /// Whether this line completes the command that produced it
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Error(_) | Self::Alarm(_))
    }
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "{}", error_decoder::format_error(*code)),
            Self::Alarm(code) => write!(f, "{}", error_decoder::format_alarm(*code)),
            Self::Status(report) => write!(f, "status:{}", report.state),
            Self::Setting { number, value } => write!(f, "setting:${}={}", number, value),
            Self::Version(version) => write!(f, "version:{}", version),
            Self::Feedback(text) => write!(f, "feedback:{}", text),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

/// GRBL status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Machine state, including any substate (`Hold:0`, `Door:1`)
    pub state: String,
    /// Machine position
    pub machine_pos: CNCPoint,
    /// Work position
    pub work_pos: CNCPoint,
    /// Work coordinate offset, when reported
    pub work_coord_offset: Option<CNCPoint>,
    /// Current feed rate
    pub feed_rate: Option<f64>,
    /// Current spindle speed (RPM)
    pub spindle_speed: Option<f64>,
    /// Planner blocks and RX bytes available (`Bf:`)
    pub buffer: Option<BufferState>,
    /// Input pins reported active (`Pn:`)
    pub pins: Option<String>,
}

impl StatusReport {
    /// State name without the substate suffix
    pub fn state_name(&self) -> &str {
        self.state.split(':').next().unwrap_or(&self.state)
    }

    /// Whether the controller is in an alarm state
    pub fn is_alarm(&self) -> bool {
        self.state_name() == "Alarm"
    }

    /// Whether the controller is idle
    pub fn is_idle(&self) -> bool {
        self.state_name() == "Idle"
    }
}

/// Buffer state in status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks
    pub plan: u16,
    /// Free serial RX bytes
    pub rx: u16,
}

/// GRBL response parser
///
/// GRBL only includes `WCO:` in some status reports, so the last offset seen
/// is kept and used to fill in the missing position of later reports.
#[derive(Debug, Default, Clone)]
pub struct GrblResponseParser {
    last_wco: Option<CNCPoint>,
}

impl GrblResponseParser {
    /// Create a new GRBL response parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent work coordinate offset reported by the controller
    pub fn last_work_offset(&self) -> Option<CNCPoint> {
        self.last_wco
    }

    /// Parse a GRBL response line
    ///
    /// Returns `None` for blank lines. Anything unrecognized is a `Message`.
    pub fn parse(&mut self, line: &str) -> Option<GrblResponse> {
        let line = line.trim();

        if line.is_empty() {
            return None;
        }

        if line.eq_ignore_ascii_case("ok") {
            return Some(GrblResponse::Ok);
        }

        if let Some(code) = strip_prefix_ignore_case(line, "error:") {
            if let Ok(code) = code.trim().parse::<u8>() {
                return Some(GrblResponse::Error(code));
            }
        }

        if let Some(code) = strip_prefix_ignore_case(line, "alarm:") {
            if let Ok(code) = code.trim().parse::<u8>() {
                return Some(GrblResponse::Alarm(code));
            }
        }

        if line.starts_with('<') && line.ends_with('>') && line.len() >= 2 {
            if let Some(report) = self.parse_status_report(&line[1..line.len() - 1]) {
                return Some(GrblResponse::Status(report));
            }
        }

        if line.starts_with('$') && line.contains('=') {
            if let Some(setting) = self.parse_setting(line) {
                return Some(setting);
            }
        }

        if line.starts_with("Grbl ") || line.starts_with("GrblHAL ") {
            return Some(GrblResponse::Version(line.to_string()));
        }

        if line.starts_with('[') && line.ends_with(']') {
            return Some(GrblResponse::Feedback(line[1..line.len() - 1].to_string()));
        }

        Some(GrblResponse::Message(line.to_string()))
    }

    /// Parse the body of a status report (without the angle brackets)
    fn parse_status_report(&mut self, body: &str) -> Option<StatusReport> {
        let mut parts = body.split('|');

        let state = parts.next()?.trim().to_string();
        if state.is_empty() {
            return None;
        }

        let mut machine_pos = None;
        let mut work_pos = None;
        let mut work_coord_offset = None;
        let mut feed_rate = None;
        let mut spindle_speed = None;
        let mut buffer = None;
        let mut pins = None;

        for part in parts {
            let part = part.trim();
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };

            match key {
                "MPos" => machine_pos = Some(self.parse_position(value)?),
                "WPos" => work_pos = Some(self.parse_position(value)?),
                "WCO" => work_coord_offset = self.parse_position(value),
                "F" => feed_rate = value.trim().parse::<f64>().ok(),
                "FS" => {
                    let mut values = value.split(',').map(|v| v.trim().parse::<f64>().ok());
                    feed_rate = values.next().flatten();
                    spindle_speed = values.next().flatten();
                }
                "Bf" | "Buf" => buffer = self.parse_buffer_state(value),
                "Pn" => pins = Some(value.to_string()),
                _ => {}
            }
        }

        if work_coord_offset.is_some() {
            self.last_wco = work_coord_offset;
        }
        let work_coord_offset = work_coord_offset.or(self.last_wco);

        // Until an offset has been seen, the missing position mirrors the reported one.
        let (machine_pos, work_pos) = match (machine_pos, work_pos, work_coord_offset) {
            (Some(m), Some(w), _) => (m, w),
            (Some(m), None, Some(wco)) => (m, m.minus(&wco)),
            (None, Some(w), Some(wco)) => (w.plus(&wco), w),
            (Some(m), None, None) => (m, m),
            (None, Some(w), None) => (w, w),
            (None, None, _) => (CNCPoint::new(Units::MM), CNCPoint::new(Units::MM)),
        };

        Some(StatusReport {
            state,
            machine_pos,
            work_pos,
            work_coord_offset,
            feed_rate,
            spindle_speed,
            buffer,
            pins,
        })
    }

    fn parse_position(&self, pos_str: &str) -> Option<CNCPoint> {
        let coords = pos_str
            .split(',')
            .map(|s| s.trim().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;

        if coords.is_empty() {
            return None;
        }

        Some(CNCPoint::from_axes(&coords, Units::MM))
    }

    fn parse_buffer_state(&self, buf_str: &str) -> Option<BufferState> {
        let (plan, rx) = buf_str.split_once([',', ':'])?;
        Some(BufferState {
            plan: plan.trim().parse().ok()?,
            rx: rx.trim().parse().ok()?,
        })
    }

    fn parse_setting(&self, line: &str) -> Option<GrblResponse> {
        let (number, value) = line[1..].split_once('=')?;
        let number = number.trim().parse::<u16>().ok()?;
        Some(GrblResponse::Setting {
            number,
            value: value.trim().to_string(),
        })
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
