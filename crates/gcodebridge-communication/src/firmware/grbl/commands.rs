//! GRBL command builders
//!
//! Line commands (homing, unlock, jog) go through the acknowledged command
//! path. Realtime commands are single bytes GRBL acts on immediately.

use gcodebridge_core::ControllerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Homing cycle
pub const HOME: &str = "$H";

/// Clear an alarm lock
pub const UNLOCK: &str = "$X";

/// Wake-up sequence written after the port opens
pub const WAKE_UP: &[u8] = b"\r\n\r\n";

/// Validate a line command before it is written to the controller
///
/// Returns the trimmed command. The line terminator is added by the writer.
pub fn validate_command(command: &str, max_len: usize) -> Result<String, ControllerError> {
    let command = command.trim();

    if command.is_empty() {
        return Err(ControllerError::InvalidCommand {
            reason: "command is empty".to_string(),
        });
    }

    if command.contains(['\r', '\n']) {
        return Err(ControllerError::InvalidCommand {
            reason: "command must be a single line".to_string(),
        });
    }

    if let Some(byte) = command.bytes().find(|b| RealtimeCommand::from_byte(*b).is_some()) {
        return Err(ControllerError::InvalidCommand {
            reason: format!("command contains realtime character 0x{:02X}", byte),
        });
    }

    if command.len() > max_len {
        return Err(ControllerError::InvalidCommand {
            reason: format!(
                "command is {} bytes, limit is {}",
                command.len(),
                max_len
            ),
        });
    }

    Ok(command.to_string())
}

/// Relative jog request
///
/// Axis values are millimetre offsets; an absent or zero axis does not move.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JogRequest {
    /// X offset
    #[serde(default)]
    pub x: Option<f64>,
    /// Y offset
    #[serde(default)]
    pub y: Option<f64>,
    /// Z offset
    #[serde(default)]
    pub z: Option<f64>,
    /// Feed rate in mm/min
    #[serde(alias = "feed", alias = "f", alias = "feedrate")]
    pub feed_rate: f64,
}

impl JogRequest {
    /// Build a jog request
    pub fn new(x: f64, y: f64, z: f64, feed_rate: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
            feed_rate,
        }
    }

    /// Render the jog as a GRBL `$J=` command
    ///
    /// Produces `$J=G91 G21 X.. Y.. Z.. F..` with zero axes left out. Axes are
    /// judged as written (three decimals), the feed rate as a whole number.
    pub fn to_command(&self) -> Result<String, ControllerError> {
        let feed = format!("{:.0}", self.feed_rate);
        if !self.feed_rate.is_finite() || self.feed_rate <= 0.0 || is_zero(&feed) {
            return Err(ControllerError::InvalidCommand {
                reason: format!("jog feed rate must be at least 1, got {}", self.feed_rate),
            });
        }

        let mut cmd = String::from("$J=G91 G21");
        let mut moves = 0;

        for (axis, value) in [('X', self.x), ('Y', self.y), ('Z', self.z)] {
            let value = value.unwrap_or(0.0);
            if !value.is_finite() {
                return Err(ControllerError::InvalidCommand {
                    reason: format!("jog {} offset is not a number", axis),
                });
            }
            let offset = format!("{:.3}", value);
            if !is_zero(&offset) {
                cmd.push_str(&format!(" {}{}", axis, offset));
                moves += 1;
            }
        }

        if moves == 0 {
            return Err(ControllerError::InvalidCommand {
                reason: "jog needs at least one non-zero axis".to_string(),
            });
        }

        cmd.push_str(&format!(" F{}", feed));
        Ok(cmd)
    }
}

/// Whether a formatted number is zero (`0`, `-0.000`)
fn is_zero(formatted: &str) -> bool {
    formatted
        .trim_start_matches('-')
        .chars()
        .all(|c| c == '0' || c == '.')
}

/// Single-byte realtime commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeCommand {
    /// `?` status report query
    StatusQuery,
    /// `!` feed hold
    FeedHold,
    /// `~` cycle start / resume
    CycleStart,
    /// Ctrl-X soft reset
    SoftReset,
    /// Cancel an active jog
    JogCancel,
}

impl RealtimeCommand {
    /// The byte written to the controller
    pub fn byte(self) -> u8 {
        match self {
            Self::StatusQuery => b'?',
            Self::FeedHold => b'!',
            Self::CycleStart => b'~',
            Self::SoftReset => 0x18,
            Self::JogCancel => 0x85,
        }
    }

    /// Map a byte back to a realtime command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'?' => Some(Self::StatusQuery),
            b'!' => Some(Self::FeedHold),
            b'~' => Some(Self::CycleStart),
            0x18 => Some(Self::SoftReset),
            0x85 => Some(Self::JogCancel),
            _ => None,
        }
    }
}

impl fmt::Display for RealtimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StatusQuery => "status",
            Self::FeedHold => "hold",
            Self::CycleStart => "resume",
            Self::SoftReset => "reset",
            Self::JogCancel => "jog_cancel",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for RealtimeCommand {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" | "?" => Ok(Self::StatusQuery),
            "hold" | "feed_hold" | "pause" | "!" => Ok(Self::FeedHold),
            "resume" | "cycle_start" | "start" | "~" => Ok(Self::CycleStart),
            "reset" | "soft_reset" => Ok(Self::SoftReset),
            "jog_cancel" | "cancel_jog" => Ok(Self::JogCancel),
            other => Err(ControllerError::InvalidCommand {
                reason: format!("unknown realtime command '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_validate_trims() {
        assert_eq!(validate_command("  G0 X1 \r", 80).unwrap(), "G0 X1");
    }

    #[test]
    fn test_validate_rejections() {
        assert!(validate_command("   ", 80).is_err());
        assert!(validate_command("G0 X1\nG0 X2", 80).is_err());
        assert!(validate_command("G0 X1 ?", 80).is_err());
        assert!(validate_command(&"G1 X1 ".repeat(20), 80).is_err());
    }

    #[test]
    fn test_jog_template() {
        let jog = JogRequest::new(10.0, -2.5, 0.0, 1000.0);
        assert_eq!(
            jog.to_command().unwrap(),
            "$J=G91 G21 X10.000 Y-2.500 F1000"
        );
    }

    #[test]
    fn test_jog_only_z() {
        let jog = JogRequest {
            z: Some(0.1),
            feed_rate: 250.4,
            ..Default::default()
        };
        assert_eq!(jog.to_command().unwrap(), "$J=G91 G21 Z0.100 F250");
    }

    #[test]
    fn test_jog_rejections() {
        assert!(JogRequest::new(0.0, 0.0, 0.0, 100.0).to_command().is_err());
        assert!(JogRequest::new(1.0, 0.0, 0.0, 0.0).to_command().is_err());
        assert!(JogRequest::new(f64::NAN, 0.0, 0.0, 100.0)
            .to_command()
            .is_err());
        assert!(JogRequest::new(1.0, 0.0, 0.0, f64::INFINITY)
            .to_command()
            .is_err());
    }

    #[test]
    fn test_jog_judged_on_written_values() {
        assert!(JogRequest::new(1.0, 0.0, 0.0, 0.4).to_command().is_err());
        assert!(JogRequest::new(0.0004, 0.0, 0.0, 100.0).to_command().is_err());
        assert!(JogRequest::new(-0.0004, 0.0, 0.0, 100.0).to_command().is_err());

        let jog = JogRequest::new(0.0004, 2.0, -0.0001, 100.0);
        assert_eq!(jog.to_command().unwrap(), "$J=G91 G21 Y2.000 F100");

        let jog = JogRequest::new(0.0005, 0.0, 0.0, 1.2);
        assert_eq!(jog.to_command().unwrap(), "$J=G91 G21 X0.001 F1");
    }

    #[test]
    fn test_jog_deserialize_aliases() {
        let jog: JogRequest = serde_json::from_str(r#"{"x": 5, "feed": 300}"#).unwrap();
        assert_eq!(jog.x, Some(5.0));
        assert_eq!(jog.y, None);
        assert_eq!(jog.feed_rate, 300.0);
    }

    #[test]
    fn test_realtime_names() {
        assert_eq!("hold".parse::<RealtimeCommand>().unwrap(), RealtimeCommand::FeedHold);
        assert_eq!("RESET".parse::<RealtimeCommand>().unwrap(), RealtimeCommand::SoftReset);
        assert!("explode".parse::<RealtimeCommand>().is_err());
        for cmd in [
            RealtimeCommand::StatusQuery,
            RealtimeCommand::FeedHold,
            RealtimeCommand::CycleStart,
            RealtimeCommand::SoftReset,
            RealtimeCommand::JogCancel,
        ] {
            assert_eq!(RealtimeCommand::from_byte(cmd.byte()), Some(cmd));
            assert_eq!(cmd.to_string().parse::<RealtimeCommand>().unwrap(), cmd);
        }
    }

    proptest! {
        #[test]
        fn prop_jog_command_is_single_line(
            x in -1000.0f64..1000.0,
            y in -1000.0f64..1000.0,
            feed in 1.0f64..10000.0,
        ) {
            let jog = JogRequest { x: Some(x), y: Some(y), z: None, feed_rate: feed };
            if let Ok(cmd) = jog.to_command() {
                prop_assert!(cmd.starts_with("$J=G91 G21"));
                prop_assert!(validate_command(&cmd, 256).is_ok());
            }
        }
    }
}
