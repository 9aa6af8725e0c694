//! GRBL protocol
//!
//! GRBL answers every line command with exactly one terminal line: `ok`,
//! `error:N`, or `ALARM:N`. Informational lines may precede it.

pub mod commands;
pub mod error_decoder;
pub mod response_parser;

pub use commands::{validate_command, JogRequest, RealtimeCommand, HOME, UNLOCK, WAKE_UP};
pub use error_decoder::{decode_alarm, decode_error, format_alarm, format_error};
pub use response_parser::{BufferState, GrblResponse, GrblResponseParser, StatusReport};
