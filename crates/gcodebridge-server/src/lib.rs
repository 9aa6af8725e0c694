//! # GCodeBridge Server
//!
//! The HTTP and WebSocket surface of the bridge:
//! - command endpoints (`/send_gcode`, `/home`, `/jog`, `/unlock`, `/realtime`)
//! - connection management (`/connect`, `/disconnect`, `/connection`, `/ports`)
//! - `/ws`, which relays every controller response line to the client
//!
//! Handlers only ever see the [`Controller`] trait, never the serial port.
//!
//! [`Controller`]: gcodebridge_communication::Controller

pub mod error;
pub mod routes;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use routes::{router, AppState};
pub use server::{serve, shutdown_signal};
