//! # GCodeBridge Core
//!
//! Core types shared by every GCodeBridge crate:
//! - the error hierarchy used by the serial bridge and the HTTP surface
//! - the event bus that fans controller output out to subscribers
//! - machine coordinate types carried in status reports

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{CNCPoint, Units};

pub use error::{ConnectionError, ControllerError, Error, Result};

pub use event_bus::{
    AppEvent, CommunicationEvent, ConnectionEvent, DisconnectReason, ErrorEvent, EventBus,
    EventBusConfig, EventBusError, EventCategory, EventFilter, MachineEvent, SubscriptionId,
};
