//! # Event Bus Module
//!
//! Publish/subscribe fan-out for everything the bridge observes on the
//! serial line.
//!
//! - The serial I/O thread publishes one event per response line
//! - WebSocket clients take an async [`EventBus::receiver`]
//! - In-process code can register synchronous handlers with a filter
//!
//! ## Usage
//!
//! ```rust
//! use gcodebridge_core::event_bus::{AppEvent, CommunicationEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Communication]),
//!     |event| {
//!         if let AppEvent::Communication(CommunicationEvent::DataReceived { data }) = event {
//!             println!("controller said: {}", data);
//!         }
//!     },
//! );
//!
//! bus.publish(AppEvent::Communication(CommunicationEvent::DataReceived {
//!     data: "ok".to_string(),
//! }))
//! .ok();
//!
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
