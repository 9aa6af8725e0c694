//! Firmware protocol support
//!
//! Only GRBL (and grblHAL, which speaks the same line protocol) is supported.

pub mod grbl;
