//! # GCodeBridge Communication
//!
//! Everything between the HTTP surface and the wire:
//! - serial port discovery, auto-detection, and the [`SerialLink`] abstraction
//! - line framing of controller output
//! - GRBL response parsing, error/alarm decoding, and command builders
//! - an in-process GRBL simulator
//! - the [`SerialBridge`], which owns the serial handle on a dedicated I/O thread

pub mod bridge;
pub mod communication;
pub mod firmware;

pub use bridge::{
    BridgeConfig, BridgeState, CommandReply, ConnectOptions, Controller, LinkOpener,
    SerialBridge, SerialPortOpener, SimulatorOpener,
};

pub use communication::{
    line::LineAssembler,
    serial::{detect_port, list_ports, RealSerialPort, SerialPortInfo},
    simulator::{SimulatedGrbl, SimulatorHandle},
    ConnectionParams, SerialLink, SerialParity,
};

pub use firmware::grbl::{
    commands::{JogRequest, RealtimeCommand},
    response_parser::{GrblResponse, GrblResponseParser, StatusReport},
};
