//! IRPanel serial protocol
//!
//! This crate defines the UART packet protocol between the panel firmware
//! and the irpaneld host daemon. The panel acts as a dumb peripheral: it
//! reports decoded remote-control commands and executes display commands;
//! all session logic lives on the host.
//!
//! # Protocol Overview
//!
//! All messages use a length-prefixed binary frame:
//! ```text
//! ┌────────┬─────────────────┐
//! │ LENGTH │ PAYLOAD         │
//! │ 1B     │ 1–24B           │
//! └────────┴─────────────────┘
//! ```
//!
//! The first payload byte is the opcode. Every host-issued packet is
//! answered by a single-byte `d` (done) ack; the only unsolicited
//! panel-to-host packet is the `i` decoder event.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod frame;
pub mod messages;

pub use frame::{Packet, PacketError, PacketRx, MAX_FRAME_SIZE, PACKET_CAPACITY};
pub use messages::{HostCommand, PanelEvent, LCD_COLS, LCD_ROWS, MAX_PRINT_LEN};
