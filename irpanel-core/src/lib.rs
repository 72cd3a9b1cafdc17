//! Board-agnostic core logic for the IRPanel firmware
//!
//! This crate holds the pieces of the firmware that do not touch hardware:
//! the RC5 edge-timing decoder and the single-slot mailbox used to hand
//! completed work from a producing context to the consuming loop.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

pub mod mailbox;
pub mod rc5;

pub use mailbox::Mailbox;
pub use rc5::{CommandWord, DecoderState, EdgeEvent, Level, PulseTiming, Rc5Decoder};
