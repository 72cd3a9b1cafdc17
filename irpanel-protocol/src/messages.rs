//! Message types for the panel serial protocol
//!
//! Message types are divided into two categories:
//! - Host -> Panel: display commands, answered with a `done` ack
//! - Panel -> Host: decoded IR commands and the ack itself
//!
//! The opcode is the first payload byte. Note that `d` is used in both
//! directions: host-to-panel it sets the backlight dim level, panel-to-host
//! it is the `done` ack.

use crate::frame::{Packet, PacketError, PACKET_CAPACITY};
use heapless::Vec;

// Opcodes: Host -> Panel
pub const OP_CLEAR: u8 = b'c';
pub const OP_DIM: u8 = b'd';
pub const OP_HOME: u8 = b'h';
pub const OP_GOTO: u8 = b'g';
pub const OP_PRINT: u8 = b'p';
pub const OP_RAW: u8 = b'r';

// Opcodes: Panel -> Host
pub const OP_IR_EVENT: u8 = b'i';
pub const OP_DONE: u8 = b'd';

/// Display dimensions
pub const LCD_ROWS: u8 = 4;
pub const LCD_COLS: u8 = 20;

/// Longest printable chunk in one packet (opcode byte takes one slot)
pub const MAX_PRINT_LEN: usize = PACKET_CAPACITY - 1;

/// Commands from the host to the panel
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostCommand<'a> {
    /// Clear the display
    Clear,
    /// Set the backlight dim level
    Dim(u8),
    /// Move the cursor to (0,0)
    Home,
    /// Move the cursor to a position
    Goto { x: u8, y: u8 },
    /// Print text at the current cursor position
    Print(&'a [u8]),
    /// Raw controller byte passthrough
    Raw { data: u8, is_char: bool, wait: bool },
}

impl<'a> HostCommand<'a> {
    /// Encode this command into a packet
    pub fn to_packet(&self) -> Result<Packet, PacketError> {
        match self {
            HostCommand::Clear => Packet::new(&[OP_CLEAR]),
            HostCommand::Dim(level) => Packet::new(&[OP_DIM, *level]),
            HostCommand::Home => Packet::new(&[OP_HOME]),
            HostCommand::Goto { x, y } => Packet::new(&[OP_GOTO, *x, *y]),
            HostCommand::Print(text) => {
                let mut payload = Vec::<u8, PACKET_CAPACITY>::new();
                payload
                    .push(OP_PRINT)
                    .map_err(|_| PacketError::PayloadTooLarge)?;
                payload
                    .extend_from_slice(text)
                    .map_err(|_| PacketError::PayloadTooLarge)?;
                Packet::new(&payload)
            }
            HostCommand::Raw {
                data,
                is_char,
                wait,
            } => Packet::new(&[OP_RAW, *data, *is_char as u8, *wait as u8]),
        }
    }

    /// Parse a command from a received payload
    pub fn from_payload(payload: &'a [u8]) -> Result<Self, PacketError> {
        match payload {
            [OP_CLEAR] => Ok(HostCommand::Clear),
            [OP_DIM, level] => Ok(HostCommand::Dim(*level)),
            [OP_HOME] => Ok(HostCommand::Home),
            [OP_GOTO, x, y] => Ok(HostCommand::Goto { x: *x, y: *y }),
            [OP_PRINT, text @ ..] => Ok(HostCommand::Print(text)),
            [OP_RAW, data, is_char, wait] => Ok(HostCommand::Raw {
                data: *data,
                is_char: *is_char != 0,
                wait: *wait != 0,
            }),
            _ => Err(PacketError::InvalidMessage),
        }
    }
}

/// Messages from the panel to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PanelEvent {
    /// A decoded remote-control command
    IrCommand { address: u8, command: u8 },
    /// Acknowledgment of a host command
    Done,
}

impl PanelEvent {
    /// Encode this event into a packet
    pub fn to_packet(&self) -> Result<Packet, PacketError> {
        match self {
            PanelEvent::IrCommand { address, command } => {
                Packet::new(&[OP_IR_EVENT, *address, *command])
            }
            PanelEvent::Done => Packet::new(&[OP_DONE]),
        }
    }

    /// Parse an event from a received payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, PacketError> {
        match payload {
            [OP_IR_EVENT, address, command] => Ok(PanelEvent::IrCommand {
                address: *address,
                command: *command,
            }),
            [OP_DONE] => Ok(PanelEvent::Done),
            _ => Err(PacketError::InvalidMessage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_packet() {
        let packet = HostCommand::Clear.to_packet().unwrap();
        assert_eq!(packet.payload(), &[OP_CLEAR]);
        assert_eq!(packet.wire_len(), 1);
    }

    #[test]
    fn test_goto_packet() {
        let packet = HostCommand::Goto { x: 5, y: 1 }.to_packet().unwrap();
        assert_eq!(packet.payload(), &[b'g', 5, 1]);
    }

    #[test]
    fn test_print_packet() {
        let packet = HostCommand::Print(b"Hello").to_packet().unwrap();
        assert_eq!(packet.wire_len(), 6);
        assert_eq!(&packet.payload()[1..], b"Hello");
    }

    #[test]
    fn test_print_too_long() {
        let text = [b'x'; PACKET_CAPACITY];
        assert_eq!(
            HostCommand::Print(&text).to_packet(),
            Err(PacketError::PayloadTooLarge)
        );
    }

    #[test]
    fn test_host_command_roundtrip() {
        let commands = [
            HostCommand::Clear,
            HostCommand::Dim(128),
            HostCommand::Home,
            HostCommand::Goto { x: 19, y: 3 },
            HostCommand::Print(b"abc"),
            HostCommand::Raw {
                data: 0x01,
                is_char: false,
                wait: true,
            },
        ];

        for command in commands {
            let packet = command.to_packet().unwrap();
            let parsed = HostCommand::from_payload(packet.payload()).unwrap();
            assert_eq!(command, parsed);
        }
    }

    #[test]
    fn test_panel_event_roundtrip() {
        let events = [
            PanelEvent::IrCommand {
                address: 4,
                command: 9,
            },
            PanelEvent::Done,
        ];

        for event in events {
            let packet = event.to_packet().unwrap();
            let parsed = PanelEvent::from_payload(packet.payload()).unwrap();
            assert_eq!(event, parsed);
        }
    }

    #[test]
    fn test_unknown_payload() {
        assert_eq!(
            HostCommand::from_payload(b"x"),
            Err(PacketError::InvalidMessage)
        );
        assert_eq!(
            PanelEvent::from_payload(&[OP_IR_EVENT, 1]),
            Err(PacketError::InvalidMessage)
        );
    }
}
