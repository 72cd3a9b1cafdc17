//! Packet framing for the panel serial link.
//!
//! Packet format:
//! - LENGTH (1 byte): payload length (1-24)
//! - PAYLOAD (LENGTH bytes): opcode followed by opcode-specific data
//!
//! There is no sync byte or checksum: the link is a point-to-point serial
//! line and the host recovers from desync through its bounded retry on the
//! length byte.

use heapless::Vec;

/// Maximum payload size in bytes (panel-side buffer capacity)
pub const PACKET_CAPACITY: usize = 24;

/// Maximum complete frame size (LENGTH + payload)
pub const MAX_FRAME_SIZE: usize = 1 + PACKET_CAPACITY;

/// Errors that can occur during packet construction or parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// Payload is empty (a length byte of zero is not a frame)
    Empty,
    /// Payload exceeds the panel buffer capacity
    PayloadTooLarge,
    /// Buffer too small for encoding
    BufferTooSmall,
    /// Payload does not decode as a known message
    InvalidMessage,
}

/// A parsed or constructed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8, PACKET_CAPACITY>,
}

impl Packet {
    /// Create a new packet with the given payload
    pub fn new(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.is_empty() {
            return Err(PacketError::Empty);
        }

        let mut payload_vec = Vec::new();
        payload_vec
            .extend_from_slice(payload)
            .map_err(|_| PacketError::PayloadTooLarge)?;

        Ok(Self {
            payload: payload_vec,
        })
    }

    /// Payload bytes (opcode first)
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Wire length byte for this packet
    pub fn wire_len(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Encode this packet into a byte buffer
    ///
    /// Returns the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, PacketError> {
        let frame_len = 1 + self.payload.len();
        if buffer.len() < frame_len {
            return Err(PacketError::BufferTooSmall);
        }

        buffer[0] = self.payload.len() as u8;
        buffer[1..frame_len].copy_from_slice(&self.payload);

        Ok(frame_len)
    }

    /// Encode this packet into a heapless Vec
    pub fn encode_to_vec(&self) -> Result<Vec<u8, MAX_FRAME_SIZE>, PacketError> {
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = self.encode(&mut buffer)?;
        let mut vec = Vec::new();
        vec.extend_from_slice(&buffer[..len])
            .map_err(|_| PacketError::BufferTooSmall)?;
        Ok(vec)
    }
}

/// Panel-side packet assembler
///
/// Fed one byte at a time from the UART receive path. The first byte is the
/// expected payload length; once that many bytes have arrived the payload is
/// terminated with a zero byte and the assembler parks itself until
/// [`PacketRx::rearm`]. A length byte of 0 or above the buffer capacity is
/// ignored and the assembler keeps waiting for a legal length.
#[derive(Debug, Clone)]
pub struct PacketRx {
    /// Payload plus space for the terminating zero
    buffer: [u8; PACKET_CAPACITY + 1],
    expected: u8,
    pos: u8,
    complete: bool,
}

impl Default for PacketRx {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRx {
    /// Create a new assembler, ready for a length byte
    pub fn new() -> Self {
        Self {
            buffer: [0; PACKET_CAPACITY + 1],
            expected: 0,
            pos: 0,
            complete: false,
        }
    }

    /// Indicate ready to receive the next packet
    ///
    /// Must be called after a completed packet has been consumed; until then
    /// all incoming bytes are dropped.
    pub fn rearm(&mut self) {
        self.expected = 0;
        self.pos = 0;
        self.complete = false;
    }

    /// Feed a single received byte
    ///
    /// Returns true when this byte completed a packet.
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.complete {
            return false;
        }

        if self.expected == 0 {
            // Awaiting a length byte; 0 and oversized lengths are not frames
            if byte >= 1 && byte as usize <= PACKET_CAPACITY {
                self.expected = byte;
            }
            return false;
        }

        self.buffer[self.pos as usize] = byte;
        self.pos += 1;
        if self.pos == self.expected {
            self.buffer[self.pos as usize] = 0;
            self.complete = true;
        }
        self.complete
    }

    /// The completed payload, if any
    pub fn payload(&self) -> Option<&[u8]> {
        if self.complete {
            Some(&self.buffer[..self.pos as usize])
        } else {
            None
        }
    }

    /// Whether a completed packet is pending consumption
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
