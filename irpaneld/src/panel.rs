//! Panel serial link
//!
//! A dedicated blocking thread owns the serial port; the async side talks
//! to it through a single-slot request channel. The thread alternates
//! between polling for unsolicited frames (decoder events) and executing
//! one request at a time: write the frame, collect the single-byte `done`
//! ack. The protocol has no request identifiers, so the one-in-flight
//! discipline is what keeps acks matched to their commands.

use std::io::{self, Read, Write};
use std::time::Duration;

use irpanel_protocol::{HostCommand, PanelEvent, MAX_FRAME_SIZE, PACKET_CAPACITY};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// One attempt at reading a frame's length byte
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Poll interval for unsolicited frames between requests
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Retries for a frame's length byte before giving up on the frame
const LENGTH_TRIES: u32 = 3;

/// Stand-in for "no deadline" once a frame's length has arrived
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("short write to the panel")]
    ShortWrite,
    #[error("can't write to the panel: {0}")]
    Write(io::Error),
    #[error("can't read packet length")]
    RetriesExhausted,
    #[error("payload length {0} larger than available buffer")]
    BadLength(u8),
    #[error("can't read from the panel: {0}")]
    Read(io::Error),
    #[error("unexpected reply from the panel")]
    UnexpectedReply,
    #[error("command does not fit in a packet")]
    Oversized,
    #[error("panel link is down")]
    LinkDown,
}

impl PanelError {
    /// True when the command never left the host intact
    pub fn is_write_side(&self) -> bool {
        matches!(self, PanelError::ShortWrite | PanelError::Write(_))
    }
}

/// Unsolicited panel traffic, as seen by the session loop
#[derive(Debug)]
pub enum LinkEvent {
    /// Decoded remote-control command
    Ir { address: u8, command: u8 },
    /// Anything else; the transport only carries solicited acks beyond
    /// decoder events, and those are consumed by the request path
    Unknown(Vec<u8>),
}

/// Command interface the session loop works against
pub trait PanelPort {
    /// Send one command and wait for its ack
    async fn transact(&mut self, command: &HostCommand<'_>) -> Result<(), PanelError>;
}

/// Async handle to the link thread
pub struct PanelHandle {
    requests: mpsc::Sender<Request>,
}

struct Request {
    frame: Vec<u8>,
    reply: oneshot::Sender<Result<(), PanelError>>,
}

impl PanelPort for PanelHandle {
    async fn transact(&mut self, command: &HostCommand<'_>) -> Result<(), PanelError> {
        let packet = command.to_packet().map_err(|_| PanelError::Oversized)?;
        let mut buffer = [0u8; MAX_FRAME_SIZE];
        let len = packet
            .encode(&mut buffer)
            .map_err(|_| PanelError::Oversized)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request {
                frame: buffer[..len].to_vec(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PanelError::LinkDown)?;

        reply_rx.await.map_err(|_| PanelError::LinkDown)?
    }
}

/// Spawn the link thread
///
/// Returns the request handle and the unsolicited event stream. The
/// event stream closing means the port is gone and the daemon cannot
/// continue.
pub fn spawn(port: Box<dyn serialport::SerialPort>) -> (PanelHandle, mpsc::Receiver<LinkEvent>) {
    let (req_tx, req_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = mpsc::channel(32);

    std::thread::Builder::new()
        .name("panel-link".into())
        .spawn(move || link_thread(port, req_rx, event_tx))
        .expect("spawn panel link thread");

    (PanelHandle { requests: req_tx }, event_rx)
}

fn link_thread(
    mut port: Box<dyn serialport::SerialPort>,
    mut requests: mpsc::Receiver<Request>,
    events: mpsc::Sender<LinkEvent>,
) {
    loop {
        // Unsolicited traffic first, so decoder events stay fresh
        match poll_frame(&mut *port) {
            Ok(Some(payload)) => {
                debug!("<< panel frame: {payload:02x?}");
                if events.blocking_send(parse_event(payload)).is_err() {
                    // Daemon is shutting down
                    return;
                }
            }
            Ok(None) => {}
            Err(PanelError::BadLength(len)) => {
                warn!("payload length {len} larger than available buffer");
            }
            Err(e) => {
                error!("panel link lost: {e}");
                return;
            }
        }

        match requests.try_recv() {
            Ok(request) => {
                let result = perform(&mut *port, &request.frame);
                let _ = request.reply.send(result);
            }
            Err(mpsc::error::TryRecvError::Empty) => {}
            Err(mpsc::error::TryRecvError::Disconnected) => return,
        }
    }
}

/// Write one request frame and collect the `done` ack
fn perform(port: &mut dyn serialport::SerialPort, frame: &[u8]) -> Result<(), PanelError> {
    debug!(">> panel frame: {frame:02x?}");

    let written = port.write(frame).map_err(PanelError::Write)?;
    if written != frame.len() {
        return Err(PanelError::ShortWrite);
    }
    port.flush().map_err(PanelError::Write)?;

    let reply = read_frame(port)?;
    match PanelEvent::from_payload(&reply) {
        Ok(PanelEvent::Done) => Ok(()),
        _ => Err(PanelError::UnexpectedReply),
    }
}

/// Check for one unsolicited frame; `Ok(None)` means the line was idle
fn poll_frame(port: &mut dyn serialport::SerialPort) -> Result<Option<Vec<u8>>, PanelError> {
    set_timeout(port, POLL_TIMEOUT)?;

    let mut len = [0u8; 1];
    match port.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
        Err(e) => return Err(PanelError::Read(e)),
    }

    read_payload(port, len[0]).map(Some)
}

/// Read one complete frame, retrying the length byte a bounded number
/// of times
fn read_frame(port: &mut dyn serialport::SerialPort) -> Result<Vec<u8>, PanelError> {
    set_timeout(port, READ_TIMEOUT)?;

    let mut len = [0u8; 1];
    let mut tries = 0;
    loop {
        match port.read_exact(&mut len) {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                tries += 1;
                warn!("can't read packet length (attempt {tries})");
                if tries > LENGTH_TRIES {
                    warn!("not trying any more...");
                    return Err(PanelError::RetriesExhausted);
                }
            }
            Err(e) => return Err(PanelError::Read(e)),
        }
    }

    read_payload(port, len[0])
}

/// Read exactly `len` payload bytes; once a length has arrived the
/// payload is read without a deadline
fn read_payload(port: &mut dyn serialport::SerialPort, len: u8) -> Result<Vec<u8>, PanelError> {
    if len < 1 || len as usize > PACKET_CAPACITY {
        return Err(PanelError::BadLength(len));
    }

    set_timeout(port, DRAIN_TIMEOUT)?;

    let mut payload = vec![0u8; len as usize];
    let mut pos = 0;
    while pos < payload.len() {
        match port.read(&mut payload[pos..]) {
            Ok(0) => {
                return Err(PanelError::Read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "panel hung up",
                )))
            }
            Ok(n) => pos += n,
            Err(e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                continue
            }
            Err(e) => return Err(PanelError::Read(e)),
        }
    }

    Ok(payload)
}

fn set_timeout(
    port: &mut dyn serialport::SerialPort,
    timeout: Duration,
) -> Result<(), PanelError> {
    port.set_timeout(timeout)
        .map_err(|e| PanelError::Read(io::Error::new(io::ErrorKind::Other, e)))
}

fn parse_event(payload: Vec<u8>) -> LinkEvent {
    match PanelEvent::from_payload(&payload) {
        Ok(PanelEvent::IrCommand { address, command }) => LinkEvent::Ir { address, command },
        _ => LinkEvent::Unknown(payload),
    }
}
