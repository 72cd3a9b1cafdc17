//! Client session loop
//!
//! Owns one accepted client at a time. Translates the newline-delimited
//! text commands into panel packets, keeps the mirror in sync with what
//! the panel has acknowledged, and pushes squashed decoder events to the
//! client. Each command's panel round trip completes before the next
//! line or event is looked at - there is never more than one command in
//! flight.

use std::io;

use irpanel_protocol::{HostCommand, LCD_COLS, LCD_ROWS};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mirror::{LcdMirror, LCD_SIZE};
use crate::panel::{LinkEvent, PanelError, PanelPort};
use crate::squash::SquashFilter;

/// Maximum client bytes taken in one read
const CLIENT_BUF: usize = 1024;

/// Why the session loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed or errored; accept the next one
    ClientGone,
    /// The panel link died; the daemon cannot continue
    PanelGone,
}

/// The panel link died mid-command
struct PanelDown;

enum Step {
    Event(Option<LinkEvent>),
    Read(io::Result<usize>),
}

/// Run one client session to completion
pub async fn run<S, P>(
    client: &mut S,
    panel: &mut P,
    events: &mut mpsc::Receiver<LinkEvent>,
    mirror: &mut LcdMirror,
    squash_threshold: u32,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: PanelPort,
{
    // Anything the panel produced between clients is stale
    let mut stale = 0;
    while events.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        info!("Dumped {stale} stale panel events");
    }

    let mut squash = SquashFilter::new(squash_threshold);
    let mut buf = [0u8; CLIENT_BUF];

    loop {
        let step = tokio::select! {
            event = events.recv() => Step::Event(event),
            read = client.read(&mut buf) => Step::Read(read),
        };

        match step {
            Step::Event(None) => return SessionEnd::PanelGone,
            Step::Event(Some(LinkEvent::Unknown(payload))) => {
                info!("<< Unknown packet: {payload:02x?}");
            }
            Step::Event(Some(LinkEvent::Ir { address, command })) => {
                if squash.feed(address, command) {
                    let line = format!("ir:{address}:{command}\n");
                    if client.write_all(line.as_bytes()).await.is_err() {
                        return SessionEnd::ClientGone;
                    }
                }
            }
            Step::Read(Ok(0)) => {
                info!("Client EOF");
                return SessionEnd::ClientGone;
            }
            Step::Read(Err(e)) => {
                warn!("Client read error: {e}");
                return SessionEnd::ClientGone;
            }
            Step::Read(Ok(count)) => {
                let chunk = &buf[..count];
                if chunk.last() != Some(&b'\n') {
                    // Whole chunks only; partial commands are not buffered
                    if client.write_all(b"error:command error\n").await.is_err() {
                        return SessionEnd::ClientGone;
                    }
                    continue;
                }

                let text = String::from_utf8_lossy(chunk).into_owned();
                for line in text.split('\n').filter(|line| !line.is_empty()) {
                    let reply = match handle_line(line, mirror, panel).await {
                        Ok(reply) => reply,
                        Err(PanelDown) => return SessionEnd::PanelGone,
                    };
                    if client.write_all(reply.as_bytes()).await.is_err() {
                        return SessionEnd::ClientGone;
                    }
                }
            }
        }
    }
}

/// Process one client command line, returning its single terminal reply
async fn handle_line<P: PanelPort>(
    line: &str,
    mirror: &mut LcdMirror,
    panel: &mut P,
) -> Result<String, PanelDown> {
    debug!("CLI << {line}");

    match line.as_bytes().first().copied() {
        Some(b'q') => Ok(query(line, mirror)),
        Some(b'p') => print(line, mirror, panel).await,
        Some(b'g') => goto(line, mirror, panel).await,
        Some(b'd') => dim(line, mirror, panel).await,
        Some(b'c') => clear(mirror, panel).await,
        Some(b'h') => home(mirror, panel).await,
        _ => {
            info!(">> Unknown command");
            Ok("error:command unknown\n".into())
        }
    }
}

/// Queries are answered entirely from the mirror; no panel round trip
fn query(line: &str, mirror: &LcdMirror) -> String {
    if line.len() != 3 {
        return "error:argument length error\n".into();
    }

    match line.as_bytes()[2] {
        b'p' => {
            let (x, y) = mirror.cursor();
            format!("ok:{x}:{y}\n")
        }
        b'd' => format!("ok:{}\n", mirror.dim()),
        b'l' => format!("ok:{}\n", mirror.contents()),
        _ => {
            info!(">> Unknown query");
            "error:command unknown\n".into()
        }
    }
}

/// Print at the cursor, splitting into row-sized sub-packets and moving
/// to the next row (wrapping to the top) whenever a chunk fills one
async fn print<P: PanelPort>(
    line: &str,
    mirror: &mut LcdMirror,
    panel: &mut P,
) -> Result<String, PanelDown> {
    let text = line.as_bytes().get(2..).unwrap_or_default();
    if text.is_empty() || text.len() > LCD_SIZE {
        return Ok("error:argument length error\n".into());
    }

    let mut sent = 0;
    while sent < text.len() {
        let (x, y) = mirror.cursor();
        let room = (LCD_COLS - x) as usize;
        let take = (text.len() - sent).min(room);
        let chunk = &text[sent..sent + take];

        if let Err(reply) = transact(panel, &HostCommand::Print(chunk)).await? {
            return Ok(reply);
        }
        mirror.write_chunk(chunk);
        sent += take;

        if take >= room {
            // Row filled: an acknowledged goto moves to the next row
            let next_y = if y + 1 >= LCD_ROWS { 0 } else { y + 1 };
            if let Err(reply) = transact(panel, &HostCommand::Goto { x: 0, y: next_y }).await? {
                return Ok(reply);
            }
            mirror.set_cursor(0, next_y);
        } else {
            mirror.set_cursor(x + take as u8, y);
        }
    }

    Ok("ok\n".into())
}

async fn goto<P: PanelPort>(
    line: &str,
    mirror: &mut LcdMirror,
    panel: &mut P,
) -> Result<String, PanelDown> {
    let Some((x, y)) = line.strip_prefix("g:").and_then(parse_pair) else {
        return Ok("error:parse failed\n".into());
    };
    if x < 0 || x >= LCD_COLS as i32 || y < 0 || y >= LCD_ROWS as i32 {
        return Ok("error:argument out of range\n".into());
    }

    let (x, y) = (x as u8, y as u8);
    Ok(match transact(panel, &HostCommand::Goto { x, y }).await? {
        Ok(()) => {
            mirror.set_cursor(x, y);
            "ok\n".into()
        }
        Err(reply) => reply,
    })
}

async fn dim<P: PanelPort>(
    line: &str,
    mirror: &mut LcdMirror,
    panel: &mut P,
) -> Result<String, PanelDown> {
    let Some(value) = line.strip_prefix("d:").and_then(|rest| rest.parse::<i32>().ok()) else {
        return Ok("error:parse failed\n".into());
    };
    if !(0..=255).contains(&value) {
        return Ok("error:argument out of range\n".into());
    }

    let value = value as u8;
    Ok(match transact(panel, &HostCommand::Dim(value)).await? {
        Ok(()) => {
            mirror.set_dim(value);
            "ok\n".into()
        }
        Err(reply) => reply,
    })
}

async fn clear<P: PanelPort>(
    mirror: &mut LcdMirror,
    panel: &mut P,
) -> Result<String, PanelDown> {
    Ok(match transact(panel, &HostCommand::Clear).await? {
        Ok(()) => {
            mirror.clear();
            "ok\n".into()
        }
        Err(reply) => reply,
    })
}

async fn home<P: PanelPort>(
    mirror: &mut LcdMirror,
    panel: &mut P,
) -> Result<String, PanelDown> {
    Ok(match transact(panel, &HostCommand::Home).await? {
        Ok(()) => {
            mirror.home();
            "ok\n".into()
        }
        Err(reply) => reply,
    })
}

/// One panel round trip; failures become the command's error reply,
/// except a dead link which ends the daemon
async fn transact<P: PanelPort>(
    panel: &mut P,
    command: &HostCommand<'_>,
) -> Result<Result<(), String>, PanelDown> {
    match panel.transact(command).await {
        Ok(()) => Ok(Ok(())),
        Err(PanelError::LinkDown) => Err(PanelDown),
        Err(e) => {
            warn!("Panel command failed: {e}");
            let reply = if e.is_write_side() {
                "error:write failed\n"
            } else {
                "error:firmware error\n"
            };
            Ok(Err(reply.into()))
        }
    }
}

/// Parse `<a>:<b>`
fn parse_pair(rest: &str) -> Option<(i32, i32)> {
    let (a, b) = rest.split_once(':')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Panel double that records every packet payload it is asked to send
    #[derive(Default)]
    struct MockPanel {
        sent: Vec<Vec<u8>>,
        /// Fail the Nth transact (1-based) with a device error
        fail_on: Option<usize>,
    }

    impl PanelPort for MockPanel {
        async fn transact(&mut self, command: &HostCommand<'_>) -> Result<(), PanelError> {
            let packet = command.to_packet().unwrap();
            self.sent.push(packet.payload().to_vec());
            if self.fail_on == Some(self.sent.len()) {
                return Err(PanelError::UnexpectedReply);
            }
            Ok(())
        }
    }

    fn print_payload(text: &str) -> Vec<u8> {
        let mut payload = vec![b'p'];
        payload.extend_from_slice(text.as_bytes());
        payload
    }

    struct Harness {
        client: DuplexStream,
        events: mpsc::Sender<LinkEvent>,
        session: tokio::task::JoinHandle<(SessionEnd, MockPanel, LcdMirror)>,
    }

    fn start(squash: u32, panel: MockPanel) -> Harness {
        let (client, server) = tokio::io::duplex(4096);
        let (event_tx, mut event_rx) = mpsc::channel(32);

        let session = tokio::spawn(async move {
            let mut server = server;
            let mut panel = panel;
            let mut mirror = LcdMirror::new();
            let end = run(&mut server, &mut panel, &mut event_rx, &mut mirror, squash).await;
            (end, panel, mirror)
        });

        Harness {
            client,
            events: event_tx,
            session,
        }
    }

    impl Harness {
        async fn send(&mut self, text: &str) {
            self.client.write_all(text.as_bytes()).await.unwrap();
        }

        async fn read_line(&mut self) -> String {
            let mut line = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                self.client.read_exact(&mut byte).await.unwrap();
                if byte[0] == b'\n' {
                    return String::from_utf8(line).unwrap();
                }
                line.push(byte[0]);
            }
        }

        async fn finish(mut self) -> (SessionEnd, MockPanel, LcdMirror) {
            self.client.shutdown().await.unwrap();
            drop(self.client);
            self.session.await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_goto_then_query_position() {
        let mut h = start(2, MockPanel::default());

        h.send("g:5:1\n").await;
        assert_eq!(h.read_line().await, "ok");

        h.send("q:p\n").await;
        assert_eq!(h.read_line().await, "ok:5:1");

        let (end, panel, mirror) = h.finish().await;
        assert_eq!(end, SessionEnd::ClientGone);
        // The query never touched the panel
        assert_eq!(panel.sent, vec![vec![b'g', 5, 1]]);
        assert_eq!(mirror.cursor(), (5, 1));
    }

    #[tokio::test]
    async fn test_print_wraps_across_rows() {
        let mut h = start(2, MockPanel::default());

        h.send("g:15:1\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("p:HelloWorldThisIsLong\n").await;
        assert_eq!(h.read_line().await, "ok");

        let (_, panel, mirror) = h.finish().await;
        assert_eq!(
            panel.sent,
            vec![
                vec![b'g', 15, 1],
                print_payload("Hello"),
                vec![b'g', 0, 2],
                print_payload("WorldThisIsLong"),
            ]
        );

        assert_eq!(mirror.cursor(), (15, 2));
        let contents = mirror.contents();
        assert_eq!(&contents[20 + 15..40], "Hello");
        assert_eq!(&contents[40..40 + 15], "WorldThisIsLong");
    }

    #[tokio::test]
    async fn test_print_wraps_past_last_row_to_top() {
        let mut h = start(2, MockPanel::default());

        h.send("g:18:3\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("p:abcd\n").await;
        assert_eq!(h.read_line().await, "ok");

        let (_, panel, mirror) = h.finish().await;
        assert_eq!(
            panel.sent,
            vec![
                vec![b'g', 18, 3],
                print_payload("ab"),
                vec![b'g', 0, 0],
                print_payload("cd"),
            ]
        );
        assert_eq!(mirror.cursor(), (2, 0));
        let contents = mirror.contents();
        assert_eq!(&contents[78..80], "ab");
        assert_eq!(&contents[0..2], "cd");
    }

    #[tokio::test]
    async fn test_print_failure_aborts_without_ok() {
        let mut h = start(
            2,
            MockPanel {
                fail_on: Some(3),
                ..Default::default()
            },
        );

        h.send("g:15:0\n").await;
        assert_eq!(h.read_line().await, "ok");
        // The row-advance goto fails; the command dies there
        h.send("p:HelloWorld\n").await;
        assert_eq!(h.read_line().await, "error:firmware error");

        let (_, panel, mirror) = h.finish().await;
        assert_eq!(panel.sent.len(), 3);
        // Only the acknowledged part reached the mirror
        assert_eq!(&mirror.contents()[15..20], "Hello");
        assert_eq!(mirror.cursor(), (15, 0));
    }

    #[tokio::test]
    async fn test_dim_out_of_range_is_local() {
        let mut h = start(2, MockPanel::default());

        h.send("d:300\n").await;
        assert_eq!(h.read_line().await, "error:argument out of range");

        h.send("d:-1\n").await;
        assert_eq!(h.read_line().await, "error:argument out of range");

        h.send("d:100\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("q:d\n").await;
        assert_eq!(h.read_line().await, "ok:100");

        let (_, panel, _) = h.finish().await;
        assert_eq!(panel.sent, vec![vec![b'd', 100]]);
    }

    #[tokio::test]
    async fn test_goto_validation() {
        let mut h = start(2, MockPanel::default());

        h.send("g:20:0\n").await;
        assert_eq!(h.read_line().await, "error:argument out of range");
        h.send("g:0:4\n").await;
        assert_eq!(h.read_line().await, "error:argument out of range");
        h.send("g:nope\n").await;
        assert_eq!(h.read_line().await, "error:parse failed");
        h.send("g5:1\n").await;
        assert_eq!(h.read_line().await, "error:parse failed");

        let (_, panel, _) = h.finish().await;
        assert!(panel.sent.is_empty());
    }

    #[tokio::test]
    async fn test_clear_and_home() {
        let mut h = start(2, MockPanel::default());

        h.send("g:3:2\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("p:xyz\n").await;
        assert_eq!(h.read_line().await, "ok");

        h.send("c\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("q:l\n").await;
        assert_eq!(h.read_line().await, format!("ok:{}", " ".repeat(80)));

        h.send("g:7:1\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("h\n").await;
        assert_eq!(h.read_line().await, "ok");
        h.send("q:p\n").await;
        assert_eq!(h.read_line().await, "ok:0:0");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let mut h = start(2, MockPanel::default());

        h.send("z:1\n").await;
        assert_eq!(h.read_line().await, "error:command unknown");
        h.send("q:x\n").await;
        assert_eq!(h.read_line().await, "error:command unknown");

        let (_, panel, _) = h.finish().await;
        assert!(panel.sent.is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_chunk() {
        let mut h = start(2, MockPanel::default());

        h.send("g:1:1").await;
        assert_eq!(h.read_line().await, "error:command error");

        let (_, panel, _) = h.finish().await;
        assert!(panel.sent.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_commands_in_one_chunk() {
        let mut h = start(2, MockPanel::default());

        h.send("g:1:1\nq:p\n").await;
        assert_eq!(h.read_line().await, "ok");
        assert_eq!(h.read_line().await, "ok:1:1");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_ir_events_are_squashed() {
        let mut h = start(3, MockPanel::default());

        for _ in 0..5 {
            h.events
                .send(LinkEvent::Ir {
                    address: 4,
                    command: 9,
                })
                .await
                .unwrap();
        }
        assert_eq!(h.read_line().await, "ir:4:9");

        // The 4th and 5th repeats have not reached the next threshold;
        // a command round trip proves no further event line is queued
        h.send("q:d\n").await;
        assert_eq!(h.read_line().await, "ok:128");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_squash_disabled_passes_everything() {
        let mut h = start(1, MockPanel::default());

        for command in [7, 8] {
            h.events
                .send(LinkEvent::Ir {
                    address: 2,
                    command,
                })
                .await
                .unwrap();
        }
        assert_eq!(h.read_line().await, "ir:2:7");
        assert_eq!(h.read_line().await, "ir:2:8");

        h.finish().await;
    }

    #[tokio::test]
    async fn test_panel_gone_ends_daemon() {
        let h = start(2, MockPanel::default());

        drop(h.events);
        let (end, _, _) = h.session.await.unwrap();
        assert_eq!(end, SessionEnd::PanelGone);
    }
}
