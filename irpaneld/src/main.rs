//! irpaneld - IRPanel bridge daemon
//!
//! Provides a simple layer between the outside world and the panel
//! firmware: one serial link to the panel, one client connection at a
//! time over TCP or a UNIX domain socket.

mod mirror;
mod panel;
mod serial;
mod session;
mod squash;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::mirror::LcdMirror;
use crate::panel::{LinkEvent, PanelHandle};
use crate::session::SessionEnd;

/// Bridge between the IRPanel serial link and network clients
#[derive(Parser, Debug)]
#[command(name = "irpaneld", version)]
#[command(group(ArgGroup::new("listen").required(true).args(["tcp", "unix"])))]
struct Cli {
    /// Path to the serial port device
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// Serial port mode (SPEED,PARITY,BITS,STOP)
    #[arg(short, long, default_value = "9600,n,8,1")]
    mode: String,

    /// Report every Nth repeated IR packet
    #[arg(short, long, default_value_t = 2)]
    squash: u32,

    /// Listen on a TCP socket at HOST:PORT
    #[arg(short, long)]
    tcp: Option<String>,

    /// Listen on a UNIX domain socket at PATH
    #[arg(short, long)]
    unix: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mode: serial::SerialMode = cli
        .mode
        .parse()
        .with_context(|| format!("invalid serial mode '{}'", cli.mode))?;

    let port = serial::open(&cli.device, &mode)
        .with_context(|| format!("can't open serial port device {}", cli.device))?;
    info!("Panel device: {} ({})", cli.device, cli.mode);

    let (mut panel, mut events) = panel::spawn(port);
    let listener = Listener::bind(&cli).await?;

    // Mirrored panel state persists across client sessions
    let mut mirror = LcdMirror::new();

    let result = tokio::select! {
        result = serve(&listener, &mut panel, &mut events, &mut mirror, cli.squash) => result,
        _ = shutdown_signal() => {
            info!("Caught signal, quitting...");
            Ok(())
        }
    };

    if let Some(path) = &cli.unix {
        if std::fs::remove_file(path).is_err() {
            warn!("Can't remove UNIX socket");
        }
    }

    result
}

/// Accept clients one at a time, forever; only a dead panel link or a
/// broken listener ends this
async fn serve(
    listener: &Listener,
    panel: &mut PanelHandle,
    events: &mut mpsc::Receiver<LinkEvent>,
    mirror: &mut LcdMirror,
    squash: u32,
) -> Result<()> {
    loop {
        info!("Waiting for client...");
        let mut client = listener.accept().await.context("error on accept")?;

        info!("Client connected");
        let end = match &mut client {
            Client::Tcp(stream) => session::run(stream, panel, events, mirror, squash).await,
            Client::Unix(stream) => session::run(stream, panel, events, mirror, squash).await,
        };
        info!("Client disconnected");

        if end == SessionEnd::PanelGone {
            bail!("panel link lost");
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

/// The one client listener, TCP or UNIX
enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

enum Client {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Listener {
    async fn bind(cli: &Cli) -> Result<Self> {
        if let Some(host_port) = &cli.tcp {
            let addr: SocketAddr = tokio::net::lookup_host(host_port.as_str())
                .await
                .ok()
                .and_then(|mut addrs| addrs.next())
                .context("can't find IP for the supplied HOST")?;

            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4()?,
                SocketAddr::V6(_) => TcpSocket::new_v6()?,
            };
            socket.set_reuseaddr(true)?;
            socket
                .bind(addr)
                .context("can't bind socket to specified HOST:PORT")?;
            let listener = socket.listen(1)?;

            info!("TCP socket at: {addr}");
            Ok(Listener::Tcp(listener))
        } else if let Some(path) = &cli.unix {
            if path.exists() {
                warn!("File exists at the specified path");
            }
            let listener =
                UnixListener::bind(path).context("can't bind socket to specified PATH")?;

            info!("UNIX socket at: {}", path.display());
            Ok(Listener::Unix(listener))
        } else {
            // clap's listen group makes one of the two mandatory
            bail!("no listener specified");
        }
    }

    async fn accept(&self) -> Result<Client> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                info!("Client from: {peer}");
                Ok(Client::Tcp(stream))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Client::Unix(stream))
            }
        }
    }
}
