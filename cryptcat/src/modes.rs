//! Mode drivers: the stdin/socket relay loop, file sending, and the
//! listener accept loop.
//!
//! One `tokio::select!` loop per connection multiplexes stdin, the
//! connection, a keepalive tick, and the shutdown flag; the file engines
//! run on the same task, so there is no background IO to race against.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, interval_at};

use cryptcat_net::{
    Connection, Error, FileReceiver, FileSender, Listener, MAX_RETRIES, connect,
};
use cryptcat_proto::MsgType;

const STDIN_BUF: usize = 8192;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// What to do once a connection is `Ready`.
#[derive(Clone)]
pub enum Mode {
    /// Raw byte relay between stdin/stdout and the channel.
    Relay,
    /// Line-oriented relay with a peer prefix on output.
    Chat,
    /// Drive one file to the peer, then close.
    SendFile(PathBuf),
}

// ─── Shutdown flag ───────────────────────────────────────────────────────────

/// Process-wide shutdown flag, set once by SIGINT or SIGTERM.
///
/// Every blocking loop selects on [`Shutdown::wait`], so the flag is
/// observed at least once per timeout tick.
#[derive(Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Install the signal handlers and return the flag handle.
    pub fn install() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("SIGTERM handler installs on unix");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            let _ = ctrl_c.await;

            log::info!("shutdown signal received");
            let _ = tx.send(true);
        });
        Self(rx)
    }

    /// Resolve once the flag is raised.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|&raised| raised).await;
    }
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Connect out, authenticate, and run `mode`.
pub async fn run_connect(
    host: &str,
    port: u16,
    passphrase: &[u8],
    mode: Mode,
    shutdown: Shutdown,
) -> Result<(), Error> {
    let stream = connect(host, port).await?;
    let peer = stream.peer_addr().ok();
    let mut conn = Connection::client(stream, passphrase).await?;
    if let Some(addr) = peer {
        conn.set_peer(addr);
    }
    drive(conn, mode, shutdown).await
}

/// Accept and serve connections sequentially until interrupted.
pub async fn run_listen(
    port: u16,
    passphrase: &[u8],
    mode: Mode,
    mut shutdown: Shutdown,
) -> Result<(), Error> {
    let listener = Listener::bind(port).await?;

    loop {
        tokio::select! {
            _ = shutdown.wait() => return Err(Error::Cancelled),

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(ok) => ok,
                    Err(e) => {
                        log::error!("accept failed: {e}");
                        continue;
                    }
                };
                match Connection::server(stream, passphrase).await {
                    Ok(mut conn) => {
                        conn.set_peer(peer);
                        match drive(conn, mode.clone(), shutdown.clone()).await {
                            Ok(()) => log::info!("session with {peer} ended"),
                            Err(Error::Cancelled) => return Err(Error::Cancelled),
                            Err(e) => log::warn!("session with {peer} failed: {e}"),
                        }
                    }
                    Err(e) => log::warn!("handshake with {peer} failed: {e}"),
                }
            }
        }
    }
}

async fn drive(conn: Connection<TcpStream>, mode: Mode, shutdown: Shutdown) -> Result<(), Error> {
    match mode {
        Mode::Relay => relay(conn, false, shutdown).await,
        Mode::Chat => relay(conn, true, shutdown).await,
        Mode::SendFile(path) => send_file(conn, &path, shutdown).await,
    }
}

// ─── Relay loop ──────────────────────────────────────────────────────────────

async fn relay(
    mut conn: Connection<TcpStream>,
    chat: bool,
    mut shutdown: Shutdown,
) -> Result<(), Error> {
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; STDIN_BUF];
    let mut line = Vec::new();
    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait() => {
                let _ = conn.send_disconnect("interrupted").await;
                conn.close().await;
                return Err(Error::Cancelled);
            }

            read = stdin.read(&mut buf) => match read {
                Ok(0) => {
                    let _ = conn.send_disconnect("end of input").await;
                    conn.close().await;
                    return Ok(());
                }
                Ok(n) => {
                    if chat {
                        line.extend_from_slice(&buf[..n]);
                        while let Some(pos) = line.iter().position(|&b| b == b'\n') {
                            let mut one: Vec<u8> = line.drain(..=pos).collect();
                            one.pop();
                            if !one.is_empty() {
                                conn.send_data(&one).await?;
                            }
                        }
                    } else {
                        conn.send_data(&buf[..n]).await?;
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            },

            received = conn.receive_message() => match received {
                Ok((MsgType::Data, payload)) => {
                    if chat {
                        stdout.write_all(b"peer> ").await.map_err(Error::Io)?;
                        stdout.write_all(&payload).await.map_err(Error::Io)?;
                        stdout.write_all(b"\n").await.map_err(Error::Io)?;
                    } else {
                        stdout.write_all(&payload).await.map_err(Error::Io)?;
                    }
                    stdout.flush().await.map_err(Error::Io)?;
                }
                Ok((MsgType::Keepalive, _)) => {
                    log::debug!("keepalive from peer");
                }
                Ok((MsgType::Disconnect, reason)) => {
                    log::info!("peer disconnected: {}", String::from_utf8_lossy(&reason));
                    conn.close().await;
                    return Ok(());
                }
                Ok((MsgType::Error, reason)) => {
                    log::error!("peer reported: {}", String::from_utf8_lossy(&reason));
                    conn.close().await;
                    return Err(Error::TransportClosed);
                }
                Ok((MsgType::FileStart, preamble)) => {
                    match receive_file(&mut conn, &preamble, &mut shutdown).await {
                        Ok(()) => {}
                        // A failed transfer does not take the connection down.
                        Err(e @ (Error::Malformed(_) | Error::VerifyFailed | Error::Timeout)) => {
                            log::error!("file receive failed: {e}");
                        }
                        Err(fatal) => {
                            conn.close().await;
                            return Err(fatal);
                        }
                    }
                }
                Ok((other, _)) => {
                    log::warn!("unexpected {other} message ignored");
                }
                Err(Error::Timeout) => {
                    // Idle tick; loop around and recheck the shutdown flag.
                }
                Err(Error::TransportClosed) => {
                    log::info!("connection closed by peer");
                    return Ok(());
                }
                Err(e) => {
                    conn.close().await;
                    return Err(e);
                }
            },

            _ = keepalive.tick() => {
                conn.send_keepalive().await?;
            }
        }
    }
}

// ─── File transfer driving ───────────────────────────────────────────────────

/// Receive one announced file into the working directory, then return to
/// relaying.
async fn receive_file(
    conn: &mut Connection<TcpStream>,
    preamble: &[u8],
    shutdown: &mut Shutdown,
) -> Result<(), Error> {
    let mut rx = FileReceiver::begin(preamble, Path::new(".")).await?;
    let mut timeouts = 0u32;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait() => {
                rx.cancel().await;
                return Err(Error::Cancelled);
            }

            received = conn.receive_message() => match received {
                Ok((MsgType::FileChunk, payload)) => {
                    timeouts = 0;
                    rx.chunk(&payload).await?;
                }
                Ok((MsgType::FileEnd, payload)) => {
                    let dest = rx.finish(&payload).await?;
                    log::info!("stored {}", dest.display());
                    return Ok(());
                }
                Ok((MsgType::Keepalive, _)) => {}
                Ok((MsgType::Disconnect, _)) => {
                    rx.cancel().await;
                    return Err(Error::TransportClosed);
                }
                Ok((other, _)) => {
                    rx.cancel().await;
                    return Err(Error::Malformed(format!(
                        "{other} in the middle of a file transfer"
                    )));
                }
                Err(Error::Timeout) => {
                    timeouts += 1;
                    if timeouts > MAX_RETRIES {
                        rx.cancel().await;
                        return Err(Error::Timeout);
                    }
                    log::debug!("transfer idle ({timeouts}/{MAX_RETRIES})");
                }
                Err(e) => {
                    rx.cancel().await;
                    return Err(e);
                }
            }
        }
    }
}

/// Send one file, reporting progress about once a second.
async fn send_file(
    mut conn: Connection<TcpStream>,
    path: &Path,
    mut shutdown: Shutdown,
) -> Result<(), Error> {
    let mut tx = FileSender::open(path).await?;
    tx.start(&mut conn).await?;
    let mut last_report = std::time::Instant::now();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.wait() => {
                tx.cancel();
                let _ = conn.send_disconnect("transfer cancelled").await;
                conn.close().await;
                return Err(Error::Cancelled);
            }

            step = tx.send_next(&mut conn) => {
                if step? {
                    break;
                }
                if last_report.elapsed() >= Duration::from_secs(1) {
                    let info = tx.info();
                    log::info!(
                        "progress: {}% ({}/{} bytes, {} B/s)",
                        info.progress_percent,
                        info.bytes_transferred,
                        info.file_size,
                        info.rate_bps
                    );
                    last_report = std::time::Instant::now();
                }
            }
        }
    }

    let info = tx.info();
    log::info!(
        "sent {} ({} bytes, {} chunks)",
        info.filename,
        info.file_size,
        info.chunks_sent
    );
    let _ = conn.send_disconnect("transfer complete").await;
    conn.close().await;
    Ok(())
}
