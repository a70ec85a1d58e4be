//! Authenticated connection over a byte stream.
//!
//! A [`Connection`] owns the stream, the receive buffer, and (once the
//! handshake completes) the [`CryptoSession`]. It moves through
//! `Connected → Authenticating → Ready → Closing`; application messages
//! flow only in `Ready`.
//!
//! Receives are cancel-safe: bytes accumulate in an owned buffer and a
//! frame is only consumed once it is complete, so dropping a pending
//! `receive_message` future (e.g. from a `select!` arm losing the race)
//! never loses wire data.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use cryptcat_crypto::{CryptoSession, MIN_RECORD_LEN, SessionInfo};
use cryptcat_proto::{
    FRAME_HEADER_LEN, FrameError, HandshakeError, MAX_ENCRYPTED_PAYLOAD, MAX_PAYLOAD, Message,
    MsgType, client_complete, client_init, parse_header, server_finish, server_respond,
};

use crate::Error;
use crate::tcp::IO_TIMEOUT;

/// Bound on the whole handshake exchange.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    /// No transport.
    Disconnected,
    /// TCP connect in flight.
    Connecting,
    /// Transport up, handshake not started.
    Connected,
    /// Handshake in flight.
    Authenticating,
    /// Handshake complete; application messages may flow.
    Ready,
    /// Half or fully shut down.
    Closing,
}

/// One authenticated peer relationship.
pub struct Connection<S> {
    stream: S,
    rd: BytesMut,
    state: ConnState,
    crypto: Option<CryptoSession>,
    peer: Option<SocketAddr>,
    bytes_sent: u64,
    bytes_received: u64,
    packets_sent: u32,
    packets_received: u32,
    connected_at: Instant,
    last_activity: Instant,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("bytes_sent", &self.bytes_sent)
            .field("bytes_received", &self.bytes_received)
            .finish()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    fn new(stream: S) -> Self {
        let now = Instant::now();
        Self {
            stream,
            rd: BytesMut::with_capacity(8 * 1024),
            state: ConnState::Connected,
            crypto: None,
            peer: None,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Take the initiator role: run the handshake and return the ready
    /// connection. The exchange is bounded by [`HANDSHAKE_TIMEOUT`].
    pub async fn client(stream: S, passphrase: &[u8]) -> Result<Self, Error> {
        let mut conn = Self::new(stream);
        match timeout(HANDSHAKE_TIMEOUT, conn.handshake_client(passphrase)).await {
            Ok(Ok(())) => {
                conn.state = ConnState::Ready;
                log::info!("handshake complete, channel ready");
                Ok(conn)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Take the acceptor role. Same contract as [`Connection::client`].
    pub async fn server(stream: S, passphrase: &[u8]) -> Result<Self, Error> {
        let mut conn = Self::new(stream);
        match timeout(HANDSHAKE_TIMEOUT, conn.handshake_server(passphrase)).await {
            Ok(Ok(())) => {
                conn.state = ConnState::Ready;
                log::info!("handshake complete, channel ready");
                Ok(conn)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn handshake_client(&mut self, passphrase: &[u8]) -> Result<(), Error> {
        self.state = ConnState::Authenticating;

        let (init, state) = client_init(passphrase)?;
        self.send_frame(MsgType::HandshakeInit, init).await?;

        let (ty, response) = self.receive_frame().await?;
        match ty {
            MsgType::HandshakeResponse => {}
            MsgType::Error => {
                log::error!("peer refused handshake: {}", String::from_utf8_lossy(&response));
                return Err(Error::AuthFailed);
            }
            other => {
                return Err(Error::Malformed(format!("unexpected {other} during handshake")));
            }
        }

        let (complete, session) = match client_complete(state, &response) {
            Ok(ok) => ok,
            Err(e) => return Err(self.refuse_handshake(e).await),
        };
        self.send_frame(MsgType::HandshakeComplete, complete).await?;
        self.crypto = Some(session);
        Ok(())
    }

    async fn handshake_server(&mut self, passphrase: &[u8]) -> Result<(), Error> {
        self.state = ConnState::Authenticating;

        let (ty, init) = self.receive_frame().await?;
        if ty != MsgType::HandshakeInit {
            return Err(Error::Malformed(format!("expected HandshakeInit, got {ty}")));
        }

        let (response, state) = match server_respond(passphrase, &init) {
            Ok(ok) => ok,
            Err(e) => return Err(self.refuse_handshake(e).await),
        };
        self.send_frame(MsgType::HandshakeResponse, response).await?;

        let (ty, complete) = self.receive_frame().await?;
        match ty {
            MsgType::HandshakeComplete => {}
            MsgType::Error => {
                log::error!("peer aborted handshake: {}", String::from_utf8_lossy(&complete));
                return Err(Error::AuthFailed);
            }
            other => {
                return Err(Error::Malformed(format!("unexpected {other} during handshake")));
            }
        }

        let session = match server_finish(state, &complete) {
            Ok(ok) => ok,
            Err(e) => return Err(self.refuse_handshake(e).await),
        };
        self.crypto = Some(session);
        Ok(())
    }

    /// Report a handshake failure to the peer (best-effort) and map it.
    async fn refuse_handshake(&mut self, e: HandshakeError) -> Error {
        let _ = self.send_frame(MsgType::Error, e.to_string().into_bytes()).await;
        self.state = ConnState::Closing;
        e.into()
    }

    /// Send one typed message.
    ///
    /// For the encrypted types the payload is passed through
    /// `CryptoSession::encrypt` first and must fit
    /// [`MAX_ENCRYPTED_PAYLOAD`]; everything else goes out cleartext.
    pub async fn send_message(&mut self, msg_type: MsgType, payload: &[u8]) -> Result<(), Error> {
        if msg_type.is_encrypted() {
            if self.state != ConnState::Ready {
                return Err(Error::InvalidArgument(format!(
                    "cannot send {msg_type} before the connection is ready"
                )));
            }
            if payload.is_empty() || payload.len() > MAX_ENCRYPTED_PAYLOAD {
                return Err(Error::InvalidArgument(format!(
                    "{msg_type} payload must be 1..={MAX_ENCRYPTED_PAYLOAD} bytes"
                )));
            }
            let crypto = self.crypto.as_mut().expect("ready connection has a crypto session");
            let record = crypto.encrypt(payload)?;
            self.send_frame(msg_type, record).await
        } else {
            if payload.len() > MAX_PAYLOAD {
                return Err(Error::InvalidArgument("payload exceeds frame capacity".into()));
            }
            self.send_frame(msg_type, payload.to_vec()).await
        }
    }

    /// Receive the next typed message, decrypting the encrypted types.
    ///
    /// A crypto failure (tamper or replay) is fatal: the connection moves
    /// to `Closing` and the caller must reestablish rather than skip.
    pub async fn receive_message(&mut self) -> Result<(MsgType, Vec<u8>), Error> {
        let (ty, payload) = self.receive_frame().await?;
        if !ty.is_encrypted() {
            return Ok((ty, payload));
        }

        if self.state != ConnState::Ready {
            return Err(Error::Malformed(format!("{ty} before handshake completion")));
        }
        if payload.len() < MIN_RECORD_LEN {
            return Err(Error::Malformed(format!("{ty} record of {} bytes", payload.len())));
        }

        let crypto = self.crypto.as_mut().expect("ready connection has a crypto session");
        match crypto.decrypt(&payload) {
            Ok(plaintext) => Ok((ty, plaintext)),
            Err(e) => {
                log::error!("record rejected ({e}); terminating connection");
                self.state = ConnState::Closing;
                Err(e.into())
            }
        }
    }

    /// Convenience wrapper for [`MsgType::Data`].
    pub async fn send_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send_message(MsgType::Data, data).await
    }

    /// Empty-payload liveness probe.
    pub async fn send_keepalive(&mut self) -> Result<(), Error> {
        self.send_message(MsgType::Keepalive, &[]).await
    }

    /// Best-effort close announcement. The caller still closes the
    /// transport afterwards.
    pub async fn send_disconnect(&mut self, reason: &str) -> Result<(), Error> {
        self.state = ConnState::Closing;
        self.send_message(MsgType::Disconnect, reason.as_bytes()).await
    }

    /// Report a fatal condition to the peer.
    pub async fn send_error(&mut self, reason: &str) -> Result<(), Error> {
        self.send_message(MsgType::Error, reason.as_bytes()).await
    }

    /// Shut the transport down. Key material is zeroized when the crypto
    /// session drops with the connection.
    pub async fn close(mut self) {
        self.state = ConnState::Closing;
        let _ = timeout(IO_TIMEOUT, self.stream.shutdown()).await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Record the remote address. `None` for transports without one.
    pub fn set_peer(&mut self, addr: SocketAddr) {
        self.peer = Some(addr);
    }

    /// The remote address, if known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Crypto session snapshot, once the handshake has completed.
    pub fn crypto_info(&self) -> Option<SessionInfo> {
        self.crypto.as_ref().map(|c| c.info())
    }

    /// Traffic counters and ages.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            state: self.state,
            peer: self.peer,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            connected_for: self.connected_at.elapsed(),
            idle_for: self.last_activity.elapsed(),
        }
    }

    async fn send_frame(&mut self, msg_type: MsgType, payload: Vec<u8>) -> Result<(), Error> {
        let wire = Message::new(msg_type, payload).encode();
        timeout(IO_TIMEOUT, self.stream.write_all(&wire))
            .await
            .map_err(|_| Error::Timeout)??;
        self.bytes_sent += wire.len() as u64;
        self.packets_sent += 1;
        self.last_activity = Instant::now();
        log::trace!("sent {msg_type} ({} bytes)", wire.len());
        Ok(())
    }

    async fn receive_frame(&mut self) -> Result<(MsgType, Vec<u8>), Error> {
        loop {
            if self.rd.len() >= FRAME_HEADER_LEN {
                let header: [u8; FRAME_HEADER_LEN] =
                    self.rd[..FRAME_HEADER_LEN].try_into().unwrap();
                let (ty, len) = parse_header(&header)?;
                if self.rd.len() >= FRAME_HEADER_LEN + len {
                    self.rd.advance(FRAME_HEADER_LEN);
                    let payload = self.rd.split_to(len).to_vec();
                    self.bytes_received += (FRAME_HEADER_LEN + len) as u64;
                    self.packets_received += 1;
                    self.last_activity = Instant::now();
                    log::trace!("received {ty} ({len} bytes)");
                    return Ok((ty, payload));
                }
            }

            let n = timeout(IO_TIMEOUT, self.stream.read_buf(&mut self.rd))
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(Error::Io)?;
            if n == 0 {
                self.state = ConnState::Closing;
                // EOF on a frame boundary is a clean close; EOF with
                // buffered bytes means the peer cut a frame short.
                if self.rd.is_empty() {
                    return Err(Error::TransportClosed);
                }
                return Err(FrameError::Truncated.into());
            }
        }
    }
}

/// Snapshot returned by [`Connection::info`].
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub state: ConnState,
    pub peer: Option<SocketAddr>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub connected_for: Duration,
    pub idle_for: Duration,
}
