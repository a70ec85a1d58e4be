//! TCP transport: retrying connect and a configured listener.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tokio::time::{sleep, timeout};

use crate::Error;

/// Maximum connect attempts before giving up.
pub const CONNECT_ATTEMPTS: u32 = 3;
/// Delay between connect attempts.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Bound on a single address connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on any single socket read or write.
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);

const LISTEN_BACKLOG: i32 = 128;

/// Connect to `host:port` with bounded retry.
///
/// Each attempt iterates every resolved address (v4 and v6) before backing
/// off for [`CONNECT_BACKOFF`]; transient failures are retried up to
/// [`CONNECT_ATTEMPTS`] times, everything else propagates as `Io`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream, Error> {
    let mut last_err: Option<io::Error> = None;

    for attempt in 1..=CONNECT_ATTEMPTS {
        if attempt > 1 {
            log::warn!(
                "connection attempt {}/{} failed, retrying in {:?}",
                attempt - 1,
                CONNECT_ATTEMPTS,
                CONNECT_BACKOFF
            );
            sleep(CONNECT_BACKOFF).await;
        }

        let addrs = match lookup_host((host, port)).await {
            Ok(addrs) => addrs,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };

        for addr in addrs {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    configure_stream(&stream)?;
                    log::info!("connected to {addr}");
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => {
                    last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
                }
            }
        }
    }

    log::error!("failed to connect to {host}:{port} after {CONNECT_ATTEMPTS} attempts");
    match last_err {
        Some(e) => Err(e.into()),
        None => Err(Error::Timeout),
    }
}

fn configure_stream(stream: &TcpStream) -> Result<(), Error> {
    let sock = SockRef::from(stream);
    sock.set_keepalive(true).map_err(Error::Io)?;
    stream.set_nodelay(true).map_err(Error::Io)?;
    Ok(())
}

/// A bound TCP listener with the protocol's socket options applied.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind on all interfaces.
    ///
    /// SO_REUSEADDR is required; SO_REUSEPORT is applied where the platform
    /// offers it. The socket is nonblocking with a backlog of
    /// 128.
    pub async fn bind(port: u16) -> Result<Self, Error> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        if let Err(e) = socket.set_reuse_port(true) {
            log::warn!("SO_REUSEPORT unavailable: {e}");
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        let inner = TcpListener::from_std(socket.into())?;
        log::info!("listening on port {port}");
        Ok(Self { inner })
    }

    /// Accept one connection, with keep-alive applied to the new stream.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), Error> {
        let (stream, peer) = self.inner.accept().await?;
        configure_stream(&stream)?;
        log::info!("accepted connection from {peer}");
        Ok((stream, peer))
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_accept_loopback() {
        let listener = Listener::bind(0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (client, (accepted, _peer)) = tokio::join!(
            connect("127.0.0.1", port),
            async { listener.accept().await.unwrap() },
        );
        let client = client.unwrap();
        assert_eq!(
            client.peer_addr().unwrap().port(),
            accepted.local_addr().unwrap().port()
        );
    }

    #[tokio::test]
    async fn connect_to_dead_port_retries_then_fails() {
        // Bind + drop to find a port with nothing listening.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let started = std::time::Instant::now();
        let err = connect("127.0.0.1", port).await;
        assert!(err.is_err());
        // Two back-off sleeps between the three attempts.
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
