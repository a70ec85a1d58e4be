//! The closed error taxonomy of the core.
//!
//! Peripheral modules keep finer-grained error kinds internally
//! ([`cryptcat_crypto::CryptoError`], [`cryptcat_proto::HandshakeError`],
//! [`crate::transfer::TransferError`], …); everything maps into one of
//! these kinds at the crate boundary.

use std::{fmt, io};

use cryptcat_crypto::CryptoError;
use cryptcat_proto::{FrameError, HandshakeError};

/// Core failure kinds.
#[derive(Debug)]
pub enum Error {
    /// Caller-side misuse: empty passphrase, oversized payload, bad mode.
    InvalidArgument(String),
    /// Wire bytes could not be parsed: bad frame length, unknown tag,
    /// short record, bad file preamble, protocol violation by the peer.
    Malformed(String),
    /// MAC mismatch, replay, handshake proof failure, version mismatch.
    /// Fatal for the session: reestablish, never retry.
    AuthFailed,
    /// A blocking operation exceeded its bound.
    Timeout,
    /// The peer closed or the transport failed irrecoverably.
    TransportClosed,
    /// Local I/O failure (file or socket-level).
    Io(io::Error),
    /// End-of-file SHA-256 mismatch.
    VerifyFailed,
    /// Local cancellation (signal-driven).
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Self::Malformed(what) => write!(f, "malformed message: {what}"),
            Self::AuthFailed => write!(f, "authentication failed"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::TransportClosed => write!(f, "connection closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::VerifyFailed => write!(f, "file checksum verification failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Self::TransportClosed,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidParam => Self::InvalidArgument("crypto: invalid parameter".into()),
            CryptoError::RandomFailed => Self::Io(io::Error::other("random number generation failed")),
            CryptoError::AuthFailed => Self::AuthFailed,
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<HandshakeError> for Error {
    fn from(e: HandshakeError) -> Self {
        match e {
            HandshakeError::Malformed(what) => Self::Malformed(format!("handshake: {what}")),
            HandshakeError::VersionMismatch(_) | HandshakeError::AuthFailed => Self::AuthFailed,
            HandshakeError::Crypto(c) => c.into(),
        }
    }
}
