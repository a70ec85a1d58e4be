//! Async network layer for Cryptcat.
//!
//! This crate ties the session protocol to real sockets:
//! * [`tcp`] — retrying TCP connect and a configured listener
//! * [`connection`] — the authenticated per-peer [`Connection`] driving the
//!   handshake and typed message exchange
//! * [`transfer`] — the chunked file sender/receiver state machines
//! * [`error`] — the closed error taxonomy every internal failure maps into

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod tcp;
pub mod transfer;

pub use connection::{ConnState, Connection, ConnectionInfo, HANDSHAKE_TIMEOUT};
pub use error::Error;
pub use tcp::{IO_TIMEOUT, Listener, connect};
pub use transfer::{
    CHUNK_SIZE, FileReceiver, FileSender, INACTIVITY_TIMEOUT, MAX_RETRIES, TransferError,
    TransferInfo, TransferState,
};
