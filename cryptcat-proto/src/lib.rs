//! Cryptcat session protocol.
//!
//! This crate handles:
//! * Typed message framing (1-byte tag, 4-byte big-endian length, payload)
//! * The 4-step passphrase handshake that authenticates both directions
//!
//! It is intentionally transport-agnostic and sans-IO: the handshake
//! functions consume received payloads and return the payloads to send
//! plus the next state; the network layer drives the actual socket.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod handshake;
pub mod message;

pub use handshake::{
    ClientHandshake, HandshakeError, NONCE_SIZE, PROTOCOL_VERSION, ServerHandshake,
    client_complete, client_init, server_finish, server_respond,
};
pub use message::{
    FRAME_HEADER_LEN, FrameError, MAX_ENCRYPTED_PAYLOAD, MAX_PAYLOAD, Message, MsgType,
    parse_header,
};
