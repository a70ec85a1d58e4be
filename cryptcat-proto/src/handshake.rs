//! Sans-IO passphrase handshake.
//!
//! Four steps, both sides keyed by the same passphrase:
//!
//! ```text
//! Client: HandshakeInit     = version ‖ salt ‖ nonce_c
//! Server: HandshakeResponse = version ‖ nonce_s ‖ HMAC(mac_key, nonce_c)
//! Client: HandshakeComplete = HMAC(mac_key, nonce_s)
//! Server: verifies; both sides hold an authenticated session
//! ```
//!
//! The initiator generates the salt; each side derives the session keys
//! locally with PBKDF2, so key material never crosses the wire. The
//! 32-byte proofs are HMAC-SHA256 under the derived MAC key over the
//! peer's nonce, verified in constant time.
//!
//! # Flow
//!
//! ```text
//! let (init, state) = handshake::client_init(passphrase)?;
//! // send init, receive the response payload
//! let (complete, session) = handshake::client_complete(state, &response)?;
//! // send complete; session is ready
//! ```
//!
//! The server drives [`server_respond`] / [`server_finish`] the same way.

use std::fmt;

use cryptcat_crypto::{
    CryptoError, CryptoSession, Direction, MAC_SIZE, SALT_SIZE, SessionKeys, derive_session_keys,
    direction_iv, hmac_sha256, hmac_verify, random_bytes,
};

/// The only wire version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 1;
/// Handshake nonce size in bytes.
pub const NONCE_SIZE: usize = 16;

const INIT_LEN: usize = 1 + SALT_SIZE + NONCE_SIZE;
const RESPONSE_LEN: usize = 1 + NONCE_SIZE + MAC_SIZE;
const COMPLETE_LEN: usize = MAC_SIZE;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors from the handshake state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    /// A handshake payload had the wrong shape.
    Malformed(&'static str),
    /// The peer speaks a different protocol version.
    VersionMismatch(u8),
    /// A proof did not verify: the passphrases differ or the exchange was
    /// tampered with.
    AuthFailed,
    /// Key derivation or RNG failure.
    Crypto(CryptoError),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(what) => write!(f, "malformed handshake message: {what}"),
            Self::VersionMismatch(v) => {
                write!(f, "peer version {v} unsupported (expected {PROTOCOL_VERSION})")
            }
            Self::AuthFailed => write!(f, "handshake proof verification failed"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
        }
    }
}

impl std::error::Error for HandshakeError {}

impl From<CryptoError> for HandshakeError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// Client state between `HandshakeInit` and `HandshakeResponse`.
pub struct ClientHandshake {
    keys: SessionKeys,
    nonce_c: [u8; NONCE_SIZE],
}

/// Server state between `HandshakeResponse` and `HandshakeComplete`.
pub struct ServerHandshake {
    keys: SessionKeys,
    nonce_c: [u8; NONCE_SIZE],
    nonce_s: [u8; NONCE_SIZE],
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Start the handshake. Returns the `HandshakeInit` payload + opaque state.
pub fn client_init(passphrase: &[u8]) -> Result<(Vec<u8>, ClientHandshake), HandshakeError> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce_c = [0u8; NONCE_SIZE];
    random_bytes(&mut salt)?;
    random_bytes(&mut nonce_c)?;
    do_client_init(passphrase, &salt, &nonce_c)
}

fn do_client_init(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    nonce_c: &[u8; NONCE_SIZE],
) -> Result<(Vec<u8>, ClientHandshake), HandshakeError> {
    let keys = derive_session_keys(passphrase, salt)?;

    let mut payload = Vec::with_capacity(INIT_LEN);
    payload.push(PROTOCOL_VERSION);
    payload.extend_from_slice(salt);
    payload.extend_from_slice(nonce_c);

    Ok((payload, ClientHandshake { keys, nonce_c: *nonce_c }))
}

/// Process `HandshakeResponse`: verify the server's proof over our nonce,
/// produce the `HandshakeComplete` payload and the ready session.
pub fn client_complete(
    data: ClientHandshake,
    response: &[u8],
) -> Result<(Vec<u8>, CryptoSession), HandshakeError> {
    if response.len() != RESPONSE_LEN {
        return Err(HandshakeError::Malformed("handshake response length"));
    }
    if response[0] != PROTOCOL_VERSION {
        return Err(HandshakeError::VersionMismatch(response[0]));
    }

    let nonce_s: [u8; NONCE_SIZE] = response[1..1 + NONCE_SIZE].try_into().unwrap();
    let proof = &response[1 + NONCE_SIZE..];
    if !hmac_verify(&data.keys.mac, &data.nonce_c, proof) {
        log::warn!("server proof rejected: passphrase mismatch or tampering");
        return Err(HandshakeError::AuthFailed);
    }
    log::debug!("server proof verified");

    let complete = hmac_sha256(&data.keys.mac, &nonce_s).to_vec();

    let send_iv = direction_iv(&data.keys.mac, Direction::ClientToServer, &data.nonce_c, &nonce_s);
    let recv_iv = direction_iv(&data.keys.mac, Direction::ServerToClient, &data.nonce_c, &nonce_s);
    let mut session = CryptoSession::new(data.keys, &send_iv, &recv_iv);
    session.mark_authenticated();

    Ok((complete, session))
}

// ─── Server ──────────────────────────────────────────────────────────────────

/// Process `HandshakeInit`: derive keys from the carried salt and produce
/// the `HandshakeResponse` payload + opaque state.
pub fn server_respond(
    passphrase: &[u8],
    init: &[u8],
) -> Result<(Vec<u8>, ServerHandshake), HandshakeError> {
    let mut nonce_s = [0u8; NONCE_SIZE];
    random_bytes(&mut nonce_s)?;
    do_server_respond(passphrase, init, &nonce_s)
}

fn do_server_respond(
    passphrase: &[u8],
    init: &[u8],
    nonce_s: &[u8; NONCE_SIZE],
) -> Result<(Vec<u8>, ServerHandshake), HandshakeError> {
    if init.len() != INIT_LEN {
        return Err(HandshakeError::Malformed("handshake init length"));
    }
    if init[0] != PROTOCOL_VERSION {
        return Err(HandshakeError::VersionMismatch(init[0]));
    }

    let salt: [u8; SALT_SIZE] = init[1..1 + SALT_SIZE].try_into().unwrap();
    let nonce_c: [u8; NONCE_SIZE] = init[1 + SALT_SIZE..].try_into().unwrap();
    let keys = derive_session_keys(passphrase, &salt)?;

    let mut payload = Vec::with_capacity(RESPONSE_LEN);
    payload.push(PROTOCOL_VERSION);
    payload.extend_from_slice(nonce_s);
    payload.extend_from_slice(&hmac_sha256(&keys.mac, &nonce_c));

    Ok((payload, ServerHandshake { keys, nonce_c, nonce_s: *nonce_s }))
}

/// Process `HandshakeComplete`: verify the client's proof over our nonce
/// and produce the ready session.
pub fn server_finish(
    data: ServerHandshake,
    complete: &[u8],
) -> Result<CryptoSession, HandshakeError> {
    if complete.len() != COMPLETE_LEN {
        return Err(HandshakeError::Malformed("handshake complete length"));
    }
    if !hmac_verify(&data.keys.mac, &data.nonce_s, complete) {
        log::warn!("client proof rejected: passphrase mismatch or tampering");
        return Err(HandshakeError::AuthFailed);
    }
    log::debug!("client proof verified");

    let send_iv = direction_iv(&data.keys.mac, Direction::ServerToClient, &data.nonce_c, &data.nonce_s);
    let recv_iv = direction_iv(&data.keys.mac, Direction::ClientToServer, &data.nonce_c, &data.nonce_s);
    let mut session = CryptoSession::new(data.keys, &send_iv, &recv_iv);
    session.mark_authenticated();

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; SALT_SIZE] = [0x11; SALT_SIZE];
    const NONCE_C: [u8; NONCE_SIZE] = [0x22; NONCE_SIZE];
    const NONCE_S: [u8; NONCE_SIZE] = [0x33; NONCE_SIZE];

    fn run(client_pw: &[u8], server_pw: &[u8]) -> Result<(CryptoSession, CryptoSession), HandshakeError> {
        let (init, c1) = do_client_init(client_pw, &SALT, &NONCE_C)?;
        let (response, s1) = do_server_respond(server_pw, &init, &NONCE_S)?;
        let (complete, client) = client_complete(c1, &response)?;
        let server = server_finish(s1, &complete)?;
        Ok((client, server))
    }

    #[test]
    fn init_payload_layout() {
        let (init, _) = do_client_init(b"pw", &SALT, &NONCE_C).unwrap();
        assert_eq!(init.len(), 49);
        assert_eq!(init[0], PROTOCOL_VERSION);
        assert_eq!(&init[1..33], &SALT);
        assert_eq!(&init[33..], &NONCE_C);
    }

    #[test]
    fn matching_passphrases_complete() {
        let (mut client, mut server) = run(b"hunter2", b"hunter2").unwrap();
        assert!(client.is_authenticated());
        assert!(server.is_authenticated());

        let up = client.encrypt(b"ping").unwrap();
        assert_eq!(server.decrypt(&up).unwrap(), b"ping");
        let down = server.encrypt(b"pong").unwrap();
        assert_eq!(client.decrypt(&down).unwrap(), b"pong");
    }

    #[test]
    fn mismatched_passphrases_fail_on_first_proof() {
        // The client sees the bad proof first and never sends its own.
        let (init, c1) = do_client_init(b"a", &SALT, &NONCE_C).unwrap();
        let (response, _) = do_server_respond(b"b", &init, &NONCE_S).unwrap();
        assert!(matches!(client_complete(c1, &response), Err(HandshakeError::AuthFailed)));
    }

    #[test]
    fn forged_complete_fails_server_side() {
        let (init, _) = do_client_init(b"a", &SALT, &NONCE_C).unwrap();
        let (_, s1) = do_server_respond(b"a", &init, &NONCE_S).unwrap();
        let forged = hmac_sha256(b"wrong key", &NONCE_S);
        assert!(matches!(server_finish(s1, &forged), Err(HandshakeError::AuthFailed)));
    }

    #[test]
    fn version_is_refused() {
        let (mut init, _) = do_client_init(b"pw", &SALT, &NONCE_C).unwrap();
        init[0] = 2;
        assert!(matches!(
            do_server_respond(b"pw", &init, &NONCE_S),
            Err(HandshakeError::VersionMismatch(2))
        ));

        let (init, c1) = do_client_init(b"pw", &SALT, &NONCE_C).unwrap();
        let (mut response, _) = do_server_respond(b"pw", &init, &NONCE_S).unwrap();
        response[0] = 0;
        assert!(matches!(
            client_complete(c1, &response),
            Err(HandshakeError::VersionMismatch(0))
        ));
    }

    #[test]
    fn truncated_messages_are_malformed() {
        assert!(matches!(
            do_server_respond(b"pw", &[PROTOCOL_VERSION; 10], &NONCE_S),
            Err(HandshakeError::Malformed(_))
        ));

        let (init, c1) = do_client_init(b"pw", &SALT, &NONCE_C).unwrap();
        let (response, s1) = do_server_respond(b"pw", &init, &NONCE_S).unwrap();
        assert!(matches!(
            client_complete(c1, &response[..response.len() - 1]),
            Err(HandshakeError::Malformed(_))
        ));
        assert!(matches!(
            server_finish(s1, &[0u8; 31]),
            Err(HandshakeError::Malformed(_))
        ));
    }

    #[test]
    fn tampered_proof_fails() {
        let (init, c1) = do_client_init(b"pw", &SALT, &NONCE_C).unwrap();
        let (mut response, _) = do_server_respond(b"pw", &init, &NONCE_S).unwrap();
        response[20] ^= 0x40;
        assert!(matches!(client_complete(c1, &response), Err(HandshakeError::AuthFailed)));
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        assert!(matches!(
            do_client_init(b"", &SALT, &NONCE_C),
            Err(HandshakeError::Crypto(CryptoError::InvalidParam))
        ));
    }
}
