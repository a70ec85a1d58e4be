//! Authenticated record encryption for one connection.
//!
//! A [`CryptoSession`] owns the derived keys, one stateful CFB context per
//! direction, and the replay counters. Record layout on the wire:
//!
//! ```text
//! offset  size  field
//!   0      8    sequence number (u64, big-endian)
//!   8      L    ciphertext (L == plaintext length)
//!   8+L   32    HMAC-SHA256(mac_key, bytes[0 .. 8+L])
//! ```
//!
//! The wire sequence of record *n* is *n*, starting at 1; the receiver
//! accepts only sequences strictly greater than the last accepted one.
//! There is no out-of-order window: the transport is ordered TCP, so a
//! gap can only mean tampering or replay.

use std::time::{Duration, Instant};

use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use twofish::Twofish;

use crate::kdf::SessionKeys;
use crate::mac::{hmac_sha256, hmac_verify};
use crate::{CryptoError, IV_SIZE, MAC_SIZE, MAX_PLAINTEXT, MIN_RECORD_LEN, SEQ_SIZE};

type CfbEnc = BufEncryptor<Twofish>;
type CfbDec = BufDecryptor<Twofish>;

/// Per-connection, per-endpoint crypto state.
///
/// Created from agreed key material once the handshake has exchanged
/// nonces; usable only after [`CryptoSession::mark_authenticated`], which
/// the handshake driver calls when both proofs have verified.
pub struct CryptoSession {
    keys: SessionKeys,
    enc: CfbEnc,
    dec: CfbDec,
    /// Last sequence number written.
    seq_send: u64,
    /// Last sequence number accepted.
    seq_recv: u64,
    authenticated: bool,
    bytes_sent: u64,
    bytes_received: u64,
    created_at: Instant,
    last_activity: Instant,
}

impl CryptoSession {
    /// Build a session from derived keys and the two direction IVs.
    ///
    /// `send_iv` seeds the keystream for records this endpoint produces,
    /// `recv_iv` the keystream for records it accepts; the peer passes
    /// them swapped.
    pub fn new(keys: SessionKeys, send_iv: &[u8; IV_SIZE], recv_iv: &[u8; IV_SIZE]) -> Self {
        let enc = CfbEnc::new_from_slices(&keys.enc, send_iv).expect("fixed key and IV sizes");
        let dec = CfbDec::new_from_slices(&keys.enc, recv_iv).expect("fixed key and IV sizes");
        let now = Instant::now();
        Self {
            keys,
            enc,
            dec,
            seq_send: 0,
            seq_recv: 0,
            authenticated: false,
            bytes_sent: 0,
            bytes_received: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Mark the session usable. Called once the handshake proofs verify.
    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Whether the handshake has completed for this session.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Encrypt and authenticate one plaintext into a framed record.
    ///
    /// The ciphertext overwrites the record's plaintext copy in place, so
    /// no cleartext scratch buffer outlives the call. On success the send
    /// counter advances; the record is `plaintext.len() + 40` bytes.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.authenticated {
            return Err(CryptoError::InvalidParam);
        }
        if plaintext.is_empty() || plaintext.len() > MAX_PLAINTEXT {
            return Err(CryptoError::InvalidParam);
        }

        let seq = self.seq_send + 1;
        let mut record = Vec::with_capacity(plaintext.len() + SEQ_SIZE + MAC_SIZE);
        record.extend_from_slice(&seq.to_be_bytes());
        record.extend_from_slice(plaintext);
        self.enc.encrypt(&mut record[SEQ_SIZE..]);

        let tag = hmac_sha256(&self.keys.mac, &record);
        record.extend_from_slice(&tag);

        self.seq_send = seq;
        self.bytes_sent += record.len() as u64;
        self.last_activity = Instant::now();
        Ok(record)
    }

    /// Verify and decrypt one record.
    ///
    /// Replay (sequence ≤ last accepted), MAC mismatch, and malformed
    /// ciphertext all surface as [`CryptoError::AuthFailed`]; records
    /// shorter than the minimum are the caller's error. The MAC is checked
    /// before any decryption, so a failed call never advances the receive
    /// keystream or counter.
    pub fn decrypt(&mut self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.authenticated {
            return Err(CryptoError::InvalidParam);
        }
        if record.len() < MIN_RECORD_LEN {
            return Err(CryptoError::InvalidParam);
        }

        let seq = u64::from_be_bytes(record[..SEQ_SIZE].try_into().unwrap());
        if seq <= self.seq_recv {
            return Err(CryptoError::AuthFailed);
        }

        let (body, tag) = record.split_at(record.len() - MAC_SIZE);
        if !hmac_verify(&self.keys.mac, body, tag) {
            return Err(CryptoError::AuthFailed);
        }

        let mut plaintext = body[SEQ_SIZE..].to_vec();
        self.dec.decrypt(&mut plaintext);

        self.seq_recv = seq;
        self.bytes_received += record.len() as u64;
        self.last_activity = Instant::now();
        Ok(plaintext)
    }

    /// Last sequence number written.
    pub fn send_counter(&self) -> u64 {
        self.seq_send
    }

    /// Last sequence number accepted.
    pub fn recv_counter(&self) -> u64 {
        self.seq_recv
    }

    /// Snapshot of the session's fixed parameters and live counters.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            algorithm: "Twofish-256-CFB",
            mode: "CFB with HMAC-SHA256",
            key_derivation: "PBKDF2-HMAC-SHA256 (200k iterations)",
            is_authenticated: self.authenticated,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            session_age: self.created_at.elapsed(),
            idle_time: self.last_activity.elapsed(),
        }
    }
}

/// Descriptive snapshot returned by [`CryptoSession::info`].
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub algorithm: &'static str,
    pub mode: &'static str,
    pub key_derivation: &'static str,
    pub is_authenticated: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub session_age: Duration,
    pub idle_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{Direction, derive_session_keys, direction_iv};
    use crate::{RECORD_OVERHEAD, SALT_SIZE};

    const SALT: [u8; SALT_SIZE] = [0x42; SALT_SIZE];
    const NONCE_C: [u8; 16] = [0x01; 16];
    const NONCE_S: [u8; 16] = [0x02; 16];

    /// Client/server session pair sharing keys, with crossed direction IVs.
    fn pair(passphrase: &[u8]) -> (CryptoSession, CryptoSession) {
        let client_keys = derive_session_keys(passphrase, &SALT).unwrap();
        let server_keys = derive_session_keys(passphrase, &SALT).unwrap();
        let c2s = direction_iv(&client_keys.mac, Direction::ClientToServer, &NONCE_C, &NONCE_S);
        let s2c = direction_iv(&client_keys.mac, Direction::ServerToClient, &NONCE_C, &NONCE_S);

        let mut client = CryptoSession::new(client_keys, &c2s, &s2c);
        let mut server = CryptoSession::new(server_keys, &s2c, &c2s);
        client.mark_authenticated();
        server.mark_authenticated();
        (client, server)
    }

    #[test]
    fn round_trip() {
        let (mut client, mut server) = pair(b"TestPassword123!");
        let msg = b"Hello, Cryptcat! This is a test message.";
        assert_eq!(msg.len(), 40);

        let record = client.encrypt(msg).unwrap();
        assert_eq!(record.len(), 80);
        assert_ne!(&record[8..48], &msg[..]);

        let plain = server.decrypt(&record).unwrap();
        assert_eq!(plain, msg);
        assert_eq!(client.send_counter(), 1);
        assert_eq!(server.recv_counter(), 1);
    }

    #[test]
    fn record_length_is_plaintext_plus_overhead() {
        let (mut client, _) = pair(b"pw");
        for len in [1usize, 17, 4096, 16_384] {
            let record = client.encrypt(&vec![0xAB; len]).unwrap();
            assert_eq!(record.len(), len + RECORD_OVERHEAD);
        }
    }

    #[test]
    fn rejects_empty_and_oversized_plaintext() {
        let (mut client, _) = pair(b"pw");
        assert_eq!(client.encrypt(b""), Err(CryptoError::InvalidParam));
        let big = vec![0u8; MAX_PLAINTEXT + 1];
        assert_eq!(client.encrypt(&big), Err(CryptoError::InvalidParam));
        assert_eq!(client.send_counter(), 0);
    }

    #[test]
    fn unauthenticated_session_is_unusable() {
        let keys = derive_session_keys(b"pw", &SALT).unwrap();
        let iv = [0u8; IV_SIZE];
        let mut session = CryptoSession::new(keys, &iv, &iv);
        assert_eq!(session.encrypt(b"x"), Err(CryptoError::InvalidParam));
        assert_eq!(session.decrypt(&[0u8; 48]), Err(CryptoError::InvalidParam));
    }

    #[test]
    fn rejects_short_records() {
        let (_, mut server) = pair(b"pw");
        assert_eq!(server.decrypt(&[0u8; 40]), Err(CryptoError::InvalidParam));
        assert_eq!(server.decrypt(&[]), Err(CryptoError::InvalidParam));
    }

    #[test]
    fn tampered_record_fails_auth() {
        let (mut client, mut server) = pair(b"TestPassword123!");
        let mut record = client.encrypt(b"Hello, Cryptcat! This is a test message.").unwrap();
        record[10] ^= 0x01;
        assert_eq!(server.decrypt(&record), Err(CryptoError::AuthFailed));
        assert_eq!(server.recv_counter(), 0);
    }

    #[test]
    fn any_single_bit_flip_fails_auth() {
        let (mut client, mut server) = pair(b"pw");
        let record = client.encrypt(b"q").unwrap();
        for byte in 0..record.len() {
            for bit in 0..8 {
                let mut flipped = record.clone();
                flipped[byte] ^= 1 << bit;
                assert_eq!(
                    server.decrypt(&flipped),
                    Err(CryptoError::AuthFailed),
                    "flip of byte {byte} bit {bit} was accepted"
                );
            }
        }
        // The pristine record still decrypts: failures advanced nothing.
        assert_eq!(server.decrypt(&record).unwrap(), b"q");
    }

    #[test]
    fn replayed_record_fails_auth() {
        let (mut client, mut server) = pair(b"TestPassword123!");
        let record = client.encrypt(b"Hello, Cryptcat! This is a test message.").unwrap();
        assert!(server.decrypt(&record).is_ok());
        assert_eq!(server.decrypt(&record), Err(CryptoError::AuthFailed));
        assert_eq!(server.recv_counter(), 1);
    }

    #[test]
    fn counters_strictly_increase() {
        let (mut client, mut server) = pair(b"pw");
        for expected in 1..=8u64 {
            let record = client.encrypt(b"tick").unwrap();
            assert_eq!(client.send_counter(), expected);
            server.decrypt(&record).unwrap();
            assert_eq!(server.recv_counter(), expected);
        }
    }

    #[test]
    fn keystreams_are_per_direction() {
        let (mut client, mut server) = pair(b"pw");
        let from_client = client.encrypt(b"same plaintext").unwrap();
        let from_server = server.encrypt(b"same plaintext").unwrap();
        // Same keys, same sequence number, different IV per direction.
        assert_ne!(&from_client[8..22], &from_server[8..22]);
    }

    #[test]
    fn failed_decrypt_does_not_advance_keystream() {
        let (mut client, mut server) = pair(b"pw");
        let first = client.encrypt(b"first").unwrap();
        let second = client.encrypt(b"second").unwrap();

        let mut garbled = first.clone();
        garbled[9] ^= 0x80;
        assert_eq!(server.decrypt(&garbled), Err(CryptoError::AuthFailed));

        assert_eq!(server.decrypt(&first).unwrap(), b"first");
        assert_eq!(server.decrypt(&second).unwrap(), b"second");
    }

    #[test]
    fn info_reports_counters() {
        let (mut client, _) = pair(b"pw");
        client.encrypt(b"abc").unwrap();
        let info = client.info();
        assert!(info.is_authenticated);
        assert_eq!(info.bytes_sent, 3 + RECORD_OVERHEAD as u64);
        assert_eq!(info.bytes_received, 0);
        assert_eq!(info.algorithm, "Twofish-256-CFB");
    }
}
