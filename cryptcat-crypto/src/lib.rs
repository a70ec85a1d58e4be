//! Cryptographic engine for the Cryptcat protocol.
//!
//! Provides:
//! - PBKDF2-HMAC-SHA256 key derivation (passphrase + salt → cipher/MAC keys)
//! - Twofish-256-CFB record encryption with HMAC-SHA256 authentication
//! - Per-direction IV derivation bound to the handshake nonces
//! - Replay-protected sequence counters
//! - OS RNG access with a `/dev/urandom` fallback
//!
//! Key material is zeroized on drop. The primitives are fixed by the
//! protocol and not negotiated.

#![deny(unsafe_code)]

mod kdf;
mod mac;
mod rng;
mod session;

pub use kdf::{Direction, PBKDF2_ITERATIONS, SessionKeys, derive_session_keys, direction_iv};
pub use mac::{hmac_sha256, hmac_verify};
pub use rng::random_bytes;
pub use session::{CryptoSession, SessionInfo};

/// Twofish-256 key size in bytes.
pub const KEY_SIZE: usize = 32;
/// CFB-128 IV size in bytes.
pub const IV_SIZE: usize = 16;
/// PBKDF2 salt size in bytes.
pub const SALT_SIZE: usize = 32;
/// HMAC-SHA256 tag size in bytes.
pub const MAC_SIZE: usize = 32;
/// Record sequence-number size in bytes.
pub const SEQ_SIZE: usize = 8;
/// Fixed per-record overhead: sequence number plus MAC.
pub const RECORD_OVERHEAD: usize = SEQ_SIZE + MAC_SIZE;
/// Smallest well-formed record: sequence, one ciphertext byte, MAC.
pub const MIN_RECORD_LEN: usize = RECORD_OVERHEAD + 1;
/// Largest plaintext accepted per record.
pub const MAX_PLAINTEXT: usize = 65_536;
/// Largest accepted passphrase, in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 1024;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors from the crypto engine.
///
/// MAC mismatch, replay, and malformed ciphertext are deliberately
/// indistinguishable: all surface as [`CryptoError::AuthFailed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Caller-side misuse: empty/oversized input, bad passphrase length,
    /// or use of an unauthenticated session.
    InvalidParam,
    /// Neither the system CSPRNG nor the fallback source produced bytes.
    RandomFailed,
    /// Authentication failure: MAC mismatch or replayed sequence number.
    AuthFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::RandomFailed => write!(f, "random number generation failed"),
            Self::AuthFailed => write!(f, "authentication failed"),
        }
    }
}

impl std::error::Error for CryptoError {}
