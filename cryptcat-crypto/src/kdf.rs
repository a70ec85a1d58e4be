//! Passphrase → key material derivation.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::mac::hmac_sha256;
use crate::{CryptoError, IV_SIZE, KEY_SIZE, MAX_PASSPHRASE_LEN, SALT_SIZE};

/// PBKDF2 iteration count. Fixed by the protocol.
pub const PBKDF2_ITERATIONS: u32 = 200_000;

/// Derived per-session key material: cipher key and MAC key.
///
/// Both halves are overwritten when the value is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Twofish-256 cipher key.
    pub enc: [u8; KEY_SIZE],
    /// HMAC-SHA256 key.
    pub mac: [u8; KEY_SIZE],
}

/// Derive the session keys from a passphrase and a shared salt.
///
/// Deterministic: equal `(passphrase, salt)` pairs always yield identical
/// keys, which is what lets two endpoints agree on key material without
/// ever putting it on the wire. Rejects empty passphrases and passphrases
/// longer than [`MAX_PASSPHRASE_LEN`] bytes.
pub fn derive_session_keys(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
) -> Result<SessionKeys, CryptoError> {
    if passphrase.is_empty() || passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(CryptoError::InvalidParam);
    }

    let mut derived = [0u8; KEY_SIZE * 2];
    pbkdf2_hmac::<Sha256>(passphrase, salt, PBKDF2_ITERATIONS, &mut derived);

    let mut keys = SessionKeys { enc: [0; KEY_SIZE], mac: [0; KEY_SIZE] };
    keys.enc.copy_from_slice(&derived[..KEY_SIZE]);
    keys.mac.copy_from_slice(&derived[KEY_SIZE..]);
    derived.zeroize();

    Ok(keys)
}

/// Wire direction of one CFB keystream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Records produced by the connection initiator.
    ClientToServer,
    /// Records produced by the accepting side.
    ServerToClient,
}

impl Direction {
    fn tag(self) -> &'static [u8] {
        match self {
            Direction::ClientToServer => b"cryptcat-iv-c2s",
            Direction::ServerToClient => b"cryptcat-iv-s2c",
        }
    }
}

/// Derive the CFB IV for one direction.
///
/// Each direction gets its own keystream origin, bound to both handshake
/// nonces: `HMAC-SHA256(mac_key, tag ‖ nonce_c ‖ nonce_s)` truncated to
/// the IV size. Both endpoints compute both IVs locally after the nonce
/// exchange; nothing extra travels on the wire.
pub fn direction_iv(
    mac_key: &[u8; KEY_SIZE],
    direction: Direction,
    nonce_c: &[u8],
    nonce_s: &[u8],
) -> [u8; IV_SIZE] {
    let tag = direction.tag();
    let mut input = Vec::with_capacity(tag.len() + nonce_c.len() + nonce_s.len());
    input.extend_from_slice(tag);
    input.extend_from_slice(nonce_c);
    input.extend_from_slice(nonce_s);

    let digest = hmac_sha256(mac_key, &input);
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&digest[..IV_SIZE]);
    iv
}


impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKeys(..)")
    }
}
