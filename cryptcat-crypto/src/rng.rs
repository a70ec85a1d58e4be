//! Cryptographic random bytes with a platform fallback.

use std::fs::File;
use std::io::Read;

use crate::CryptoError;

/// Fill `buf` from the system CSPRNG.
///
/// Falls back to reading `/dev/urandom` directly if `getrandom` fails;
/// [`CryptoError::RandomFailed`] only when neither source delivers.
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    if buf.is_empty() {
        return Err(CryptoError::InvalidParam);
    }
    if getrandom::getrandom(buf).is_ok() {
        return Ok(());
    }
    File::open("/dev/urandom")
        .and_then(|mut f| f.read_exact(buf))
        .map_err(|_| CryptoError::RandomFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        random_bytes(&mut a).unwrap();
        random_bytes(&mut b).unwrap();
        // Two independent draws colliding would be a 2^-256 event.
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_buffer() {
        assert_eq!(random_bytes(&mut []), Err(CryptoError::InvalidParam));
    }
}
