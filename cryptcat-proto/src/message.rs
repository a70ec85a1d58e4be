//! Typed message framing.
//!
//! Wire layout of one frame, outside the crypto record:
//!
//! ```text
//! size  field
//!  1    type tag
//!  4    payload length N, big-endian, N ≤ 65 536
//!  N    payload bytes
//! ```
//!
//! For [`MsgType::is_encrypted`] types the payload is a crypto record;
//! handshake messages, `Keepalive`, `Disconnect`, and `Error` travel
//! cleartext.

use cryptcat_crypto::RECORD_OVERHEAD;

/// Size of the fixed frame header (tag + length).
pub const FRAME_HEADER_LEN: usize = 5;
/// Largest frame payload accepted on the wire.
pub const MAX_PAYLOAD: usize = 65_536;
/// Largest plaintext for an encrypted message: its record must still fit
/// a frame, so the crypto overhead comes off the frame cap.
pub const MAX_ENCRYPTED_PAYLOAD: usize = MAX_PAYLOAD - RECORD_OVERHEAD;

// ─── Message types ───────────────────────────────────────────────────────────

/// Single-byte message tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Client hello: version, salt, client nonce.
    HandshakeInit = 0x01,
    /// Server reply: version, server nonce, proof over the client nonce.
    HandshakeResponse = 0x02,
    /// Client proof over the server nonce.
    HandshakeComplete = 0x03,
    /// Application bytes.
    Data = 0x10,
    /// File-transfer preamble: `name|size|sha256`.
    FileStart = 0x20,
    /// One file chunk: chunk number plus bytes.
    FileChunk = 0x21,
    /// File-transfer trailer: raw SHA-256 of the whole file.
    FileEnd = 0x22,
    /// Peer liveness probe, empty payload.
    Keepalive = 0x30,
    /// Best-effort close announcement with a reason string.
    Disconnect = 0x40,
    /// Fatal condition report with a reason string.
    Error = 0xFF,
}

impl MsgType {
    /// Decode a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::HandshakeInit,
            0x02 => Self::HandshakeResponse,
            0x03 => Self::HandshakeComplete,
            0x10 => Self::Data,
            0x20 => Self::FileStart,
            0x21 => Self::FileChunk,
            0x22 => Self::FileEnd,
            0x30 => Self::Keepalive,
            0x40 => Self::Disconnect,
            0xFF => Self::Error,
            _ => return None,
        })
    }

    /// The wire tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this type's frame payload is a crypto record.
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Data | Self::FileStart | Self::FileChunk | Self::FileEnd)
    }

    /// Whether this type belongs to the handshake exchange.
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::HandshakeInit | Self::HandshakeResponse | Self::HandshakeComplete)
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HandshakeInit => "HandshakeInit",
            Self::HandshakeResponse => "HandshakeResponse",
            Self::HandshakeComplete => "HandshakeComplete",
            Self::Data => "Data",
            Self::FileStart => "FileStart",
            Self::FileChunk => "FileChunk",
            Self::FileEnd => "FileEnd",
            Self::Keepalive => "Keepalive",
            Self::Disconnect => "Disconnect",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

// ─── Error ────────────────────────────────────────────────────────────────────

/// Frame-level parse failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The tag byte does not name a known message type.
    UnknownTag(u8),
    /// The header declares a payload larger than [`MAX_PAYLOAD`].
    Oversize(usize),
    /// The stream ended inside a frame.
    Truncated,
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTag(tag) => write!(f, "unknown message tag 0x{tag:02x}"),
            Self::Oversize(len) => write!(f, "frame payload of {len} bytes exceeds {MAX_PAYLOAD}"),
            Self::Truncated => write!(f, "truncated frame"),
        }
    }
}

impl std::error::Error for FrameError {}

// ─── Frame codec ─────────────────────────────────────────────────────────────

/// One typed message, framed for the wire by [`Message::encode`].
#[derive(Debug)]
pub struct Message {
    /// The type tag.
    pub msg_type: MsgType,
    /// Payload bytes (a crypto record for encrypted types).
    pub payload: Vec<u8>,
}

impl Message {
    /// Wrap a payload. The payload must already fit [`MAX_PAYLOAD`]; the
    /// senders enforce that before encryption.
    pub fn new(msg_type: MsgType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// Serialize into the wire frame: `tag ‖ len(BE) ‖ payload`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.push(self.msg_type.tag());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Validate a frame header, yielding the type and payload length.
pub fn parse_header(header: &[u8; FRAME_HEADER_LEN]) -> Result<(MsgType, usize), FrameError> {
    let msg_type = MsgType::from_tag(header[0]).ok_or(FrameError::UnknownTag(header[0]))?;
    let len = u32::from_be_bytes(header[1..].try_into().unwrap()) as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::Oversize(len));
    }
    Ok((msg_type, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for tag in [0x01, 0x02, 0x03, 0x10, 0x20, 0x21, 0x22, 0x30, 0x40, 0xFF] {
            let ty = MsgType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(MsgType::from_tag(0x04), None);
        assert_eq!(MsgType::from_tag(0x00), None);
    }

    #[test]
    fn encrypted_types_are_exactly_the_data_and_file_family() {
        assert!(MsgType::Data.is_encrypted());
        assert!(MsgType::FileStart.is_encrypted());
        assert!(MsgType::FileChunk.is_encrypted());
        assert!(MsgType::FileEnd.is_encrypted());
        assert!(!MsgType::HandshakeInit.is_encrypted());
        assert!(!MsgType::Keepalive.is_encrypted());
        assert!(!MsgType::Disconnect.is_encrypted());
        assert!(!MsgType::Error.is_encrypted());
    }

    #[test]
    fn frame_layout() {
        let wire = Message::new(MsgType::Data, vec![0xAA, 0xBB, 0xCC]).encode();
        assert_eq!(wire.len(), FRAME_HEADER_LEN + 3);
        assert_eq!(wire[0], 0x10);
        assert_eq!(&wire[1..5], &3u32.to_be_bytes());
        assert_eq!(&wire[5..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn empty_payload_frame() {
        let wire = Message::new(MsgType::Keepalive, Vec::new()).encode();
        assert_eq!(wire, [0x30, 0, 0, 0, 0]);
    }

    #[test]
    fn header_parse_accepts_valid() {
        let (ty, len) = parse_header(&[0x21, 0x00, 0x00, 0x40, 0x04]).unwrap();
        assert_eq!(ty, MsgType::FileChunk);
        assert_eq!(len, 0x4004);
    }

    #[test]
    fn header_parse_rejects_unknown_tag() {
        assert_eq!(
            parse_header(&[0x05, 0, 0, 0, 1]),
            Err(FrameError::UnknownTag(0x05))
        );
    }

    #[test]
    fn truncation_has_its_own_kind() {
        assert_eq!(FrameError::Truncated.to_string(), "truncated frame");
    }

    #[test]
    fn header_parse_rejects_oversize() {
        let mut header = [0x10, 0, 0, 0, 0];
        header[1..].copy_from_slice(&((MAX_PAYLOAD as u32) + 1).to_be_bytes());
        assert_eq!(
            parse_header(&header),
            Err(FrameError::Oversize(MAX_PAYLOAD + 1))
        );
        header[1..].copy_from_slice(&(MAX_PAYLOAD as u32).to_be_bytes());
        assert!(parse_header(&header).is_ok());
    }
}
