//! Chunked file transfer with end-to-end SHA-256 verification.
//!
//! One directional engine per transfer. The sender emits
//! `FileStart → FileChunk* → FileEnd`; the receiver writes into
//! `<name>.part` and renames only after the digest checks out against both
//! the preamble and the trailer. Chunk numbers ride inside the encrypted
//! payload (4-byte big-endian prefix), so ordering is covered by the MAC.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use cryptcat_proto::MsgType;

use crate::{Connection, Error};

/// Bytes of file data per chunk.
pub const CHUNK_SIZE: usize = 16_384;
/// Upper bound a receiver tolerates for one chunk.
pub const MAX_CHUNK_SIZE: usize = 65_536;
/// Inactivity bound while a transfer is in flight.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
/// Consecutive receive timeouts tolerated before the transfer fails.
pub const MAX_RETRIES: u32 = 5;

/// `FileStart` payload cap: `name|size|sha256` in ASCII.
pub const MAX_START_PAYLOAD: usize = 620;

const CHUNK_PREFIX: usize = 4;
const HASH_BUF_SIZE: usize = 8192;
const MAX_NAME_LEN: usize = 512;

// ─── States and errors ───────────────────────────────────────────────────────

/// Lifecycle of one transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Preparing,
    Sending,
    Receiving,
    Complete,
    Error,
    Cancelled,
}

/// Fine-grained transfer failures; they map into the core taxonomy at the
/// crate boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferError {
    /// A chunk arrived with the wrong number (gap or duplicate).
    OutOfOrder { expected: u32, got: u32 },
    /// The peer sent more bytes than `FileStart` declared.
    SizeExceeded { declared: u64 },
    /// The `FileStart` preamble could not be parsed.
    BadStart(&'static str),
    /// The announced file name is empty, non-ASCII, or path-escaping.
    UnsafeName,
    /// The stored file's SHA-256 does not match the announced digests.
    VerifyFailed,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { expected, got } => {
                write!(f, "out-of-order chunk: expected {expected}, got {got}")
            }
            Self::SizeExceeded { declared } => {
                write!(f, "received bytes exceed the declared size of {declared}")
            }
            Self::BadStart(what) => write!(f, "bad file preamble: {what}"),
            Self::UnsafeName => write!(f, "unsafe file name"),
            Self::VerifyFailed => write!(f, "file checksum mismatch"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::VerifyFailed => Self::VerifyFailed,
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// Progress snapshot shared by both engines.
#[derive(Clone, Debug)]
pub struct TransferInfo {
    pub state: TransferState,
    pub filename: String,
    pub bytes_transferred: u64,
    pub file_size: u64,
    pub chunks_sent: u32,
    pub chunks_received: u32,
    pub elapsed: Duration,
    pub rate_bps: u64,
    pub progress_percent: u8,
}

fn make_info(
    state: TransferState,
    filename: &str,
    bytes: u64,
    size: u64,
    chunks_sent: u32,
    chunks_received: u32,
    started: Instant,
) -> TransferInfo {
    let elapsed = started.elapsed();
    let secs = elapsed.as_secs();
    TransferInfo {
        state,
        filename: filename.to_owned(),
        bytes_transferred: bytes,
        file_size: size,
        chunks_sent,
        chunks_received,
        elapsed,
        rate_bps: if secs > 0 { bytes / secs } else { bytes },
        progress_percent: if size > 0 { ((bytes * 100) / size) as u8 } else { 0 },
    }
}

/// Whether a peer-announced file name may touch the local filesystem.
///
/// Printable ASCII only, no `|` (the preamble delimiter), no path
/// separators, no dot-directories.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && name.bytes().all(|b| (0x20..0x7f).contains(&b))
        && !name.contains(['|', '/', '\\'])
}

async fn hash_file(file: &mut File) -> Result<[u8; 32], Error> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(Error::Io)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

// ─── Sender ──────────────────────────────────────────────────────────────────

/// Drives one file out over a ready connection.
pub struct FileSender {
    state: TransferState,
    name: String,
    file: File,
    size: u64,
    digest: [u8; 32],
    bytes_sent: u64,
    chunks_sent: u32,
    started: Instant,
}

impl FileSender {
    /// Open and fingerprint the file.
    ///
    /// The file is opened first and the open handle is statted, so the
    /// name checked and the bytes sent are the same object. Non-regular
    /// and empty files are rejected.
    pub async fn open(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path).await.map_err(Error::Io)?;
        let meta = file.metadata().await.map_err(Error::Io)?;
        if !meta.is_file() {
            return Err(Error::InvalidArgument(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if meta.len() == 0 {
            return Err(Error::InvalidArgument(format!("{} is empty", path.display())));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| Error::InvalidArgument("file name is not valid UTF-8".into()))?;
        if !is_safe_name(&name) {
            return Err(Error::InvalidArgument(format!("file name {name:?} cannot be sent")));
        }

        let digest = hash_file(&mut file).await?;
        file.rewind().await.map_err(Error::Io)?;

        Ok(Self {
            state: TransferState::Preparing,
            name,
            file,
            size: meta.len(),
            digest,
            bytes_sent: 0,
            chunks_sent: 0,
            started: Instant::now(),
        })
    }

    /// Emit `FileStart` and enter `Sending`.
    pub async fn start<S>(&mut self, conn: &mut Connection<S>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = format!("{}|{}|{}", self.name, self.size, hex::encode(self.digest));
        debug_assert!(payload.len() <= MAX_START_PAYLOAD);

        if let Err(e) = conn.send_message(MsgType::FileStart, payload.as_bytes()).await {
            self.state = TransferState::Error;
            return Err(e);
        }
        self.state = TransferState::Sending;
        log::info!("sending {} ({} bytes)", self.name, self.size);
        Ok(())
    }

    /// Emit the next chunk, or `FileEnd` once the file is exhausted.
    ///
    /// Returns `true` when the transfer has completed.
    pub async fn send_next<S>(&mut self, conn: &mut Connection<S>) -> Result<bool, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state != TransferState::Sending {
            return Err(Error::InvalidArgument("transfer is not sending".into()));
        }

        if self.bytes_sent >= self.size {
            if let Err(e) = conn.send_message(MsgType::FileEnd, &self.digest).await {
                self.state = TransferState::Error;
                return Err(e);
            }
            self.state = TransferState::Complete;
            log::info!("file {} sent ({} chunks)", self.name, self.chunks_sent);
            return Ok(true);
        }

        // Never read past the size recorded at open time, so a file that
        // grows mid-transfer still yields exactly ⌈size/CHUNK_SIZE⌉ chunks.
        let want = (self.size - self.bytes_sent).min(CHUNK_SIZE as u64) as usize;
        let mut chunk = vec![0u8; CHUNK_PREFIX + want];
        chunk[..CHUNK_PREFIX].copy_from_slice(&self.chunks_sent.to_be_bytes());

        let mut filled = 0;
        while filled < want {
            let n = match self.file.read(&mut chunk[CHUNK_PREFIX + filled..]).await {
                Ok(n) => n,
                Err(e) => {
                    self.state = TransferState::Error;
                    return Err(Error::Io(e));
                }
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.state = TransferState::Error;
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank during send",
            )));
        }
        chunk.truncate(CHUNK_PREFIX + filled);

        if let Err(e) = conn.send_message(MsgType::FileChunk, &chunk).await {
            self.state = TransferState::Error;
            return Err(e);
        }
        self.bytes_sent += filled as u64;
        self.chunks_sent += 1;
        Ok(false)
    }

    /// Abandon the transfer.
    pub fn cancel(&mut self) {
        if !matches!(self.state, TransferState::Complete | TransferState::Error) {
            self.state = TransferState::Cancelled;
        }
    }

    /// Progress snapshot.
    pub fn info(&self) -> TransferInfo {
        make_info(
            self.state,
            &self.name,
            self.bytes_sent,
            self.size,
            self.chunks_sent,
            0,
            self.started,
        )
    }
}

// ─── Receiver ────────────────────────────────────────────────────────────────

/// Writes one incoming file into `<name>.part`, verifying on `FileEnd`.
pub struct FileReceiver {
    state: TransferState,
    name: String,
    dir: PathBuf,
    part_path: PathBuf,
    file: Option<File>,
    declared_size: u64,
    expected: [u8; 32],
    bytes_received: u64,
    chunks_received: u32,
    started: Instant,
}

impl FileReceiver {
    /// Parse a `FileStart` payload and open the partial output file in
    /// `dir`.
    pub async fn begin(payload: &[u8], dir: &Path) -> Result<Self, Error> {
        if payload.len() > MAX_START_PAYLOAD {
            return Err(TransferError::BadStart("preamble too long").into());
        }
        let text = std::str::from_utf8(payload)
            .map_err(|_| TransferError::BadStart("preamble is not ASCII"))?;

        let mut parts = text.splitn(3, '|');
        let name = parts.next().unwrap_or("");
        let size_str = parts.next().ok_or(TransferError::BadStart("missing size field"))?;
        let hash_str = parts.next().ok_or(TransferError::BadStart("missing checksum field"))?;

        if !is_safe_name(name) {
            return Err(TransferError::UnsafeName.into());
        }
        let declared_size: u64 = size_str
            .parse()
            .map_err(|_| TransferError::BadStart("size is not decimal"))?;
        if declared_size == 0 {
            return Err(TransferError::BadStart("zero-length file").into());
        }
        if hash_str.len() != 64 {
            return Err(TransferError::BadStart("checksum must be 64 hex characters").into());
        }
        let expected: [u8; 32] = hex::decode(hash_str)
            .map_err(|_| TransferError::BadStart("checksum is not hex"))?
            .try_into()
            .map_err(|_| TransferError::BadStart("checksum length"))?;

        let part_path = dir.join(format!("{name}.part"));
        let file = File::create(&part_path).await.map_err(Error::Io)?;
        log::info!("receiving {name} ({declared_size} bytes)");

        Ok(Self {
            state: TransferState::Receiving,
            name: name.to_owned(),
            dir: dir.to_path_buf(),
            part_path,
            file: Some(file),
            declared_size,
            expected,
            bytes_received: 0,
            chunks_received: 0,
            started: Instant::now(),
        })
    }

    /// Append one `FileChunk` payload (`chunk_no ‖ bytes`).
    ///
    /// The chunk number must equal the count of chunks already written;
    /// strictly in-order, no tolerance window.
    pub async fn chunk(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.state != TransferState::Receiving {
            return Err(Error::InvalidArgument("transfer is not receiving".into()));
        }
        if payload.len() <= CHUNK_PREFIX {
            self.fail().await;
            return Err(Error::Malformed("chunk carries no data".into()));
        }

        let got = u32::from_be_bytes(payload[..CHUNK_PREFIX].try_into().unwrap());
        let data = &payload[CHUNK_PREFIX..];

        if got != self.chunks_received {
            let e = TransferError::OutOfOrder { expected: self.chunks_received, got };
            log::error!("{e}");
            self.fail().await;
            return Err(e.into());
        }
        if data.len() > MAX_CHUNK_SIZE
            || self.bytes_received + data.len() as u64 > self.declared_size
        {
            let e = TransferError::SizeExceeded { declared: self.declared_size };
            log::error!("{e}");
            self.fail().await;
            return Err(e.into());
        }

        let file = self.file.as_mut().expect("receiving transfer has an open file");
        if let Err(e) = file.write_all(data).await {
            self.fail().await;
            return Err(Error::Io(e));
        }

        self.bytes_received += data.len() as u64;
        self.chunks_received += 1;
        Ok(())
    }

    /// Process `FileEnd`: verify against both announced digests, then
    /// atomically rename `<name>.part` into place.
    pub async fn finish(&mut self, payload: &[u8]) -> Result<PathBuf, Error> {
        if self.state != TransferState::Receiving {
            return Err(Error::InvalidArgument("transfer is not receiving".into()));
        }
        if payload.len() != 32 {
            self.fail().await;
            return Err(Error::Malformed(format!(
                "FileEnd payload of {} bytes (expected 32)",
                payload.len()
            )));
        }

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                self.fail().await;
                return Err(Error::Io(e));
            }
        }

        let mut part = match File::open(&self.part_path).await {
            Ok(f) => f,
            Err(e) => {
                self.fail().await;
                return Err(Error::Io(e));
            }
        };
        let actual = hash_file(&mut part).await?;

        if actual != self.expected || actual[..] != payload[..] {
            log::error!("checksum mismatch for {}", self.name);
            self.fail().await;
            return Err(TransferError::VerifyFailed.into());
        }

        let dest = self.dir.join(&self.name);
        if let Err(e) = fs::rename(&self.part_path, &dest).await {
            self.fail().await;
            return Err(Error::Io(e));
        }

        self.state = TransferState::Complete;
        log::info!(
            "file {} received and verified ({} bytes, {} chunks)",
            self.name,
            self.bytes_received,
            self.chunks_received
        );
        Ok(dest)
    }

    /// Abandon the transfer and remove the partial file.
    pub async fn cancel(&mut self) {
        self.file = None;
        let _ = fs::remove_file(&self.part_path).await;
        if !matches!(self.state, TransferState::Complete | TransferState::Error) {
            self.state = TransferState::Cancelled;
        }
    }

    /// Close the output and remove the partial file, entering `Error`.
    async fn fail(&mut self) {
        self.file = None;
        let _ = fs::remove_file(&self.part_path).await;
        self.state = TransferState::Error;
    }

    /// Progress snapshot.
    pub fn info(&self) -> TransferInfo {
        make_info(
            self.state,
            &self.name,
            self.bytes_received,
            self.declared_size,
            0,
            self.chunks_received,
            self.started,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names() {
        assert!(is_safe_name("report.pdf"));
        assert!(is_safe_name("archive-2.tar.gz"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("."));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("a|b"));
        assert!(!is_safe_name("dir/file"));
        assert!(!is_safe_name("dir\\file"));
        assert!(!is_safe_name("caf\u{e9}.txt"));
        assert!(!is_safe_name("tab\tname"));
        assert!(!is_safe_name(&"x".repeat(MAX_NAME_LEN + 1)));
    }

    #[tokio::test]
    async fn begin_rejects_bad_preambles() {
        let dir = tempfile::tempdir().unwrap();
        let sha = "ab".repeat(32);

        for payload in [
            &b"no pipes here"[..],
            b"name.bin|12",
            b"name.bin|0|",
            b"../evil|12|",
            b"name.bin|notanumber|",
            b"name.bin|12|deadbeef",
        ] {
            assert!(
                FileReceiver::begin(payload, dir.path()).await.is_err(),
                "accepted {payload:?}"
            );
        }

        let good = format!("name.bin|12|{sha}");
        let rx = FileReceiver::begin(good.as_bytes(), dir.path()).await.unwrap();
        assert_eq!(rx.info().state, TransferState::Receiving);
        assert!(dir.path().join("name.bin.part").exists());
    }

    #[tokio::test]
    async fn out_of_order_chunk_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let preamble = format!("f.bin|100|{}", "00".repeat(32));
        let mut rx = FileReceiver::begin(preamble.as_bytes(), dir.path()).await.unwrap();

        // Chunk number 2 with zero chunks written.
        let mut payload = 2u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"data");
        let err = rx.chunk(&payload).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert_eq!(rx.info().state, TransferState::Error);

        rx.cancel().await;
        assert!(!dir.path().join("f.bin.part").exists());
    }

    #[tokio::test]
    async fn size_overflow_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let preamble = format!("f.bin|4|{}", "00".repeat(32));
        let mut rx = FileReceiver::begin(preamble.as_bytes(), dir.path()).await.unwrap();

        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"too much data");
        assert!(rx.chunk(&payload).await.is_err());
        assert_eq!(rx.info().state, TransferState::Error);
    }

    #[tokio::test]
    async fn cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let preamble = format!("f.bin|100|{}", "00".repeat(32));
        let mut rx = FileReceiver::begin(preamble.as_bytes(), dir.path()).await.unwrap();

        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"partial");
        rx.chunk(&payload).await.unwrap();
        assert!(dir.path().join("f.bin.part").exists());

        rx.cancel().await;
        assert_eq!(rx.info().state, TransferState::Cancelled);
        assert!(!dir.path().join("f.bin.part").exists());
    }

    #[tokio::test]
    async fn sender_rejects_empty_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            FileSender::open(&empty).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            FileSender::open(&dir.path().join("missing")).await,
            Err(Error::Io(_))
        ));
        assert!(FileSender::open(dir.path()).await.is_err());
    }
}
