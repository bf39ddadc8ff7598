//! Outbound file transfers.
//!
//! A transfer is sent as one `file-meta`, zero or more `file-chunk`s and a
//! `file-end`. Chunk `n + 1` is not read from disk until chunk `n` has
//! been handed to the transport, so memory use stays at one chunk per
//! transfer regardless of file size.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::PeerdeskError;
use crate::protocol::{Message, TransferId};

/// Default chunk size (16 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound for a configured chunk size (1 MiB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

// ── MessageSink ──────────────────────────────────────────────────

/// Where the sender hands its messages.
///
/// `send` resolves once the message has been accepted by the transport.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: Message) -> Result<(), PeerdeskError>;
}

#[async_trait]
impl MessageSink for Vec<Message> {
    async fn send(&mut self, message: Message) -> Result<(), PeerdeskError> {
        self.push(message);
        Ok(())
    }
}

// ── TransferIdIssuer ─────────────────────────────────────────────

/// Issues transfer ids that are unique per local peer.
///
/// The id hashes the local peer id, file name, size and issue order, so
/// two peers sending the same file at the same time never collide.
#[derive(Debug, Clone)]
pub struct TransferIdIssuer {
    local_id: String,
    issued: u64,
}

impl TransferIdIssuer {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            issued: 0,
        }
    }

    pub fn issue(&mut self, name: &str, size: u64) -> TransferId {
        self.issued += 1;

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.local_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        hasher.update(&size.to_le_bytes());
        hasher.update(&self.issued.to_le_bytes());

        let hex = hasher.finalize().to_hex();
        TransferId::new(&hex.as_str()[..16])
    }
}

// ── OutgoingFile ─────────────────────────────────────────────────

/// A file queued for sending, with its content reader.
pub struct OutgoingFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

impl OutgoingFile {
    /// Open a local file. The name sent is the final path component.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PeerdeskError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("file"));
        let mime_type = guess_mime_type(&name).to_owned();

        Ok(Self {
            name,
            size,
            mime_type,
            reader: Box::new(file),
        })
    }

    /// Wrap any reader, e.g. an in-memory buffer.
    pub fn from_reader(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            reader: Box::new(reader),
        }
    }

    /// Convenience for an in-memory payload.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(&name).to_owned();
        let size = data.len() as u64;
        Self::from_reader(name, size, mime_type, std::io::Cursor::new(data))
    }
}

/// Best-effort mime type from a file extension.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

// ── send_file ────────────────────────────────────────────────────

/// Summary of a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub id: TransferId,
    pub name: String,
    pub bytes: u64,
    pub chunks: u64,
}

/// Stream `file` to `sink` as meta, chunks and end.
///
/// Every chunk is exactly `chunk_size` bytes except the last, which may be
/// shorter. An empty file sends no chunks at all.
pub async fn send_file<S>(
    mut file: OutgoingFile,
    id: TransferId,
    chunk_size: usize,
    sink: &mut S,
) -> Result<SentFile, PeerdeskError>
where
    S: MessageSink + ?Sized,
{
    let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);

    sink.send(Message::FileMeta {
        name: file.name.clone(),
        size: file.size,
        mime_type: file.mime_type.clone(),
        transfer_id: Some(id.clone()),
    })
    .await?;

    let mut buf = vec![0u8; chunk_size];
    let mut sequence = 0u64;
    let mut sent = 0u64;

    // Never send past the announced size, even if the file grew.
    while sent < file.size {
        let left = usize::try_from(file.size - sent).unwrap_or(usize::MAX);
        let want = left.min(chunk_size);
        let n = read_full(&mut file.reader, &mut buf[..want]).await?;
        if n == 0 {
            break;
        }

        sink.send(Message::FileChunk {
            transfer_id: Some(id.clone()),
            sequence: Some(sequence),
            data: buf[..n].to_vec(),
        })
        .await?;

        sequence += 1;
        sent += n as u64;

        if n < want {
            break;
        }
    }

    if sent != file.size {
        tracing::warn!(
            transfer = %id,
            announced = file.size,
            sent,
            "file shrank while sending"
        );
    }

    sink.send(Message::FileEnd {
        transfer_id: Some(id.clone()),
    })
    .await?;

    Ok(SentFile {
        id,
        name: file.name,
        bytes: sent,
        chunks: sequence,
    })
}

/// Fill `buf` from `reader`, stopping early only at end of input.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_lens(messages: &[Message]) -> Vec<usize> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::FileChunk { data, .. } => Some(data.len()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn splits_into_fixed_chunks() {
        let mut out = Vec::new();
        let file = OutgoingFile::from_bytes("a.bin", vec![7u8; 10 * 4 + 3]);
        let sent = send_file(file, TransferId::new("t"), 4, &mut out)
            .await
            .unwrap();

        assert_eq!(sent.bytes, 43);
        assert_eq!(sent.chunks, 11);
        assert!(matches!(out.first(), Some(Message::FileMeta { size: 43, .. })));
        assert!(matches!(out.last(), Some(Message::FileEnd { .. })));

        let lens = chunk_lens(&out);
        assert_eq!(lens.len(), 11);
        assert!(lens[..10].iter().all(|&l| l == 4));
        assert_eq!(lens[10], 3);
    }

    #[tokio::test]
    async fn exact_multiple_has_no_short_tail() {
        let mut out = Vec::new();
        let file = OutgoingFile::from_bytes("a.bin", vec![1u8; 8]);
        send_file(file, TransferId::new("t"), 4, &mut out).await.unwrap();
        assert_eq!(chunk_lens(&out), vec![4, 4]);
    }

    #[tokio::test]
    async fn empty_file_is_meta_then_end() {
        let mut out = Vec::new();
        let file = OutgoingFile::from_bytes("empty.txt", Vec::new());
        let sent = send_file(file, TransferId::new("t"), DEFAULT_CHUNK_SIZE, &mut out)
            .await
            .unwrap();

        assert_eq!(sent.chunks, 0);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Message::FileMeta { size: 0, .. }));
        assert!(matches!(out[1], Message::FileEnd { .. }));
    }

    #[tokio::test]
    async fn sequences_count_up_from_zero() {
        let mut out = Vec::new();
        let file = OutgoingFile::from_bytes("a", vec![0u8; 9]);
        send_file(file, TransferId::new("t"), 4, &mut out).await.unwrap();

        let seqs: Vec<_> = out
            .iter()
            .filter_map(|m| match m {
                Message::FileChunk { sequence, .. } => *sequence,
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn stops_at_the_announced_size() {
        let mut out = Vec::new();
        // The reader holds more than was announced, as when a file grows mid-send.
        let file = OutgoingFile::from_reader(
            "growing.log",
            6,
            "text/plain",
            std::io::Cursor::new(vec![5u8; 20]),
        );
        let sent = send_file(file, TransferId::new("t"), 4, &mut out)
            .await
            .unwrap();

        assert_eq!(sent.bytes, 6);
        assert_eq!(chunk_lens(&out), vec![4, 2]);
        assert!(matches!(out.last(), Some(Message::FileEnd { .. })));
    }

    #[test]
    fn issued_ids_differ_per_issue_and_peer() {
        let mut a = TransferIdIssuer::new("peer-a");
        let mut b = TransferIdIssuer::new("peer-b");
        let first = a.issue("x.txt", 10);
        let second = a.issue("x.txt", 10);
        let other = b.issue("x.txt", 10);
        assert_ne!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.as_str().len(), 16);
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("notes.txt"), "text/plain");
        assert_eq!(guess_mime_type("Makefile"), "application/octet-stream");
    }

    #[tokio::test]
    async fn open_reads_name_and_size() {
        let dir = std::env::temp_dir().join(format!("peerdesk-send-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("hello.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let file = OutgoingFile::open(&path).await.unwrap();
        assert_eq!(file.name, "hello.txt");
        assert_eq!(file.size, 5);
        assert_eq!(file.mime_type, "text/plain");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
