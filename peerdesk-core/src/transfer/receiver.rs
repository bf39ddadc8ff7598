//! Inbound transfer reassembly.
//!
//! The [`TransferTable`] keeps one entry per open transfer id. Chunks are
//! kept as received and concatenated only when the transfer ends, so a
//! chunk is never copied twice.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::error::ProtocolViolation;
use crate::protocol::TransferId;

/// Default ceiling for an announced file size (2 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

// ── Types ────────────────────────────────────────────────────────

/// Metadata announced by `file-meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// A fully reassembled file, ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub id: TransferId,
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
    /// BLAKE3 digest of `data`, for logs and duplicate detection.
    pub digest: blake3::Hash,
}

impl ReceivedFile {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Progress after a chunk has been stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub received: u64,
    pub announced: u64,
}

#[derive(Debug)]
struct OpenTransfer {
    meta: FileMetadata,
    chunks: Vec<Bytes>,
    received: u64,
    next_sequence: u64,
    started: Instant,
}

// ── TransferTable ────────────────────────────────────────────────

/// Open inbound transfers keyed by id.
///
/// Transfers are independent: a violation on one never touches another.
#[derive(Debug)]
pub struct TransferTable {
    open: HashMap<TransferId, OpenTransfer>,
    max_file_size: u64,
}

impl Default for TransferTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_SIZE)
    }
}

impl TransferTable {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            open: HashMap::new(),
            max_file_size,
        }
    }

    /// Start a transfer.
    ///
    /// A second meta for an id that is already open is rejected and the
    /// existing transfer keeps its state.
    pub fn open(&mut self, id: TransferId, meta: FileMetadata) -> Result<(), ProtocolViolation> {
        if self.open.contains_key(&id) {
            return Err(ProtocolViolation::DuplicateTransfer(id.to_string()));
        }
        if meta.size > self.max_file_size {
            return Err(ProtocolViolation::TooLarge {
                id: id.to_string(),
                size: meta.size,
                limit: self.max_file_size,
            });
        }

        self.open.insert(
            id,
            OpenTransfer {
                meta,
                chunks: Vec::new(),
                received: 0,
                next_sequence: 0,
                started: Instant::now(),
            },
        );
        Ok(())
    }

    /// Append a chunk to an open transfer.
    ///
    /// An unknown id is dropped without side effects. An out-of-order
    /// sequence or an overflow past the announced size corrupts the
    /// transfer, which is discarded.
    pub fn append(
        &mut self,
        id: &TransferId,
        sequence: Option<u64>,
        data: Bytes,
    ) -> Result<ChunkProgress, ProtocolViolation> {
        let transfer = self
            .open
            .get_mut(id)
            .ok_or_else(|| ProtocolViolation::UnknownTransfer(id.to_string()))?;

        let expected = transfer.next_sequence;
        if let Some(got) = sequence.filter(|&got| got != expected) {
            self.open.remove(id);
            return Err(ProtocolViolation::OutOfOrderChunk {
                id: id.to_string(),
                expected,
                got,
            });
        }

        let received = transfer.received + data.len() as u64;
        if received > transfer.meta.size {
            let announced = transfer.meta.size;
            self.open.remove(id);
            return Err(ProtocolViolation::SizeMismatch {
                id: id.to_string(),
                announced,
                received,
            });
        }

        transfer.received = received;
        transfer.next_sequence += 1;
        transfer.chunks.push(data);

        Ok(ChunkProgress {
            received,
            announced: transfer.meta.size,
        })
    }

    /// Close a transfer and reassemble its content.
    ///
    /// The entry is removed whether or not the size matches.
    pub fn finish(&mut self, id: &TransferId) -> Result<ReceivedFile, ProtocolViolation> {
        let transfer = self
            .open
            .remove(id)
            .ok_or_else(|| ProtocolViolation::UnknownTransfer(id.to_string()))?;

        if transfer.received != transfer.meta.size {
            return Err(ProtocolViolation::SizeMismatch {
                id: id.to_string(),
                announced: transfer.meta.size,
                received: transfer.received,
            });
        }

        let mut data = BytesMut::with_capacity(transfer.received as usize);
        for chunk in &transfer.chunks {
            data.extend_from_slice(chunk);
        }
        let data = data.freeze();
        let digest = blake3::hash(&data);

        tracing::debug!(
            transfer = %id,
            bytes = transfer.received,
            chunks = transfer.chunks.len(),
            elapsed = ?transfer.started.elapsed(),
            "transfer reassembled"
        );

        Ok(ReceivedFile {
            id: id.clone(),
            name: transfer.meta.name,
            mime_type: transfer.meta.mime_type,
            data,
            digest,
        })
    }

    /// Drop every open transfer, returning their ids.
    pub fn abort_all(&mut self) -> Vec<TransferId> {
        let mut ids: Vec<_> = self.open.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }

    pub fn is_open(&self, id: &TransferId) -> bool {
        self.open.contains_key(id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn metadata(&self, id: &TransferId) -> Option<&FileMetadata> {
        self.open.get(id).map(|t| &t.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, size: u64) -> FileMetadata {
        FileMetadata {
            name: name.into(),
            size,
            mime_type: "application/octet-stream".into(),
        }
    }

    #[test]
    fn reassembles_in_order() {
        let mut table = TransferTable::default();
        let id = TransferId::new("t1");
        table.open(id.clone(), meta("a.txt", 6)).unwrap();
        table.append(&id, Some(0), Bytes::from_static(b"abc")).unwrap();
        let progress = table.append(&id, Some(1), Bytes::from_static(b"def")).unwrap();
        assert_eq!(progress.received, 6);

        let file = table.finish(&id).unwrap();
        assert_eq!(file.data.as_ref(), b"abcdef");
        assert_eq!(file.digest, blake3::hash(b"abcdef"));
        assert!(!table.is_open(&id));
    }

    #[test]
    fn empty_file_completes() {
        let mut table = TransferTable::default();
        let id = TransferId::new("empty");
        table.open(id.clone(), meta("e", 0)).unwrap();
        let file = table.finish(&id).unwrap();
        assert!(file.is_empty());
    }

    #[test]
    fn duplicate_meta_keeps_existing_transfer() {
        let mut table = TransferTable::default();
        let id = TransferId::new("dup");
        table.open(id.clone(), meta("first", 3)).unwrap();
        table.append(&id, Some(0), Bytes::from_static(b"ab")).unwrap();

        let err = table.open(id.clone(), meta("second", 99)).unwrap_err();
        assert_eq!(err, ProtocolViolation::DuplicateTransfer("dup".into()));
        assert_eq!(table.metadata(&id).unwrap().name, "first");

        table.append(&id, Some(1), Bytes::from_static(b"c")).unwrap();
        assert_eq!(table.finish(&id).unwrap().data.as_ref(), b"abc");
    }

    #[test]
    fn chunk_for_unknown_id_changes_nothing() {
        let mut table = TransferTable::default();
        let open = TransferId::new("open");
        table.open(open.clone(), meta("a", 1)).unwrap();

        let err = table
            .append(&TransferId::new("ghost"), None, Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(matches!(err, ProtocolViolation::UnknownTransfer(_)));
        assert_eq!(table.open_count(), 1);
        assert!(table.finish(&TransferId::new("ghost")).is_err());
    }

    #[test]
    fn out_of_order_discards_transfer() {
        let mut table = TransferTable::default();
        let id = TransferId::new("t");
        table.open(id.clone(), meta("a", 10)).unwrap();
        table.append(&id, Some(0), Bytes::from_static(b"aa")).unwrap();

        let err = table.append(&id, Some(2), Bytes::from_static(b"bb")).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::OutOfOrderChunk {
                id: "t".into(),
                expected: 1,
                got: 2
            }
        );
        assert!(!table.is_open(&id));
    }

    #[test]
    fn overflow_discards_transfer() {
        let mut table = TransferTable::default();
        let id = TransferId::new("t");
        table.open(id.clone(), meta("a", 2)).unwrap();
        let err = table.append(&id, None, Bytes::from_static(b"abc")).unwrap_err();
        assert!(matches!(err, ProtocolViolation::SizeMismatch { received: 3, .. }));
        assert!(!table.is_open(&id));
    }

    #[test]
    fn short_transfer_fails_on_end() {
        let mut table = TransferTable::default();
        let id = TransferId::new("t");
        table.open(id.clone(), meta("a", 4)).unwrap();
        table.append(&id, None, Bytes::from_static(b"ab")).unwrap();
        let err = table.finish(&id).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::SizeMismatch {
                id: "t".into(),
                announced: 4,
                received: 2
            }
        );
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn size_limit_is_enforced() {
        let mut table = TransferTable::new(100);
        let err = table
            .open(TransferId::new("big"), meta("big", 101))
            .unwrap_err();
        assert!(matches!(err, ProtocolViolation::TooLarge { limit: 100, .. }));
    }

    #[test]
    fn interleaved_transfers_stay_separate() {
        let mut table = TransferTable::default();
        let a = TransferId::new("a");
        let b = TransferId::new("b");
        table.open(a.clone(), meta("a", 4)).unwrap();
        table.open(b.clone(), meta("b", 4)).unwrap();

        table.append(&a, Some(0), Bytes::from_static(b"aa")).unwrap();
        table.append(&b, Some(0), Bytes::from_static(b"bb")).unwrap();
        table.append(&b, Some(1), Bytes::from_static(b"BB")).unwrap();
        table.append(&a, Some(1), Bytes::from_static(b"AA")).unwrap();

        assert_eq!(table.finish(&b).unwrap().data.as_ref(), b"bbBB");
        assert_eq!(table.finish(&a).unwrap().data.as_ref(), b"aaAA");
    }

    #[test]
    fn abort_all_empties_table() {
        let mut table = TransferTable::default();
        table.open(TransferId::new("x"), meta("x", 1)).unwrap();
        table.open(TransferId::new("y"), meta("y", 1)).unwrap();
        let ids = table.abort_all();
        assert_eq!(ids, vec![TransferId::new("x"), TransferId::new("y")]);
        assert_eq!(table.open_count(), 0);
    }
}
