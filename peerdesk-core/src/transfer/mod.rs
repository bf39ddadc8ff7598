//! Chunked file transfer over the control leg.
//!
//! - [`sender`] streams a local file as meta, chunks and end.
//! - [`receiver`] reassembles inbound transfers keyed by transfer id.
//! - [`sink`] persists completed files.

pub mod receiver;
pub mod sender;
pub mod sink;

pub use receiver::{ChunkProgress, DEFAULT_MAX_FILE_SIZE, FileMetadata, ReceivedFile, TransferTable};
pub use sender::{
    DEFAULT_CHUNK_SIZE, MessageSink, OutgoingFile, SentFile, TransferIdIssuer, send_file,
};
pub use sink::{ArtifactSink, DirectorySink, MemorySink};
