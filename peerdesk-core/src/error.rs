//! Domain-specific error types for peerdesk sessions.
//!
//! All fallible operations return `Result<T, PeerdeskError>` or one of the
//! narrower collaborator errors below, which convert into it with `?`.
//! Only [`TransportError`] is fatal to a session; everything else is
//! handled locally.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for peerdesk.
#[derive(Debug, Error)]
pub enum PeerdeskError {
    // ── Collaborator Errors ──────────────────────────────────────
    /// The transport reported a failure on a leg or during signaling.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The capture provider could not supply a stream.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The input injector rejected an event.
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// The persistence collaborator failed to store an artifact.
    #[error(transparent)]
    Persist(#[from] PersistError),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A control-leg message violated protocol rules.
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// A state transition was requested from a state that does not allow it.
    #[error("invalid transition: cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: String,
    },

    // ── Session Errors ───────────────────────────────────────────
    /// The session task has exited; the handle is stale.
    #[error("session closed")]
    SessionClosed,

    // ── Serialization / IO Errors ────────────────────────────────
    /// Encoding or decoding of a message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Reading a local file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be decoded into the presentation surface.
    #[error("frame decode failed: {0}")]
    Decode(String),
}

// ── TransportError ───────────────────────────────────────────────

/// A failure reported by the transport collaborator.
///
/// Transports report errors as a free-form `kind` string (for example
/// `peer-unavailable`, `network`, `negotiation-failed`). The kind is kept
/// verbatim so the operator sees the transport's own vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error ({kind}): {detail}")]
pub struct TransportError {
    pub kind: String,
    pub detail: String,
}

impl TransportError {
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    /// The remote peer could not be reached.
    pub fn peer_unavailable(remote: &str) -> Self {
        Self::new("peer-unavailable", format!("could not connect to peer {remote}"))
    }

    /// The leg was closed by the remote end.
    pub fn closed(detail: impl Into<String>) -> Self {
        Self::new("closed", detail)
    }

    /// A leg did not open within the configured deadline.
    pub fn timeout(after: Duration) -> Self {
        Self::new("timeout", format!("leg did not open within {after:?}"))
    }
}

// ── CaptureError ─────────────────────────────────────────────────

/// Failures of the capture provider during the accept flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The operator or OS denied screen capture.
    #[error("capture permission denied")]
    PermissionDenied,

    /// Enumeration succeeded but offered nothing to capture.
    #[error("no capture targets available")]
    NoTargets,

    /// The requested target id is not in the enumerated list.
    #[error("unknown capture target: {0}")]
    UnknownTarget(String),

    /// Target enumeration itself failed.
    #[error("target enumeration failed: {0}")]
    Enumeration(String),

    /// Starting the stream for a chosen target failed.
    #[error("capture start failed: {0}")]
    Start(String),
}

// ── InjectionError ───────────────────────────────────────────────

/// Failures of the input injector. Always swallowed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    /// No native injection backend on this host.
    #[error("input injection unavailable on this host")]
    Unavailable,

    /// The OS refused the synthetic event.
    #[error("input injection rejected: {0}")]
    Rejected(String),
}

// ── ProtocolViolation ────────────────────────────────────────────

/// A recoverable control-leg protocol error. The offending message is
/// dropped and the session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// The bytes were not a JSON object with a string `type` field.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The discriminator named no known variant.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A chunk or end referenced a transfer that is not open.
    #[error("no open transfer with id {0}")]
    UnknownTransfer(String),

    /// A meta announced an id that already has an open transfer.
    #[error("transfer {0} is already open")]
    DuplicateTransfer(String),

    /// A chunk arrived with a sequence other than the next expected one.
    #[error("transfer {id}: expected chunk {expected}, got {got}")]
    OutOfOrderChunk { id: String, expected: u64, got: u64 },

    /// Reassembled bytes disagree with the announced size.
    #[error("transfer {id}: announced {announced} bytes, received {received}")]
    SizeMismatch {
        id: String,
        announced: u64,
        received: u64,
    },

    /// The announced size is above the configured limit.
    #[error("transfer {id}: size {size} exceeds limit {limit}")]
    TooLarge { id: String, size: u64, limit: u64 },
}

// ── PersistError ─────────────────────────────────────────────────

/// The persistence collaborator failed to store a received artifact.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("could not write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("persistence rejected artifact: {0}")]
    Rejected(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<serde_json::Error> for PeerdeskError {
    fn from(e: serde_json::Error) -> Self {
        PeerdeskError::Encoding(e.to_string())
    }
}
