//! Peer-to-peer transport collaborator.
//!
//! A transport gives each peer an identifier, opens two legs to a remote
//! peer and reports inbound requests as [`TransportEvent`]s:
//!
//! ```text
//!  Initiator                               Responder
//!     │ ──── connect_data ───────────────► IncomingData ─► accept_data
//!     │ ──── call(Placeholder) ──────────► IncomingCall ─► answer(source) / reject
//!     │ ◄═══ control leg (DataLeg) ══════════════════════►│
//!     │ ◄═══ media leg (MediaLeg) ═══════════════════════ │
//! ```
//!
//! Signaling, NAT traversal and encryption are the transport's business.
//! [`memory`] provides an in-process implementation.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::media::frame::{CaptureTarget, VideoFrame};

// ── PeerId ───────────────────────────────────────────────────────

/// Transport-assigned identifier, shared out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ── Events ───────────────────────────────────────────────────────

/// What the local side sends on its media leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// An empty stream. The initiator only receives.
    Placeholder,
    /// Frames from the presentation surface of a chosen capture target.
    Capture { target: CaptureTarget },
    /// No capture provider: the transport asks the OS to let the operator
    /// pick what to share.
    PlatformPicker,
}

/// A pending media call. Consumed by `answer` or `reject`.
#[derive(Debug, PartialEq, Eq)]
pub struct IncomingCall {
    pub remote: PeerId,
    pub token: u64,
}

/// A pending control-leg connection. Consumed by `accept_data`.
#[derive(Debug, PartialEq, Eq)]
pub struct IncomingData {
    pub remote: PeerId,
    pub token: u64,
}

#[derive(Debug)]
pub enum TransportEvent {
    IncomingCall(IncomingCall),
    IncomingData(IncomingData),
    /// A transport-level failure not tied to a pending operation.
    Error(TransportError),
}

/// The result of registering with the transport.
#[derive(Debug)]
pub struct Identity {
    pub local_id: PeerId,
    pub events: mpsc::Receiver<TransportEvent>,
}

// ── Traits ───────────────────────────────────────────────────────

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Register and obtain the local peer id plus the inbound event stream.
    async fn identify(&self) -> Result<Identity, TransportError>;

    /// Open a control leg to `remote`. Resolves once the leg is open.
    async fn connect_data(&self, remote: &PeerId) -> Result<Box<dyn DataLeg>, TransportError>;

    async fn accept_data(&self, incoming: IncomingData) -> Result<Box<dyn DataLeg>, TransportError>;

    /// Place a media call. Resolves once the remote has answered.
    async fn call(
        &self,
        remote: &PeerId,
        source: MediaSource,
    ) -> Result<Box<dyn MediaLeg>, TransportError>;

    async fn answer(
        &self,
        call: IncomingCall,
        source: MediaSource,
    ) -> Result<Box<dyn MediaLeg>, TransportError>;

    async fn reject(&self, call: IncomingCall);
}

/// Reliable, ordered message channel.
#[async_trait]
pub trait DataLeg: Send {
    /// Resolves once the transport has taken the message.
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Next inbound message; `None` once the remote has closed the leg.
    async fn recv(&mut self) -> Option<Result<Bytes, TransportError>>;

    async fn close(&mut self);
}

/// Best-effort video channel.
#[async_trait]
pub trait MediaLeg: Send {
    async fn send_frame(&mut self, frame: VideoFrame) -> Result<(), TransportError>;

    /// Next remote frame; `None` once the remote has hung up.
    async fn recv_frame(&mut self) -> Option<Result<VideoFrame, TransportError>>;

    async fn close(&mut self);
}

pub use memory::{MemoryNetwork, MemoryTransport};
