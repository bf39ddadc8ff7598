//! # peerdesk-core
//!
//! Session engine for peer-to-peer remote desktop.
//!
//! This crate contains:
//! - **Protocol**: the JSON control messages exchanged on the data leg
//! - **Codec**: message encoding and `tokio_util` framing for byte streams
//! - **Transfer**: chunked file sending, reassembly and persistence
//! - **Input**: pointer mapping, move throttling and the injector seam
//! - **Media**: capture providers, frame decoding, pacing and presentation
//! - **Transport**: the peer transport seam plus an in-process implementation
//! - **Session**: the lifecycle state machine and the actor driving it
//! - **Error**: `PeerdeskError`, a typed `thiserror` hierarchy

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod media;
pub mod protocol;
pub mod session;
pub mod task;
pub mod transfer;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{ControlCodec, decode_message, encode_message};
pub use config::SessionConfig;
pub use error::{
    CaptureError, InjectionError, PeerdeskError, PersistError, ProtocolViolation, TransportError,
};
pub use protocol::{InputEvent, Message, MouseButton, TransferId};
pub use session::{
    Capabilities, CloseCause, Role, Session, SessionEvent, SessionEvents, SessionHandle,
    SessionState,
};
pub use transport::{MemoryNetwork, MemoryTransport, PeerId, Transport};
