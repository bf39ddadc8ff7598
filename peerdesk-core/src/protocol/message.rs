//! Control-leg messages.
//!
//! Every message is a JSON object discriminated by its `type` field:
//!
//! ```text
//! Sender ──[file-meta]──────────► Receiver   name, size, mimeType, transferId
//! Sender ──[file-chunk]─────────► Receiver   (repeated) transferId, sequence, data
//! Sender ──[file-end]───────────► Receiver   transferId
//!
//! Viewer ──[input-event]────────► Sharer     payload: InputEvent
//! ```
//!
//! Chunk data travels as a JSON array of byte values. The `transferId`
//! field is always written by this crate but tolerated as absent on
//! receipt, in which case the message belongs to the single legacy slot.

use serde::{Deserialize, Serialize};

use super::input::InputEvent;

/// Discriminator values this crate understands.
pub const MESSAGE_TYPES: [&str; 4] = ["input-event", "file-meta", "file-chunk", "file-end"];

// ── TransferId ───────────────────────────────────────────────────

/// Identifies one file transfer on a control leg.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The slot used by peers that do not tag their file messages.
    pub fn legacy() -> Self {
        Self(String::from("legacy"))
    }

    /// Resolve an optional wire id to a table key.
    pub fn or_legacy(id: Option<TransferId>) -> Self {
        id.unwrap_or_else(Self::legacy)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Message ──────────────────────────────────────────────────────

/// A message exchanged on the control leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Remote input for the sharing side to inject.
    InputEvent { payload: InputEvent },

    /// Opens a transfer.
    FileMeta {
        name: String,
        size: u64,
        #[serde(rename = "mimeType", default)]
        mime_type: String,
        #[serde(rename = "transferId", default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<TransferId>,
    },

    /// One slice of file content, in order.
    FileChunk {
        #[serde(rename = "transferId", default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<TransferId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<u64>,
        data: Vec<u8>,
    },

    /// Closes a transfer; the receiver reassembles and verifies it.
    FileEnd {
        #[serde(rename = "transferId", default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<TransferId>,
    },
}

impl Message {
    pub fn input(payload: InputEvent) -> Self {
        Self::InputEvent { payload }
    }

    /// The wire discriminator for this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputEvent { .. } => "input-event",
            Self::FileMeta { .. } => "file-meta",
            Self::FileChunk { .. } => "file-chunk",
            Self::FileEnd { .. } => "file-end",
        }
    }

    /// The transfer this message belongs to, if it is a file message.
    pub fn transfer_id(&self) -> Option<TransferId> {
        match self {
            Self::InputEvent { .. } => None,
            Self::FileMeta { transfer_id, .. }
            | Self::FileChunk { transfer_id, .. }
            | Self::FileEnd { transfer_id } => Some(TransferId::or_legacy(transfer_id.clone())),
        }
    }
}
