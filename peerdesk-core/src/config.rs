//! Session tuning.
//!
//! Every section uses `#[serde(default)]`, so a partial configuration file
//! only needs the values it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::input::DEFAULT_MOVE_INTERVAL;
use crate::media::{DEFAULT_TARGET_FPS, FrameCodec};
use crate::transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE};

/// Top-level configuration for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// File transfer limits.
    pub transfer: TransferConfig,
    /// Remote control input.
    pub input: InputConfig,
    /// Capture presentation.
    pub media: MediaConfig,
    /// Lifecycle deadlines.
    pub session: LifecycleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per `file-chunk`.
    pub chunk_size: usize,
    /// Largest announced size accepted from the peer.
    pub max_file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Minimum spacing between sent pointer moves.
    pub move_interval_ms: u64,
    /// Start with remote control switched on.
    pub remote_control_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Presentation rate of the frame pacer.
    pub target_fps: u32,
    /// Rate at which the surface is pushed onto the media leg.
    pub resample_fps: u32,
    /// Encoding of frames from the capture provider.
    pub codec: FrameCodec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Reject an unanswered call after this long. Unset waits forever.
    pub acceptance_timeout_ms: Option<u64>,
    /// Give up on a leg that has not opened after this long.
    pub connect_timeout_ms: Option<u64>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            move_interval_ms: DEFAULT_MOVE_INTERVAL.as_millis() as u64,
            remote_control_enabled: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            resample_fps: DEFAULT_TARGET_FPS,
            codec: FrameCodec::default(),
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl InputConfig {
    pub fn move_interval(&self) -> Duration {
        Duration::from_millis(self.move_interval_ms)
    }
}

impl MediaConfig {
    /// Period of the media-leg resample tick.
    pub fn resample_period(&self) -> Duration {
        Duration::from_secs(1) / self.resample_fps.clamp(1, 240)
    }
}

impl LifecycleConfig {
    pub fn acceptance_timeout(&self) -> Option<Duration> {
        self.acceptance_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
