//! Frame and capture-target types shared by the media pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Bytes per pixel of the BGRA layout used throughout the pipeline.
pub const BYTES_PER_PIXEL: usize = 4;

// ── CaptureTarget ────────────────────────────────────────────────

/// A screen or window the capture provider can stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// The host's primary display.
    #[serde(default)]
    pub is_primary: bool,
}

// ── Frame ────────────────────────────────────────────────────────

/// An encoded frame straight from the capture provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Native width in pixels.
    pub width: u32,
    /// Native height in pixels.
    pub height: u32,
    /// Provider-encoded pixel data, interpreted by a
    /// [`FrameDecoder`](super::decoder::FrameDecoder).
    pub data: Bytes,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            captured_at: Instant::now(),
        }
    }
}

// ── VideoFrame ───────────────────────────────────────────────────

/// A presented image: what the media leg carries and the viewer shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed BGRA rows.
    pub pixels: Bytes,
    /// Incremented every time new content is drawn.
    pub generation: u64,
}

impl VideoFrame {
    /// Byte length a `width` x `height` BGRA image must have.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// An all-black image, used before the first frame is drawn.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: Bytes::from(vec![0u8; Self::expected_len(width, height)]),
            generation: 0,
        }
    }
}
