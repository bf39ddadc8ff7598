//! Frame decoders.
//!
//! Turn a provider-encoded [`Frame`] into tightly packed BGRA pixels.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::PeerdeskError;
use crate::media::frame::{Frame, VideoFrame};

/// A decoded image, not yet drawn on the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

pub trait FrameDecoder: Send + 'static {
    fn decode(&mut self, frame: &Frame) -> Result<DecodedImage, PeerdeskError>;
}

/// Which decoder a capture stream needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameCodec {
    /// zstd-compressed BGRA.
    #[default]
    Zstd,
    /// Uncompressed BGRA.
    Raw,
}

impl FrameCodec {
    pub fn decoder(self) -> Box<dyn FrameDecoder> {
        match self {
            Self::Zstd => Box::new(ZstdBgraDecoder),
            Self::Raw => Box::new(RawBgraDecoder),
        }
    }
}

fn check_len(frame: &Frame, len: usize) -> Result<(), PeerdeskError> {
    let expected = VideoFrame::expected_len(frame.width, frame.height);
    if frame.width == 0 || frame.height == 0 {
        return Err(PeerdeskError::Decode(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }
    if len != expected {
        return Err(PeerdeskError::Decode(format!(
            "{}x{} frame needs {expected} bytes, got {len}",
            frame.width, frame.height
        )));
    }
    Ok(())
}

// ── ZstdBgraDecoder ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdBgraDecoder;

impl FrameDecoder for ZstdBgraDecoder {
    fn decode(&mut self, frame: &Frame) -> Result<DecodedImage, PeerdeskError> {
        let pixels = zstd::decode_all(frame.data.as_ref())
            .map_err(|e| PeerdeskError::Decode(format!("zstd decode failed: {e}")))?;
        check_len(frame, pixels.len())?;

        Ok(DecodedImage {
            width: frame.width,
            height: frame.height,
            pixels: Bytes::from(pixels),
        })
    }
}

// ── RawBgraDecoder ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct RawBgraDecoder;

impl FrameDecoder for RawBgraDecoder {
    fn decode(&mut self, frame: &Frame) -> Result<DecodedImage, PeerdeskError> {
        check_len(frame, frame.data.len())?;
        Ok(DecodedImage {
            width: frame.width,
            height: frame.height,
            pixels: frame.data.clone(),
        })
    }
}
