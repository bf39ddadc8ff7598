//! Screen media: capture, pacing, decoding and the presentation surface.
//!
//! ```text
//!  CaptureProvider ──► FramePacer ──► FrameDecoder ──► PresentationSurface
//!   (CaptureStream)    (1 slot)        (zstd / raw)      (watch channel)
//!                                                              │
//!                                     session resample tick ◄──┘──► media leg
//! ```

pub mod capture;
pub mod decoder;
pub mod frame;
pub mod pacer;
pub mod pipeline;

pub use capture::{CaptureEvent, CaptureProvider, CaptureStream, ScriptedCapture, choose_target};
pub use decoder::{DecodedImage, FrameCodec, FrameDecoder, RawBgraDecoder, ZstdBgraDecoder};
pub use frame::{CaptureTarget, Frame, VideoFrame};
pub use pacer::{DEFAULT_TARGET_FPS, FramePacer};
pub use pipeline::{FramePipeline, PipelineOutputs, PipelineStats, PresentationSurface};
