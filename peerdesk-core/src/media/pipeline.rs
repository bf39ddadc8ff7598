//! Capture-to-surface pipeline on the sharing side.
//!
//! Consumes a [`CaptureStream`], paces it through a [`FramePacer`], decodes
//! presented frames and draws them on a [`PresentationSurface`]. The latest
//! surface is published on a `watch` channel; the session resamples it at
//! a steady rate onto the media leg.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::media::capture::{CaptureEvent, CaptureStream};
use crate::media::decoder::FrameDecoder;
use crate::media::frame::{CaptureTarget, Frame, VideoFrame};
use crate::media::pacer::FramePacer;

// ── PipelineStats ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub presented: u64,
    /// Overwritten in the pacer slot before presentation.
    pub dropped: u64,
    pub decode_failures: u64,
    pub width: u32,
    pub height: u32,
}

// ── PresentationSurface ──────────────────────────────────────────

/// The image currently offered to the media leg.
#[derive(Debug, Clone)]
pub struct PresentationSurface {
    current: VideoFrame,
}

impl PresentationSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            current: VideoFrame::blank(width, height),
        }
    }

    /// Prepare for a new native size. Content is kept until the next draw
    /// once something has been drawn; before that the blank is resized.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.current.generation == 0
            && (self.current.width, self.current.height) != (width, height)
        {
            self.current = VideoFrame::blank(width, height);
        }
    }

    pub fn draw(&mut self, width: u32, height: u32, pixels: bytes::Bytes) {
        self.current = VideoFrame {
            width,
            height,
            pixels,
            generation: self.current.generation + 1,
        };
    }

    pub fn snapshot(&self) -> VideoFrame {
        self.current.clone()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.current.width, self.current.height)
    }
}

// ── FramePipeline ────────────────────────────────────────────────

pub struct FramePipeline {
    pacer: FramePacer,
    decoder: Box<dyn FrameDecoder>,
    surface: PresentationSurface,
    surface_tx: watch::Sender<VideoFrame>,
    stats_tx: watch::Sender<PipelineStats>,
    stats: PipelineStats,
}

/// Receivers for a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOutputs {
    pub surface: watch::Receiver<VideoFrame>,
    pub stats: watch::Receiver<PipelineStats>,
}

impl FramePipeline {
    /// Build a pipeline for `target`, initially showing a blank surface.
    pub fn new(
        target: &CaptureTarget,
        target_fps: u32,
        decoder: Box<dyn FrameDecoder>,
    ) -> (Self, PipelineOutputs) {
        let surface = PresentationSurface::new(target.width, target.height);
        let (surface_tx, surface_rx) = watch::channel(surface.snapshot());
        let stats = PipelineStats {
            width: target.width,
            height: target.height,
            ..PipelineStats::default()
        };
        let (stats_tx, stats_rx) = watch::channel(stats.clone());

        let pipeline = Self {
            pacer: FramePacer::new(target_fps),
            decoder,
            surface,
            surface_tx,
            stats_tx,
            stats,
        };
        let outputs = PipelineOutputs {
            surface: surface_rx,
            stats: stats_rx,
        };
        (pipeline, outputs)
    }

    /// Handle one event from the capture stream.
    pub fn on_event(&mut self, event: CaptureEvent, now: Instant) {
        match event {
            CaptureEvent::Frame(frame) => {
                self.stats.received += 1;
                if let Some(due) = self.pacer.offer(frame, now) {
                    self.present(due);
                }
                self.stats.dropped = self.pacer.dropped();
            }
            CaptureEvent::TargetInfo(target) => {
                tracing::debug!(
                    capture_target = %target.id,
                    width = target.width,
                    height = target.height,
                    "capture target changed"
                );
                self.surface.resize(target.width, target.height);
            }
        }
        self.publish_stats();
    }

    /// Timer path: present the pending frame if it is now due.
    pub fn on_tick(&mut self, now: Instant) {
        if let Some(due) = self.pacer.poll(now) {
            self.present(due);
            self.publish_stats();
        }
    }

    fn present(&mut self, frame: Frame) {
        match self.decoder.decode(&frame) {
            Ok(image) => {
                if self.surface.dimensions() != (image.width, image.height) {
                    tracing::debug!(
                        width = image.width,
                        height = image.height,
                        "surface resized to frame"
                    );
                }
                self.surface.draw(image.width, image.height, image.pixels);
                self.surface_tx.send_replace(self.surface.snapshot());
                self.stats.presented += 1;
                self.stats.width = image.width;
                self.stats.height = image.height;
            }
            Err(e) => {
                // The previous surface stays up.
                self.stats.decode_failures += 1;
                tracing::warn!(error = %e, "dropping undecodable frame");
            }
        }
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.stats.clone());
    }

    /// Drive the pipeline until the capture stream ends.
    pub async fn run(mut self, mut events: CaptureStream) {
        loop {
            let deadline = self.pacer.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_event(event, Instant::now()),
                    None => break,
                },
                _ = sleep_until(deadline) => self.on_tick(Instant::now()),
            }
        }
        tracing::debug!(
            presented = self.stats.presented,
            dropped = self.stats.dropped,
            "capture stream ended"
        );
    }

    pub fn spawn(self, events: CaptureStream) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
