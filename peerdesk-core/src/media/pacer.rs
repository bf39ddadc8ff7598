//! Frame pacing with a single overwrite slot.
//!
//! Frames that arrive faster than the target rate replace the pending
//! frame instead of queueing. The pending frame is presented as soon as
//! the interval since the last presentation has elapsed, either when the
//! next frame is offered or when the caller's timer fires [`FramePacer::poll`].

use std::time::Duration;

use tokio::time::Instant;

use crate::media::frame::Frame;

/// Default presentation rate.
pub const DEFAULT_TARGET_FPS: u32 = 30;

#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    last_presented: Option<Instant>,
    pending: Option<Frame>,
    dropped: u64,
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_FPS)
    }
}

impl FramePacer {
    /// `target_fps` is clamped to `1..=240`.
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / target_fps.clamp(1, 240),
            last_presented: None,
            pending: None,
            dropped: 0,
        }
    }

    /// Offer a fresh frame; returns it (or nothing) if one is due now.
    pub fn offer(&mut self, frame: Frame, now: Instant) -> Option<Frame> {
        if self.pending.replace(frame).is_some() {
            self.dropped += 1;
        }
        self.poll(now)
    }

    /// Present the pending frame if the interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Frame> {
        if !self.is_due(now) {
            return None;
        }
        let frame = self.pending.take()?;
        self.last_presented = Some(now);
        Some(frame)
    }

    /// When the pending frame becomes presentable, if there is one.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(match self.last_presented {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }

    /// Frames overwritten before they could be presented.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn is_due(&self, now: Instant) -> bool {
        match self.last_presented {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::new(1, 1, vec![tag; 4])
    }

    #[test]
    fn first_frame_is_immediate() {
        let mut pacer = FramePacer::new(30);
        let now = Instant::now();
        assert_eq!(pacer.offer(frame(1), now).unwrap().data[0], 1);
        assert!(!pacer.has_pending());
    }

    #[test]
    fn burst_keeps_only_the_newest() {
        let mut pacer = FramePacer::new(30);
        let start = Instant::now();
        pacer.offer(frame(0), start);

        for i in 1..=100u8 {
            let at = start + Duration::from_micros(u64::from(i) * 100);
            assert!(pacer.offer(frame(i), at).is_none());
        }
        assert_eq!(pacer.dropped(), 99);

        let deadline = pacer.next_deadline().unwrap();
        assert_eq!(deadline, start + pacer.interval());
        assert!(pacer.poll(deadline - Duration::from_millis(1)).is_none());

        let presented = pacer.poll(deadline).unwrap();
        assert_eq!(presented.data[0], 100);
        assert!(pacer.next_deadline().is_none());
    }

    #[test]
    fn presentation_rate_is_bounded() {
        let mut pacer = FramePacer::new(30);
        let start = Instant::now();
        let mut presented = 0;

        // 240 Hz source for one second, polling at every arrival.
        for i in 0..240u64 {
            let at = start + Duration::from_micros(i * 4_166);
            if pacer.offer(frame(0), at).is_some() {
                presented += 1;
            }
        }
        assert!(presented <= 30, "presented {presented}");
        assert!(presented >= 25, "presented {presented}");
    }

    #[test]
    fn fps_is_clamped() {
        assert_eq!(FramePacer::new(0).interval(), Duration::from_secs(1));
    }
}
