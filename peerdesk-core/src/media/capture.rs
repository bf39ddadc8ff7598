//! Screen capture collaborator.
//!
//! A [`CaptureProvider`] enumerates targets and streams [`CaptureEvent`]s
//! for the one chosen at accept time. Native providers live outside this
//! crate; [`ScriptedCapture`] is an in-memory provider whose frames are
//! pushed by the caller.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CaptureError;
use crate::media::frame::{CaptureTarget, Frame};

/// Buffered events per capture stream before the provider must wait.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 8;

/// Something the provider reports while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Frame(Frame),
    /// The target changed (e.g. a display resolution switch).
    TargetInfo(CaptureTarget),
}

pub type CaptureStream = mpsc::Receiver<CaptureEvent>;

#[async_trait]
pub trait CaptureProvider: Send + Sync + 'static {
    async fn list_targets(&self) -> Result<Vec<CaptureTarget>, CaptureError>;

    async fn start_capture(&self, target_id: &str) -> Result<CaptureStream, CaptureError>;

    /// Stop the active stream. Safe to call when nothing is running.
    async fn stop_capture(&self);
}

/// Pick the target to capture: the requested id if given, otherwise the
/// primary display, otherwise the first one listed.
pub fn choose_target<'a>(
    targets: &'a [CaptureTarget],
    requested: Option<&str>,
) -> Result<&'a CaptureTarget, CaptureError> {
    if targets.is_empty() {
        return Err(CaptureError::NoTargets);
    }

    match requested {
        Some(id) => targets
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| CaptureError::UnknownTarget(id.to_owned())),
        None => Ok(targets
            .iter()
            .find(|t| t.is_primary)
            .unwrap_or(&targets[0])),
    }
}

// ── ScriptedCapture ──────────────────────────────────────────────

/// In-memory capture provider.
///
/// Frames are pushed with [`ScriptedCapture::push`] and delivered to
/// whichever stream is currently running.
#[derive(Debug, Default)]
pub struct ScriptedCapture {
    targets: Vec<CaptureTarget>,
    failure: Option<CaptureError>,
    state: Mutex<ScriptedState>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    sender: Option<mpsc::Sender<CaptureEvent>>,
    started: Vec<String>,
    stops: u32,
}

impl ScriptedCapture {
    pub fn new(targets: Vec<CaptureTarget>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    /// A provider whose enumeration always fails with `error`.
    pub fn failing(error: CaptureError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// Deliver an event to the running stream.
    ///
    /// Returns `false` when nothing is capturing or the consumer is gone.
    pub async fn push(&self, event: CaptureEvent) -> bool {
        let sender = self.state.lock().ok().and_then(|s| s.sender.clone());
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Target ids passed to `start_capture`, in call order.
    pub fn started(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.started.clone())
            .unwrap_or_default()
    }

    pub fn stop_count(&self) -> u32 {
        self.state.lock().map(|s| s.stops).unwrap_or_default()
    }

    pub fn is_capturing(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.sender.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CaptureProvider for ScriptedCapture {
    async fn list_targets(&self) -> Result<Vec<CaptureTarget>, CaptureError> {
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.targets.clone()),
        }
    }

    async fn start_capture(&self, target_id: &str) -> Result<CaptureStream, CaptureError> {
        let target = choose_target(&self.targets, Some(target_id))?;
        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);

        let mut state = self
            .state
            .lock()
            .map_err(|_| CaptureError::Start("scripted capture poisoned".into()))?;
        state.started.push(target.id.clone());
        state.sender = Some(tx);
        Ok(rx)
    }

    async fn stop_capture(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.sender.take().is_some() {
                state.stops += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, primary: bool) -> CaptureTarget {
        CaptureTarget {
            id: id.into(),
            name: format!("Display {id}"),
            width: 1920,
            height: 1080,
            is_primary: primary,
        }
    }

    #[test]
    fn choose_prefers_request_then_primary_then_first() {
        let targets = vec![target("a", false), target("b", true), target("c", false)];
        assert_eq!(choose_target(&targets, Some("c")).unwrap().id, "c");
        assert_eq!(choose_target(&targets, None).unwrap().id, "b");

        let no_primary = vec![target("x", false), target("y", false)];
        assert_eq!(choose_target(&no_primary, None).unwrap().id, "x");
    }

    #[test]
    fn choose_reports_missing_targets() {
        assert_eq!(choose_target(&[], None), Err(CaptureError::NoTargets));
        assert_eq!(
            choose_target(&[target("a", true)], Some("zz")),
            Err(CaptureError::UnknownTarget("zz".into()))
        );
    }

    #[tokio::test]
    async fn scripted_streams_until_stopped() {
        let capture = ScriptedCapture::new(vec![target("main", true)]);
        assert!(!capture.push(CaptureEvent::Frame(Frame::new(1, 1, vec![0; 4]))).await);

        let mut stream = capture.start_capture("main").await.unwrap();
        assert!(capture.is_capturing());
        assert!(capture.push(CaptureEvent::Frame(Frame::new(1, 1, vec![0; 4]))).await);
        assert!(matches!(stream.recv().await, Some(CaptureEvent::Frame(_))));

        capture.stop_capture().await;
        capture.stop_capture().await;
        assert_eq!(capture.stop_count(), 1);
        assert!(stream.recv().await.is_none());
        assert_eq!(capture.started(), vec!["main".to_string()]);
    }

    #[tokio::test]
    async fn failing_provider_reports_error() {
        let capture = ScriptedCapture::failing(CaptureError::PermissionDenied);
        assert_eq!(
            capture.list_targets().await,
            Err(CaptureError::PermissionDenied)
        );
    }
}
