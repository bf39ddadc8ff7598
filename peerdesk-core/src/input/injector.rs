//! Replaying remote input on the sharing host.
//!
//! Native backends live outside this crate and plug in through
//! [`InputInjector`]. Two implementations ship here:
//!
//! - [`UnavailableInjector`] for hosts without an injection backend. Every
//!   event is refused, which the dispatcher logs and ignores.
//! - [`RecordingInjector`] records events in memory so callers can assert
//!   exactly what would have been injected and in what order.

use std::sync::Mutex;

use crate::error::InjectionError;
use crate::protocol::InputEvent;

// ── InputInjector ────────────────────────────────────────────────

/// Injects remote mouse and keyboard events into the local OS.
///
/// Implementations must not block for long: `inject` is called from the
/// session task for every received event.
pub trait InputInjector: Send + Sync + 'static {
    fn inject(&self, event: &InputEvent) -> Result<(), InjectionError>;

    /// Whether a real backend is present.
    fn is_available(&self) -> bool {
        true
    }
}

// ── UnavailableInjector ──────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableInjector;

impl InputInjector for UnavailableInjector {
    fn inject(&self, _event: &InputEvent) -> Result<(), InjectionError> {
        Err(InjectionError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}

// ── RecordingInjector ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingInjector {
    events: Mutex<Vec<InputEvent>>,
    /// When `true`, every call fails with [`InjectionError::Rejected`].
    pub should_fail: bool,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            should_fail: true,
        }
    }

    /// Snapshot of everything injected so far.
    pub fn events(&self) -> Vec<InputEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl InputInjector for RecordingInjector {
    fn inject(&self, event: &InputEvent) -> Result<(), InjectionError> {
        if self.should_fail {
            return Err(InjectionError::Rejected(format!("{} refused", event.kind())));
        }
        self.events
            .lock()
            .map_err(|_| InjectionError::Rejected("recorder poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MouseButton;

    #[test]
    fn unavailable_refuses_everything() {
        let injector = UnavailableInjector;
        assert!(!injector.is_available());
        assert_eq!(
            injector.inject(&InputEvent::KeyPress { key: "a".into() }),
            Err(InjectionError::Unavailable)
        );
    }

    #[test]
    fn recording_keeps_order() {
        let injector = RecordingInjector::new();
        injector.inject(&InputEvent::MouseMove { x: 1, y: 2 }).unwrap();
        injector
            .inject(&InputEvent::MouseClick {
                button: MouseButton::Left,
                x: None,
                y: None,
            })
            .unwrap();

        let events = injector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], InputEvent::MouseMove { x: 1, y: 2 });
    }

    #[test]
    fn failing_records_nothing() {
        let injector = RecordingInjector::failing();
        assert!(injector.inject(&InputEvent::MouseMove { x: 0, y: 0 }).is_err());
        assert!(injector.events().is_empty());
    }
}
