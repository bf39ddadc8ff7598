//! Remote input events carried inside `input-event` control messages.
//!
//! # Wire shape
//! ```text
//! { "type": "MouseMove",  "payload": { "x": 640, "y": 360 } }
//! { "type": "MouseClick", "payload": { "button": "left", "x": 10, "y": 20 } }
//! { "type": "KeyPress",   "payload": { "key": "Enter" } }
//! ```
//!
//! Coordinates are always in the remote video's native pixel space; the
//! viewer maps them with [`crate::input::mapper`] before sending.

use serde::{Deserialize, Serialize};

// ── MouseButton ──────────────────────────────────────────────────

/// Mouse buttons understood by the injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Map a DOM-style button code (`0` primary, `2` secondary) to a button.
    ///
    /// Anything that is neither primary nor secondary is sent as middle.
    pub fn from_button_code(code: i16) -> Self {
        match code {
            0 => Self::Left,
            2 => Self::Right,
            _ => Self::Middle,
        }
    }
}

impl std::fmt::Display for MouseButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
            Self::Middle => write!(f, "middle"),
        }
    }
}

// ── InputEvent ───────────────────────────────────────────────────

/// A single remote input action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum InputEvent {
    /// Move the pointer to an absolute position.
    MouseMove { x: i32, y: i32 },

    /// Click a button. Without coordinates the click lands wherever the
    /// pointer currently is.
    MouseClick {
        button: MouseButton,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },

    /// Press and release a key. Single characters are typed as text,
    /// longer values name a special key (`Enter`, `Backspace`, ...).
    KeyPress { key: String },
}

impl InputEvent {
    /// Pointer movement is the only event kind subject to rate limiting.
    pub fn is_pointer_move(&self) -> bool {
        matches!(self, Self::MouseMove { .. })
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MouseMove { .. } => "MouseMove",
            Self::MouseClick { .. } => "MouseClick",
            Self::KeyPress { .. } => "KeyPress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_codes() {
        assert_eq!(MouseButton::from_button_code(0), MouseButton::Left);
        assert_eq!(MouseButton::from_button_code(2), MouseButton::Right);
        assert_eq!(MouseButton::from_button_code(1), MouseButton::Middle);
        assert_eq!(MouseButton::from_button_code(4), MouseButton::Middle);
    }

    #[test]
    fn move_uses_adjacent_payload() {
        let json = serde_json::to_value(InputEvent::MouseMove { x: 5, y: 7 }).unwrap();
        assert_eq!(json["type"], "MouseMove");
        assert_eq!(json["payload"]["x"], 5);
        assert_eq!(json["payload"]["y"], 7);
    }

    #[test]
    fn click_without_position() {
        let ev: InputEvent =
            serde_json::from_str(r#"{"type":"MouseClick","payload":{"button":"right"}}"#).unwrap();
        assert_eq!(
            ev,
            InputEvent::MouseClick {
                button: MouseButton::Right,
                x: None,
                y: None
            }
        );

        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("\"x\""));
    }

    #[test]
    fn only_moves_are_throttled() {
        assert!(InputEvent::MouseMove { x: 0, y: 0 }.is_pointer_move());
        assert!(!InputEvent::KeyPress { key: "a".into() }.is_pointer_move());
    }
}
