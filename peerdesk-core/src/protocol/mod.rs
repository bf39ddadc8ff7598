//! Payload definitions for the control leg.
//!
//! [`message`] holds the top-level `type`-tagged messages; [`input`] holds
//! the remote input events nested inside `input-event` messages. Both are
//! serialized as JSON by [`crate::codec`].

pub mod input;
pub mod message;

pub use input::{InputEvent, MouseButton};
pub use message::{MESSAGE_TYPES, Message, TransferId};
