//! Session lifecycle: the state machine and the actor that drives it.

pub mod machine;
pub mod state;

pub use machine::{
    Capabilities, DEFAULT_DOWNLOAD_DIR, Session, SessionBuilder, SessionEvent, SessionEvents,
    SessionHandle,
};
pub use state::{CloseCause, Role, SessionState};
