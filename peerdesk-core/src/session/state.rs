//! Session lifecycle state machine.
//!
//! Provides a `SessionState` enum with validated transitions that return
//! `Result` instead of panicking. The session actor is the only writer.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{PeerdeskError, TransportError};
use crate::transport::PeerId;

// ── Role / CloseCause ────────────────────────────────────────────

/// Which side opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Dialled the remote and views its screen.
    Initiator,
    /// Answered the call and shares its screen.
    Responder,
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// `disconnect()` was called or every handle was dropped.
    LocalDisconnect,
    /// The remote closed a leg.
    PeerClosed,
    /// The transport reported a failure.
    Transport(TransportError),
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalDisconnect => write!(f, "disconnected locally"),
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::Transport(e) => write!(f, "{e}"),
        }
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// The current phase of a session.
///
/// ```text
///  Idle ──► Advertising ──► Connecting ──────────────────► Active
///               │  ▲                                ▲        │
///               ▼  │ reject                         │        ▼
///          AwaitingAcceptance ──► Connecting ───────┘   Terminating ──► Closed
/// ```
///
/// Any non-terminal state may also fall straight to `Terminating` on
/// disconnect or transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not yet registered with the transport.
    #[default]
    Idle,

    /// Local identity obtained; waiting for a peer.
    Advertising { local_id: PeerId },

    /// Legs are opening. Both must be open to become `Active`.
    Connecting {
        remote: PeerId,
        role: Role,
        data_open: bool,
        media_open: bool,
    },

    /// A remote peer is calling; waiting for the operator.
    AwaitingAcceptance { remote: PeerId },

    /// Both legs open.
    Active {
        remote: PeerId,
        role: Role,
        since: Instant,
    },

    /// Releasing resources.
    Terminating,

    /// Terminal. A new session is needed to reconnect.
    Closed { cause: CloseCause },
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Advertising { .. } => write!(f, "Advertising"),
            Self::Connecting { .. } => write!(f, "Connecting"),
            Self::AwaitingAcceptance { .. } => write!(f, "AwaitingAcceptance"),
            Self::Active { .. } => write!(f, "Active"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Closed { .. } => write!(f, "Closed"),
        }
    }
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    pub fn is_advertising(&self) -> bool {
        matches!(self, Self::Advertising { .. })
    }

    /// The associated remote peer, if any.
    pub fn remote(&self) -> Option<&PeerId> {
        match self {
            Self::Connecting { remote, .. }
            | Self::AwaitingAcceptance { remote }
            | Self::Active { remote, .. } => Some(remote),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Connecting { role, .. } | Self::Active { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// How long the session has been `Active`.
    pub fn active_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Active { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> PeerdeskError {
        PeerdeskError::InvalidTransition {
            action,
            state: self.to_string(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn advertise(&mut self, local_id: PeerId) -> Result<(), PeerdeskError> {
        match self {
            Self::Idle => {
                *self = Self::Advertising { local_id };
                Ok(())
            }
            _ => Err(self.invalid("advertise")),
        }
    }

    /// Start dialling `remote`.
    ///
    /// Valid from: `Advertising`.
    pub fn begin_connect(&mut self, remote: PeerId) -> Result<(), PeerdeskError> {
        match self {
            Self::Advertising { .. } => {
                *self = Self::Connecting {
                    remote,
                    role: Role::Initiator,
                    data_open: false,
                    media_open: false,
                };
                Ok(())
            }
            _ => Err(self.invalid("connect")),
        }
    }

    /// An inbound call arrived.
    ///
    /// Valid from: `Advertising`.
    pub fn offer_received(&mut self, remote: PeerId) -> Result<(), PeerdeskError> {
        match self {
            Self::Advertising { .. } => {
                *self = Self::AwaitingAcceptance { remote };
                Ok(())
            }
            _ => Err(self.invalid("receive a call")),
        }
    }

    /// The operator declined; back to waiting for peers.
    ///
    /// Valid from: `AwaitingAcceptance`.
    pub fn call_rejected(&mut self, local_id: PeerId) -> Result<(), PeerdeskError> {
        match self {
            Self::AwaitingAcceptance { .. } => {
                *self = Self::Advertising { local_id };
                Ok(())
            }
            _ => Err(self.invalid("reject")),
        }
    }

    /// The call was answered. Becomes `Active` straight away when the
    /// control leg is already bound. Returns whether it did.
    ///
    /// Valid from: `AwaitingAcceptance`.
    pub fn call_answered(&mut self, data_open: bool) -> Result<bool, PeerdeskError> {
        let remote = match self {
            Self::AwaitingAcceptance { remote } => remote.clone(),
            _ => return Err(self.invalid("accept")),
        };
        *self = Self::Connecting {
            remote,
            role: Role::Responder,
            data_open,
            media_open: true,
        };
        self.try_activate()
    }

    /// Valid from: `Connecting`.
    pub fn mark_data_open(&mut self) -> Result<bool, PeerdeskError> {
        match self {
            Self::Connecting { data_open, .. } => {
                *data_open = true;
                self.try_activate()
            }
            _ => Err(self.invalid("open the control leg")),
        }
    }

    /// Valid from: `Connecting`.
    pub fn mark_media_open(&mut self) -> Result<bool, PeerdeskError> {
        match self {
            Self::Connecting { media_open, .. } => {
                *media_open = true;
                self.try_activate()
            }
            _ => Err(self.invalid("open the media leg")),
        }
    }

    fn try_activate(&mut self) -> Result<bool, PeerdeskError> {
        match self {
            Self::Connecting {
                remote,
                role,
                data_open: true,
                media_open: true,
            } => {
                *self = Self::Active {
                    remote: remote.clone(),
                    role: *role,
                    since: Instant::now(),
                };
                Ok(true)
            }
            Self::Connecting { .. } => Ok(false),
            _ => Err(self.invalid("activate")),
        }
    }

    /// Valid from any state except `Terminating` and `Closed`.
    pub fn begin_terminate(&mut self) -> Result<(), PeerdeskError> {
        match self {
            Self::Terminating | Self::Closed { .. } => Err(self.invalid("terminate")),
            _ => {
                *self = Self::Terminating;
                Ok(())
            }
        }
    }

    /// Enter the terminal state regardless of the current one.
    pub fn close(&mut self, cause: CloseCause) {
        *self = Self::Closed { cause };
    }
}

// ── Tests ────────────────────────────────────────────────────────
