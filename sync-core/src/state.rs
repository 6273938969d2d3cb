//! Session lifecycle state machine.
//!
//! Pure and side-effect free: the state machine takes an event and returns
//! the next state plus the actions the caller must perform. `sync-client`
//! owns the transport link and executes the actions.
//!
//! ```text
//! Created ──connected──▶ Connected ──disconnect──▶ Disconnected
//!    │                      │   ▲                       │
//!    │                      │   └───────connected───────┘
//!    └──────shutdown────────┴──────────────────────────────▶ ShutDown
//! ```
//!
//! `ShutDown` is terminal: every event leaves it unchanged.

/// Lifecycle state of a sync session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Secret resolved, never connected.
    #[default]
    Created,
    /// Linked to a relay.
    Connected {
        /// Address of the active relay.
        relay: String,
    },
    /// Was connected; link closed. May connect again.
    Disconnected,
    /// Terminal.
    ShutDown,
}

impl SessionState {
    /// Fresh session state.
    pub fn new() -> Self {
        Self::Created
    }

    /// Apply an event. Invalid transitions leave the state unchanged and
    /// produce no actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            (Self::ShutDown, _) => (Self::ShutDown, vec![]),

            (Self::Created | Self::Disconnected, Event::Connected { relay }) => (
                Self::Connected { relay },
                vec![Action::Publish(SessionStatus::Connected)],
            ),

            (Self::Connected { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CloseLink,
                    Action::Publish(SessionStatus::Disconnected),
                ],
            ),

            (Self::Connected { .. }, Event::ShutdownRequested) => (
                Self::ShutDown,
                vec![Action::CloseLink, Action::Publish(SessionStatus::ShutDown)],
            ),
            (Self::Created | Self::Disconnected, Event::ShutdownRequested) => {
                (Self::ShutDown, vec![Action::Publish(SessionStatus::ShutDown)])
            }

            (state, _) => (state, vec![]),
        }
    }

    /// Coarse status without the relay address.
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Created => SessionStatus::Created,
            Self::Connected { .. } => SessionStatus::Connected,
            Self::Disconnected => SessionStatus::Disconnected,
            Self::ShutDown => SessionStatus::ShutDown,
        }
    }

    /// True only in `Connected`.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// True only in `ShutDown`.
    pub fn is_shut_down(&self) -> bool {
        matches!(self, Self::ShutDown)
    }

    /// The active relay, only while connected.
    pub fn active_relay(&self) -> Option<&str> {
        match self {
            Self::Connected { relay } => Some(relay),
            _ => None,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The transport opened a link to `relay`.
    Connected {
        /// Address of the relay that accepted.
        relay: String,
    },
    /// The caller asked to disconnect.
    DisconnectRequested,
    /// The caller asked to shut down.
    ShutdownRequested,
}

/// Instructions for the session driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Close the current transport link.
    CloseLink,
    /// Broadcast a new status to observers.
    Publish(SessionStatus),
}

/// Observable session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    /// Never connected.
    #[default]
    Created,
    /// Linked to a relay.
    Connected,
    /// Link closed; may reconnect.
    Disconnected,
    /// Terminal.
    ShutDown,
}
