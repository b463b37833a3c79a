//! Session lifecycle notifications.

/// Broadcast by the refresh coordinator as the session changes state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A refresh succeeded and the store holds a new pair.
    Refreshed,
    /// Tokens were cleared; the user has to sign in again.
    LoginRequired { reason: String },
}

/// Capacity of the event channel. Slow subscribers see `Lagged`, never block the coordinator.
pub(crate) const EVENT_CAPACITY: usize = 16;
