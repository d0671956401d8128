//! Events the pool emits to UI consumers.

use polychat_sdk::proto::{Channel, Emote, User};

/// Events about the *active* server, plus a generic membership notification.
///
/// All variants except [`PoolEvent::ConnectionChange`] describe the server
/// that was active when they were emitted; events from non-active
/// connections never reach this stream. Switching the active server replays
/// synthetic lifecycle events so listeners see the new server's current
/// state without re-subscribing.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// The active connection is up.
    Connected,

    /// The active connection dropped.
    Disconnected { reason: String },

    /// The active connection was transparently re-established.
    Reconnected,

    /// The active server has a session.
    LoggedIn { user: User },

    /// The active server has no session.
    LoggedOut,

    /// Our display name on the active server changed.
    NameChanged { old: String, new: String },

    /// The active server's channel list was replaced.
    ChannelsChanged(Vec<Channel>),

    /// The active server's user list was replaced.
    UsersChanged(Vec<User>),

    /// The active server's emote list was replaced.
    EmotesChanged(Vec<Emote>),

    /// Pool membership changed: a server was added, removed, demoted to the
    /// failed list, promoted back, or the active selection moved.
    ConnectionChange,
}
