//! Events emitted by the client for the UI layer to consume.

use crate::proto::{Channel, Emote, Message, User};

/// Events the SDK emits to the consumer (UI, pool, bot, etc.)
#[derive(Debug, Clone)]
pub enum Event {
    /// Socket is up and the server said hello.
    Connected,

    /// A session was established (resumed token or fresh login).
    LoggedIn { user: User },

    /// The session ended.
    LoggedOut,

    /// Our own display name changed. Other users' renames surface through
    /// [`Event::UsersChanged`].
    NameChanged { old: String, new: String },

    /// The channel list was replaced.
    ChannelsChanged(Vec<Channel>),

    /// The user list was replaced (sorted, see `proto::sort_users`).
    UsersChanged(Vec<User>),

    /// The emote list was replaced.
    EmotesChanged(Vec<Emote>),

    /// A new message arrived in some channel.
    Message(Message),

    /// A dropped socket was transparently re-established.
    Reconnected,

    /// The connection is gone for good; the client task has exited.
    Disconnected { reason: String },
}
