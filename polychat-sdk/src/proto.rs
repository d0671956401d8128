//! Wire protocol: the JSON frames exchanged over the WebSocket and the data
//! types they carry.
//!
//! Frames are internally tagged: server frames carry an `evt` discriminator,
//! client frames a `cmd` discriminator. Unknown fields are ignored so servers
//! can grow the protocol without breaking older clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user known to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub online: bool,
}

/// A channel on one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// A custom emote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emote {
    pub shortcode: String,
    pub url: String,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author: User,
    pub text: String,
    pub ts: DateTime<Utc>,
}

/// An authenticated session on one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "evt", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// First frame after the socket opens. Carries the session when the
    /// server already recognizes us (e.g. a token bound during the HTTP
    /// upgrade).
    Hello {
        #[serde(default)]
        session: Option<Session>,
    },
    /// A session token was accepted.
    LoginOk { session: Session },
    /// The session ended (logout or server-side invalidation).
    LoggedOut,
    /// A user changed their display name.
    NameChange {
        user_id: String,
        old: String,
        new: String,
    },
    /// Full replacement of the channel list.
    ChannelList { channels: Vec<Channel> },
    /// Full replacement of the user list.
    UserList { users: Vec<User> },
    /// Full replacement of the emote list.
    EmoteList { emotes: Vec<Emote> },
    /// A new message arrived in some channel.
    MessageNew { message: Message },
    Pong,
    /// The server rejected something we sent.
    Error { code: String, text: String },
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Resume a session from a stored token.
    Authenticate { token: String },
    Logout,
    SendMessage { channel_id: String, text: String },
    SetName { name: String },
    Ping,
}

/// Canonical display order for user lists: online users first, then
/// case-insensitive by name, id as the tiebreak.
pub fn sort_users(users: &mut [User]) {
    users.sort_by(|a, b| {
        b.online
            .cmp(&a.online)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
