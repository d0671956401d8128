//! Client SDK for polychat servers.
//!
//! A polychat server exposes a JSON protocol over a single WebSocket. This
//! crate manages that connection: it speaks the frame protocol, keeps
//! observable collections (`me`, `channels`, `users`, `emotes`) up to date,
//! and emits [`Event`]s for the UI layer to consume.
//!
//! Multi-server support (connecting to several servers at once and switching
//! between them) lives in the `polychat-pool` crate on top of this one.

pub mod atom;
pub mod client;
pub mod event;
pub mod proto;

pub use atom::{Atom, Subscription};
pub use client::{connect, Client, ClientHandle, ClientState, Command, ConnectConfig};
pub use event::Event;
