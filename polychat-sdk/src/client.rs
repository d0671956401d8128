//! WebSocket client for a single polychat server.
//!
//! This is the main entry point for SDK consumers. It manages the WebSocket
//! connection, session resumption, and emits events. The protocol task runs
//! on its own tokio task; consumers talk to it through a [`ClientHandle`]
//! and read from the [`Event`](crate::event::Event) receiver.
//!
//! ## Reconnection
//!
//! A dropped socket is re-established transparently with exponential backoff
//! (2→4→8→16→30s cap, with jitter) for a bounded number of attempts. Each
//! successful re-establishment emits [`Event::Reconnected`]. When the
//! attempts are exhausted the task emits a final [`Event::Disconnected`] and
//! exits; bringing the connection back after that is the consumer's job
//! (the pool crate does it on a fixed retry timer).

use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::atom::Atom;
use crate::event::Event;
use crate::proto::{self, Channel, ClientFrame, Emote, ServerFrame, Session, User};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for automatic reconnection after a socket drop.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Consecutive failed attempts before the client gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 8,
        }
    }
}

/// Configuration for connecting to a polychat server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server hostname, optionally with a port (`chat.example.org:8443`).
    pub hostname: String,
    /// Use `wss://` (TLS). On by default.
    pub secure: bool,
    /// Stored session token to resume, if any.
    pub session_token: Option<String>,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost:3000".to_string(),
            secure: true,
            session_token: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    /// Resume a session from a token.
    Authenticate { token: String },
    Logout,
    SendMessage { channel_id: String, text: String },
    SetName { name: String },
    /// Close the socket and end the client task.
    Quit,
}

impl Command {
    /// Wire frame for this command; `None` for commands the socket loop
    /// handles itself.
    fn into_frame(self) -> Option<ClientFrame> {
        match self {
            Command::Authenticate { token } => Some(ClientFrame::Authenticate { token }),
            Command::Logout => Some(ClientFrame::Logout),
            Command::SendMessage { channel_id, text } => {
                Some(ClientFrame::SendMessage { channel_id, text })
            }
            Command::SetName { name } => Some(ClientFrame::SetName { name }),
            Command::Quit => None,
        }
    }
}

/// A handle to a running client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn authenticate(&self, token: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Authenticate {
                token: token.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.cmd_tx.send(Command::Logout).await?;
        Ok(())
    }

    pub async fn send_message(&self, channel_id: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::SendMessage {
                channel_id: channel_id.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::SetName {
                name: name.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn quit(&self) -> Result<()> {
        self.cmd_tx.send(Command::Quit).await?;
        Ok(())
    }
}

/// Observable state of one server connection. Cheap to clone; all clones
/// share the underlying atoms.
#[derive(Clone, Default)]
pub struct ClientState {
    /// Our user, when logged in.
    pub me: Atom<Option<User>>,
    pub channels: Atom<Vec<Channel>>,
    /// Kept in display order (see [`proto::sort_users`]).
    pub users: Atom<Vec<User>>,
    pub emotes: Atom<Vec<Emote>>,
    /// Current session, when logged in.
    pub session: Atom<Option<Session>>,
    /// Whether the socket is currently up.
    pub connected: Atom<bool>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.get().map(|s| s.token)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }
}

/// A connected client: command handle, observable state, and the event
/// receiver. The receiver is a plain field so embedders (like the pool's
/// forwarding layer) can move it out.
pub struct Client {
    pub hostname: String,
    pub handle: ClientHandle,
    pub state: ClientState,
    pub events: mpsc::Receiver<Event>,
}

impl Client {
    /// Assemble a client around an externally driven transport. Integrations
    /// and tests use this to stand in for [`connect`].
    pub fn from_parts(
        hostname: String,
        cmd_tx: mpsc::Sender<Command>,
        events: mpsc::Receiver<Event>,
        state: ClientState,
    ) -> Self {
        Self {
            hostname,
            handle: ClientHandle { cmd_tx },
            state,
            events,
        }
    }
}

fn ws_url(hostname: &str, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{hostname}/api/ws")
}

/// Connect to a polychat server and run the client.
///
/// The initial handshake happens before this returns, so connection errors
/// surface to the caller; everything after that runs on a spawned task.
pub async fn connect(config: ConnectConfig) -> Result<Client> {
    let url = ws_url(&config.hostname, config.secure);
    tracing::debug!(%url, "connecting");
    let (socket, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| anyhow!("WebSocket connect to {} failed: {e}", config.hostname))?;
    tracing::debug!(hostname = %config.hostname, "connected");

    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let state = ClientState::new();
    let hostname = config.hostname.clone();

    let task_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = run_socket(socket, config, task_state.clone(), event_tx.clone(), cmd_rx).await
        {
            task_state.connected.set(false);
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    Ok(Client {
        hostname,
        handle: ClientHandle { cmd_tx },
        state,
        events: event_rx,
    })
}

async fn run_socket(
    socket: Socket,
    config: ConnectConfig,
    state: ClientState,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()> {
    let mut socket = socket;
    state.connected.set(true);
    let _ = event_tx.send(Event::Connected).await;

    loop {
        // Prefer the live session token over the configured one: the server
        // may have rotated it since we first connected.
        let token = state.session_token().or_else(|| config.session_token.clone());
        match drive_socket(socket, token, &state, &event_tx, &mut cmd_rx).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                state.connected.set(false);
                tracing::warn!(hostname = %config.hostname, error = %e, "socket dropped");
                socket = reconnect(&config, &e).await?;
                state.connected.set(true);
                let _ = event_tx.send(Event::Reconnected).await;
            }
        }
    }
}

/// Re-establish the socket with exponential backoff. Errors out once the
/// configured attempts are exhausted.
async fn reconnect(config: &ConnectConfig, cause: &anyhow::Error) -> Result<Socket> {
    let url = ws_url(&config.hostname, config.secure);
    let mut delay = config.reconnect.initial_delay;

    for attempt in 1..=config.reconnect.max_attempts {
        let pause = delay + Duration::from_millis(jitter(delay.as_millis() as u64 / 4));
        tokio::time::sleep(pause).await;
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                tracing::info!(hostname = %config.hostname, attempt, "reconnected");
                return Ok(socket);
            }
            Err(e) => {
                tracing::warn!(
                    hostname = %config.hostname,
                    error = %e,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "reconnect failed"
                );
                delay = next_delay(delay, &config.reconnect);
            }
        }
    }
    Err(anyhow!(
        "gave up after {} reconnect attempts: {cause}",
        config.reconnect.max_attempts
    ))
}

fn next_delay(delay: Duration, config: &ReconnectConfig) -> Duration {
    let scaled = (delay.as_millis() as f64 * config.backoff_factor) as u64;
    Duration::from_millis(scaled.min(config.max_delay.as_millis() as u64))
}

/// Simple jitter: pseudo-random value 0..max derived from the clock.
fn jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max
}

/// Run one socket until it drops (Err) or the consumer quits (Ok).
async fn drive_socket(
    socket: Socket,
    auth_token: Option<String>,
    state: &ClientState,
    event_tx: &mpsc::Sender<Event>,
    cmd_rx: &mut mpsc::Receiver<Command>,
) -> Result<()> {
    let (mut sink, mut stream) = socket.split();

    if let Some(token) = auth_token {
        send_frame(&mut sink, &ClientFrame::Authenticate { token }).await?;
    }

    let ping_interval = Duration::from_secs(30);
    let idle_timeout = Duration::from_secs(90);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            incoming = stream.next() => {
                let msg = match incoming {
                    None => return Err(anyhow!("EOF")),
                    Some(Err(e)) => return Err(anyhow!("socket error: {e}")),
                    Some(Ok(msg)) => msg,
                };
                last_activity = Instant::now();
                match msg {
                    WsMessage::Text(text) => {
                        match serde_json::from_str::<ServerFrame>(text.as_str()) {
                            Ok(frame) => apply_frame(frame, state, event_tx).await,
                            Err(e) => tracing::debug!(error = %e, "ignoring unparseable frame"),
                        }
                    }
                    WsMessage::Ping(data) => sink.send(WsMessage::Pong(data)).await?,
                    WsMessage::Close(_) => return Err(anyhow!("server closed the connection")),
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    // All handles dropped, or an explicit quit: close cleanly.
                    None | Some(Command::Quit) => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return Ok(());
                    }
                    Some(cmd) => {
                        if let Some(frame) = cmd.into_frame() {
                            send_frame(&mut sink, &frame).await?;
                        }
                    }
                }
            }
            // Periodic client-to-server ping and idle-timeout detection.
            _ = tokio::time::sleep_until(last_activity + ping_interval) => {
                if last_activity.elapsed() > idle_timeout {
                    return Err(anyhow!("ping timeout"));
                }
                send_frame(&mut sink, &ClientFrame::Ping).await?;
            }
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<Socket, WsMessage>,
    frame: &ClientFrame,
) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    sink.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

/// Update the observable state and emit the matching event.
async fn apply_frame(frame: ServerFrame, state: &ClientState, event_tx: &mpsc::Sender<Event>) {
    match frame {
        // Hello only carries a session when the server already knows us.
        ServerFrame::Hello { session: None } => {}
        ServerFrame::Hello {
            session: Some(session),
        }
        | ServerFrame::LoginOk { session } => {
            state.me.set(Some(session.user.clone()));
            state.session.set(Some(session.clone()));
            let _ = event_tx.send(Event::LoggedIn { user: session.user }).await;
        }
        ServerFrame::LoggedOut => {
            state.session.set(None);
            state.me.set(None);
            let _ = event_tx.send(Event::LoggedOut).await;
        }
        ServerFrame::NameChange { user_id, old, new } => {
            let mut users = state.users.get();
            if let Some(u) = users.iter_mut().find(|u| u.id == user_id) {
                u.name = new.clone();
            }
            proto::sort_users(&mut users);
            state.users.set(users.clone());
            let _ = event_tx.send(Event::UsersChanged(users)).await;

            if state.me.get().is_some_and(|u| u.id == user_id) {
                if let Some(mut me) = state.me.get() {
                    me.name = new.clone();
                    state.me.set(Some(me));
                }
                let _ = event_tx.send(Event::NameChanged { old, new }).await;
            }
        }
        ServerFrame::ChannelList { channels } => {
            state.channels.set(channels.clone());
            let _ = event_tx.send(Event::ChannelsChanged(channels)).await;
        }
        ServerFrame::UserList { mut users } => {
            proto::sort_users(&mut users);
            state.users.set(users.clone());
            let _ = event_tx.send(Event::UsersChanged(users)).await;
        }
        ServerFrame::EmoteList { emotes } => {
            state.emotes.set(emotes.clone());
            let _ = event_tx.send(Event::EmotesChanged(emotes)).await;
        }
        ServerFrame::MessageNew { message } => {
            let _ = event_tx.send(Event::Message(message)).await;
        }
        ServerFrame::Pong => {}
        ServerFrame::Error { code, text } => {
            tracing::warn!(%code, %text, "server error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_scheme_follows_secure_flag() {
        assert_eq!(ws_url("chat.example.org", true), "wss://chat.example.org/api/ws");
        assert_eq!(ws_url("localhost:3000", false), "ws://localhost:3000/api/ws");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_secs());
            delay = next_delay(delay, &config);
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn jitter_stays_in_range() {
        assert_eq!(jitter(0), 0);
        for _ in 0..100 {
            assert!(jitter(500) < 500);
        }
    }

    #[test]
    fn quit_has_no_wire_frame() {
        assert!(Command::Quit.into_frame().is_none());
        assert!(Command::Logout.into_frame().is_some());
    }

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            online: true,
        }
    }

    #[tokio::test]
    async fn rename_of_another_user_reaches_the_user_list() {
        let state = ClientState::new();
        state.users.set(vec![user("u1", "ada"), user("u2", "bob")]);
        state.me.set(Some(user("u1", "ada")));
        let (tx, mut rx) = mpsc::channel(8);

        apply_frame(
            ServerFrame::NameChange {
                user_id: "u2".to_string(),
                old: "bob".to_string(),
                new: "rob".to_string(),
            },
            &state,
            &tx,
        )
        .await;

        assert!(state.users.get().iter().any(|u| u.name == "rob"));
        match rx.try_recv().unwrap() {
            Event::UsersChanged(users) => assert!(users.iter().any(|u| u.name == "rob")),
            other => panic!("wrong event: {other:?}"),
        }
        // Someone else's rename: no NameChanged for us.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn own_rename_also_emits_name_changed() {
        let state = ClientState::new();
        state.users.set(vec![user("u1", "ada")]);
        state.me.set(Some(user("u1", "ada")));
        let (tx, mut rx) = mpsc::channel(8);

        apply_frame(
            ServerFrame::NameChange {
                user_id: "u1".to_string(),
                old: "ada".to_string(),
                new: "ida".to_string(),
            },
            &state,
            &tx,
        )
        .await;

        assert_eq!(state.me.get().unwrap().name, "ida");
        assert!(matches!(rx.try_recv().unwrap(), Event::UsersChanged(_)));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::NameChanged { new, .. } if new == "ida"
        ));
    }
}
