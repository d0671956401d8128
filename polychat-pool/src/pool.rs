//! The multi-server connection pool.
//!
//! Owns zero or more live server connections, exactly one of which (or none)
//! is "active": the one the UI is looking at. Client events flow through a
//! per-connection forwarder task into the pool's intake channel and are
//! re-emitted as [`PoolEvent`]s only when their source is the active entry.
//! Hosts that refuse a connection land on a failed list and are retried on a
//! fixed interval. The server list, session tokens, and active selection are
//! persisted through [`Storage`] after every mutation.
//!
//! Entries are identified by stable [`ServerId`]s; the positional index only
//! exists as a derived value ([`ServerPool::active_index`]) so a handed-out
//! identity can never go stale when another entry is removed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use polychat_sdk::atom::Atom;
use polychat_sdk::client::{self, Client, ClientHandle, ClientState, ConnectConfig};
use polychat_sdk::event::Event;

use crate::event::PoolEvent;
use crate::storage::Storage;

/// How often the failed list is retried.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(20);

const SERVERS_KEY: &str = "servers";
const ACTIVE_SERVER_KEY: &str = "active-server";

/// Stable, opaque identity of a pool entry. Never reused within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(u64);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The given id does not name a current pool entry.
    #[error("no such server in pool")]
    UnknownServer,

    /// Connection establishment failed and the caller asked for the error.
    #[error("connection to {hostname} failed")]
    Connect {
        hostname: String,
        #[source]
        source: anyhow::Error,
    },

    /// The pool task has exited.
    #[error("pool task is gone")]
    Closed,
}

/// Connection factory, the seam between the pool and the protocol client.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect_to(
        &self,
        hostname: &str,
        session_token: Option<String>,
    ) -> anyhow::Result<Client>;
}

/// Connector backed by the real WebSocket client.
pub struct WsConnector {
    pub secure: bool,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self { secure: true }
    }
}

#[async_trait]
impl Connect for WsConnector {
    async fn connect_to(
        &self,
        hostname: &str,
        session_token: Option<String>,
    ) -> anyhow::Result<Client> {
        client::connect(ConnectConfig {
            hostname: hostname.to_string(),
            secure: self.secure,
            session_token,
            ..Default::default()
        })
        .await
    }
}

/// Per-server UI state, observed by sibling components through the atoms.
#[derive(Clone, Default)]
pub struct UiState {
    /// Index of the channel tab the user has selected on this server.
    pub active_channel: Atom<usize>,
}

/// A live connection in the pool.
pub struct ServerEntry {
    pub id: ServerId,
    pub hostname: String,
    pub handle: ClientHandle,
    pub state: ClientState,
    pub ui: UiState,
    forward_task: JoinHandle<()>,
}

/// A host whose last connection attempt failed; retried on the interval.
#[derive(Debug, Clone)]
pub struct FailedServer {
    pub hostname: String,
    pub session_token: Option<String>,
}

/// Result of [`ServerPool::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Connected; the entry is live under this id.
    Connected(ServerId),
    /// The connection failed and the host was recorded for background retry.
    Deferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedServer {
    hostname: String,
    #[serde(default)]
    session_token: Option<String>,
}

pub struct ServerPool {
    connector: Arc<dyn Connect>,
    storage: Storage,
    servers: Vec<ServerEntry>,
    failed: Vec<FailedServer>,
    active: Option<ServerId>,
    next_id: u64,
    retry_interval: Duration,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
    intake_tx: mpsc::UnboundedSender<(ServerId, Event)>,
    intake_rx: mpsc::UnboundedReceiver<(ServerId, Event)>,
}

impl ServerPool {
    /// Build a pool and the event stream UI components subscribe to.
    pub fn new(
        connector: Arc<dyn Connect>,
        storage: Storage,
    ) -> (Self, mpsc::UnboundedReceiver<PoolEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let pool = Self {
            connector,
            storage,
            servers: Vec::new(),
            failed: Vec::new(),
            active: None,
            next_id: 0,
            retry_interval: RETRY_INTERVAL,
            events_tx,
            intake_tx,
            intake_rx,
        };
        (pool, events_rx)
    }

    /// Override the retry interval (tests use a short one).
    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    // ── Accessors ──

    pub fn servers(&self) -> &[ServerEntry] {
        &self.servers
    }

    pub fn failed(&self) -> &[FailedServer] {
        &self.failed
    }

    pub fn get(&self, id: ServerId) -> Option<&ServerEntry> {
        self.servers.iter().find(|e| e.id == id)
    }

    /// Per-server UI state; subscribe to its atoms to observe changes.
    pub fn ui(&self, id: ServerId) -> Option<&UiState> {
        self.get(id).map(|e| &e.ui)
    }

    pub fn active_id(&self) -> Option<ServerId> {
        self.active
    }

    pub fn active(&self) -> Option<&ServerEntry> {
        self.active.and_then(|id| self.get(id))
    }

    /// Position of the active entry in the server list, if any.
    pub fn active_index(&self) -> Option<usize> {
        self.active.and_then(|id| self.index_of(id))
    }

    pub fn is_active(&self, id: ServerId) -> bool {
        self.active == Some(id)
    }

    fn index_of(&self, id: ServerId) -> Option<usize> {
        self.servers.iter().position(|e| e.id == id)
    }

    // ── Operations ──

    /// Connect to a new server.
    ///
    /// With `allow_failure`, a failed attempt is recorded on the failed list
    /// for background retry and `Ok(Deferred)` is returned; without it the
    /// error propagates and nothing is recorded anywhere (used by explicit
    /// "join server" flows so the UI can show the error inline).
    pub async fn add(
        &mut self,
        hostname: &str,
        allow_failure: bool,
    ) -> Result<AddOutcome, PoolError> {
        self.add_with_token(hostname, None, allow_failure).await
    }

    pub async fn add_with_token(
        &mut self,
        hostname: &str,
        session_token: Option<String>,
        allow_failure: bool,
    ) -> Result<AddOutcome, PoolError> {
        match self.connector.connect_to(hostname, session_token.clone()).await {
            Ok(client) => {
                let id = self.finalize(client);
                tracing::info!(hostname, "server added");
                self.persist();
                let _ = self.events_tx.send(PoolEvent::ConnectionChange);
                Ok(AddOutcome::Connected(id))
            }
            Err(e) if allow_failure => {
                tracing::warn!(hostname, error = %e, "connection failed, will retry");
                self.failed.push(FailedServer {
                    hostname: hostname.to_string(),
                    session_token,
                });
                self.persist();
                let _ = self.events_tx.send(PoolEvent::ConnectionChange);
                Ok(AddOutcome::Deferred)
            }
            Err(e) => Err(PoolError::Connect {
                hostname: hostname.to_string(),
                source: e,
            }),
        }
    }

    /// Wire event forwarding and append the entry.
    ///
    /// Forwarding is registered before the entry becomes visible and with no
    /// await point in between, so no event can slip through unobserved
    /// between "connected" and "wired up".
    fn finalize(&mut self, client: Client) -> ServerId {
        let Client {
            hostname,
            handle,
            state,
            mut events,
        } = client;

        let id = ServerId(self.next_id);
        self.next_id += 1;

        let intake = self.intake_tx.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if intake.send((id, event)).is_err() {
                    break;
                }
            }
        });

        self.servers.push(ServerEntry {
            id,
            hostname,
            handle,
            state,
            ui: UiState::default(),
            forward_task,
        });
        id
    }

    /// Disconnect and drop an entry. If it was active, the first remaining
    /// entry (or none) becomes active.
    pub fn remove(&mut self, id: ServerId) -> Result<(), PoolError> {
        let index = self.index_of(id).ok_or(PoolError::UnknownServer)?;
        let entry = self.servers.remove(index);
        entry.forward_task.abort();
        let handle = entry.handle.clone();
        tokio::spawn(async move {
            let _ = handle.quit().await;
        });
        tracing::info!(hostname = %entry.hostname, "server removed");

        if self.active == Some(id) {
            let next = self.servers.first().map(|e| e.id);
            self.activate(next);
        }
        self.persist();
        let _ = self.events_tx.send(PoolEvent::ConnectionChange);
        Ok(())
    }

    /// Switch the active server. `None` clears the selection. Unknown ids
    /// fail loudly; that is a caller bug, not a recoverable condition.
    pub fn set_active(&mut self, id: Option<ServerId>) -> Result<(), PoolError> {
        if let Some(id) = id {
            if self.index_of(id).is_none() {
                return Err(PoolError::UnknownServer);
            }
        }
        self.activate(id);
        self.persist();
        let _ = self.events_tx.send(PoolEvent::ConnectionChange);
        Ok(())
    }

    /// Point `active` at `id` and replay the new active server's current
    /// state as synthetic events, so listeners bound to the active-server
    /// streams stay correct across switches without re-subscribing.
    fn activate(&mut self, id: Option<ServerId>) {
        self.active = id;
        match self.active() {
            Some(entry) => {
                match entry.state.me.get() {
                    Some(user) => {
                        let _ = self.events_tx.send(PoolEvent::LoggedIn { user });
                    }
                    None => {
                        let _ = self.events_tx.send(PoolEvent::LoggedOut);
                    }
                }
                if entry.state.is_connected() {
                    let _ = self.events_tx.send(PoolEvent::Connected);
                } else {
                    let _ = self.events_tx.send(PoolEvent::Disconnected {
                        reason: "connection lost".to_string(),
                    });
                }
                // Collection snapshots follow so list views repaint.
                let _ = self
                    .events_tx
                    .send(PoolEvent::ChannelsChanged(entry.state.channels.get()));
                let _ = self
                    .events_tx
                    .send(PoolEvent::UsersChanged(entry.state.users.get()));
                let _ = self
                    .events_tx
                    .send(PoolEvent::EmotesChanged(entry.state.emotes.get()));
            }
            None => {
                let _ = self.events_tx.send(PoolEvent::LoggedOut);
                let _ = self.events_tx.send(PoolEvent::Disconnected {
                    reason: "no active server".to_string(),
                });
            }
        }
    }

    /// Retry every failed host once. Successes are promoted to live entries
    /// (with full forwarding wiring); failures stay on the list for the next
    /// round. Returns the number promoted.
    pub async fn try_reconnect(&mut self) -> usize {
        let pending = std::mem::take(&mut self.failed);
        let mut promoted = 0;
        for failed in pending {
            match self
                .connector
                .connect_to(&failed.hostname, failed.session_token.clone())
                .await
            {
                Ok(client) => {
                    self.finalize(client);
                    promoted += 1;
                    tracing::info!(hostname = %failed.hostname, "reconnected");
                }
                Err(e) => {
                    tracing::debug!(hostname = %failed.hostname, error = %e, "retry failed");
                    self.failed.push(failed);
                }
            }
        }
        if promoted > 0 {
            self.persist();
            let _ = self.events_tx.send(PoolEvent::ConnectionChange);
        }
        promoted
    }

    /// Drop a failed host without retrying it. Returns false if it wasn't
    /// on the list.
    pub fn remove_failed(&mut self, hostname: &str) -> bool {
        let before = self.failed.len();
        self.failed.retain(|f| f.hostname != hostname);
        if self.failed.len() == before {
            return false;
        }
        self.persist();
        let _ = self.events_tx.send(PoolEvent::ConnectionChange);
        true
    }

    // ── Event intake ──

    /// Apply any forwarded client events that have arrived. The actor loop
    /// calls this continuously; direct embedders call it from their own
    /// event loop.
    pub fn pump(&mut self) {
        while let Ok((id, event)) = self.intake_rx.try_recv() {
            self.apply_client_event(id, event);
        }
    }

    pub(crate) fn take_intake(&mut self) -> mpsc::UnboundedReceiver<(ServerId, Event)> {
        let (_tx, rx) = mpsc::unbounded_channel();
        std::mem::replace(&mut self.intake_rx, rx)
    }

    pub(crate) fn apply_client_event(&mut self, id: ServerId, event: Event) {
        // The entry may have been removed while the event was in flight.
        let Some(index) = self.index_of(id) else {
            return;
        };

        if let Event::Disconnected { reason } = &event {
            // Terminal: the client task has exited. Demote the entry for
            // background retry, keeping its token for session resumption.
            let entry = self.servers.remove(index);
            entry.forward_task.abort();
            tracing::warn!(hostname = %entry.hostname, %reason, "connection lost, demoting");
            self.failed.push(FailedServer {
                session_token: entry.state.session_token(),
                hostname: entry.hostname,
            });

            if self.active == Some(id) {
                let _ = self.events_tx.send(PoolEvent::Disconnected {
                    reason: reason.clone(),
                });
                let next = self.servers.first().map(|e| e.id);
                self.activate(next);
            }
            self.persist();
            let _ = self.events_tx.send(PoolEvent::ConnectionChange);
            return;
        }

        // The only-if-active filter: everything else is forwarded solely
        // when it came from the active connection.
        if self.active == Some(id) {
            if let Some(event) = forwarded(event) {
                let _ = self.events_tx.send(event);
            }
        }
    }

    // ── Persistence ──

    /// Rewrite the saved server list (live + failed hosts, with session
    /// tokens) and the active selection. The selection is saved by hostname,
    /// not position: the list can shrink at restore time when some hosts are
    /// unreachable, and a positional index would then name the wrong server.
    fn persist(&mut self) {
        let saved: Vec<SavedServer> = self
            .servers
            .iter()
            .map(|e| SavedServer {
                hostname: e.hostname.clone(),
                session_token: e.state.session_token(),
            })
            .chain(self.failed.iter().map(|f| SavedServer {
                hostname: f.hostname.clone(),
                session_token: f.session_token.clone(),
            }))
            .collect();
        self.storage.save(SERVERS_KEY, Some(&saved));

        let active_host = self.active().map(|e| e.hostname.clone());
        self.storage.save(ACTIVE_SERVER_KEY, active_host.as_ref());
    }

    /// Re-add the servers saved by a previous session and restore the active
    /// selection. Unreachable hosts land on the failed list as usual.
    pub async fn restore(&mut self) {
        // Read everything up front: re-adding rewrites storage as it goes.
        let saved: Vec<SavedServer> = self.storage.load(SERVERS_KEY, Vec::new());
        let active_host: Option<String> = self.storage.load(ACTIVE_SERVER_KEY, None);

        for server in saved {
            let _ = self
                .add_with_token(&server.hostname, server.session_token, true)
                .await;
        }
        // The saved active host may have been deferred to the failed list;
        // then nothing is selected.
        let id = active_host
            .and_then(|host| self.servers.iter().find(|e| e.hostname == host))
            .map(|e| e.id);
        let _ = self.set_active(id);
    }
}

impl Drop for ServerPool {
    fn drop(&mut self) {
        for entry in &self.servers {
            entry.forward_task.abort();
        }
    }
}

/// Map a client event to its pool-level counterpart. Messages are consumed
/// per-channel through the client itself, not the pool stream; terminal
/// disconnects are handled by demotion before this runs.
fn forwarded(event: Event) -> Option<PoolEvent> {
    match event {
        Event::Connected => Some(PoolEvent::Connected),
        Event::LoggedIn { user } => Some(PoolEvent::LoggedIn { user }),
        Event::LoggedOut => Some(PoolEvent::LoggedOut),
        Event::NameChanged { old, new } => Some(PoolEvent::NameChanged { old, new }),
        Event::ChannelsChanged(channels) => Some(PoolEvent::ChannelsChanged(channels)),
        Event::UsersChanged(users) => Some(PoolEvent::UsersChanged(users)),
        Event::EmotesChanged(emotes) => Some(PoolEvent::EmotesChanged(emotes)),
        Event::Reconnected => Some(PoolEvent::Reconnected),
        Event::Message(_) => None,
        Event::Disconnected { .. } => None,
    }
}
