//! Actor wrapper: run the pool on its own task behind a cloneable handle.
//!
//! UIs that already own an event loop can drive [`ServerPool`] directly;
//! everyone else hands it to [`spawn`], which services handle commands,
//! forwarded client events, and the failed-host retry tick in one
//! `select!` loop. The task ends when every [`PoolHandle`] is dropped.

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::pool::{AddOutcome, PoolError, ServerId, ServerPool};

enum PoolCommand {
    Add {
        hostname: String,
        session_token: Option<String>,
        allow_failure: bool,
        reply: oneshot::Sender<Result<AddOutcome, PoolError>>,
    },
    Remove {
        id: ServerId,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    SetActive {
        id: Option<ServerId>,
        reply: oneshot::Sender<Result<(), PoolError>>,
    },
    TryReconnect {
        reply: oneshot::Sender<usize>,
    },
    RemoveFailed {
        hostname: String,
        reply: oneshot::Sender<bool>,
    },
    Restore {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<PoolSnapshot>,
    },
}

/// Point-in-time view of pool membership, for rendering server lists.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub servers: Vec<(ServerId, String)>,
    pub failed_hosts: Vec<String>,
    pub active: Option<ServerId>,
}

/// Cloneable handle to a spawned pool task.
#[derive(Clone)]
pub struct PoolHandle {
    cmd_tx: mpsc::Sender<PoolCommand>,
}

/// Run the pool on its own task and return a handle to it.
pub fn spawn(pool: ServerPool) -> PoolHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    tokio::spawn(run(pool, cmd_rx));
    PoolHandle { cmd_tx }
}

async fn run(mut pool: ServerPool, mut cmd_rx: mpsc::Receiver<PoolCommand>) {
    let mut intake_rx = pool.take_intake();
    let mut retry = tokio::time::interval(pool.retry_interval());
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                // All handles dropped: the pool dies with us.
                let Some(cmd) = cmd else { break };
                dispatch(&mut pool, cmd).await;
            }
            Some((id, event)) = intake_rx.recv() => {
                pool.apply_client_event(id, event);
            }
            _ = retry.tick() => {
                pool.try_reconnect().await;
            }
        }
    }
    tracing::debug!("pool task exiting");
}

async fn dispatch(pool: &mut ServerPool, cmd: PoolCommand) {
    match cmd {
        PoolCommand::Add {
            hostname,
            session_token,
            allow_failure,
            reply,
        } => {
            let result = pool
                .add_with_token(&hostname, session_token, allow_failure)
                .await;
            let _ = reply.send(result);
        }
        PoolCommand::Remove { id, reply } => {
            let _ = reply.send(pool.remove(id));
        }
        PoolCommand::SetActive { id, reply } => {
            let _ = reply.send(pool.set_active(id));
        }
        PoolCommand::TryReconnect { reply } => {
            let _ = reply.send(pool.try_reconnect().await);
        }
        PoolCommand::RemoveFailed { hostname, reply } => {
            let _ = reply.send(pool.remove_failed(&hostname));
        }
        PoolCommand::Restore { reply } => {
            pool.restore().await;
            let _ = reply.send(());
        }
        PoolCommand::Snapshot { reply } => {
            let _ = reply.send(PoolSnapshot {
                servers: pool
                    .servers()
                    .iter()
                    .map(|e| (e.id, e.hostname.clone()))
                    .collect(),
                failed_hosts: pool.failed().iter().map(|f| f.hostname.clone()).collect(),
                active: pool.active_id(),
            });
        }
    }
}

impl PoolHandle {
    async fn request<T>(
        &self,
        cmd: PoolCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, PoolError> {
        self.cmd_tx.send(cmd).await.map_err(|_| PoolError::Closed)?;
        rx.await.map_err(|_| PoolError::Closed)
    }

    pub async fn add(&self, hostname: &str, allow_failure: bool) -> Result<AddOutcome, PoolError> {
        self.add_with_token(hostname, None, allow_failure).await
    }

    pub async fn add_with_token(
        &self,
        hostname: &str,
        session_token: Option<String>,
        allow_failure: bool,
    ) -> Result<AddOutcome, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            PoolCommand::Add {
                hostname: hostname.to_string(),
                session_token,
                allow_failure,
                reply: tx,
            },
            rx,
        )
        .await?
    }

    pub async fn remove(&self, id: ServerId) -> Result<(), PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(PoolCommand::Remove { id, reply: tx }, rx).await?
    }

    pub async fn set_active(&self, id: Option<ServerId>) -> Result<(), PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(PoolCommand::SetActive { id, reply: tx }, rx).await?
    }

    /// Retry the failed list now, without waiting for the timer.
    pub async fn try_reconnect(&self) -> Result<usize, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(PoolCommand::TryReconnect { reply: tx }, rx).await
    }

    pub async fn remove_failed(&self, hostname: &str) -> Result<bool, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            PoolCommand::RemoveFailed {
                hostname: hostname.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    /// Reconnect to the servers saved by a previous session.
    pub async fn restore(&self) -> Result<(), PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(PoolCommand::Restore { reply: tx }, rx).await
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.request(PoolCommand::Snapshot { reply: tx }, rx).await
    }
}
