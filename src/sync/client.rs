//! Client agent.
//!
//! Holds a full replica of one session and keeps it converged with the
//! server. The agent never applies its own mutations locally: `mutate`
//! only sends, and the replica changes exclusively when a frame arrives
//! from the server, the agent's own frames included. Ordering is therefore
//! the server's alone, and a replica can never diverge by racing its own
//! edits against remote ones.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::model::{Model, Update};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid ws url: {0}")]
    Url(#[from] url::ParseError),

    /// Covers refused sessions too: a server that does not know the
    /// session code rejects the upgrade with an HTTP error.
    #[error(transparent)]
    Transport(#[from] tungstenite::Error),

    #[error("connection closed before the snapshot arrived")]
    NoSnapshot,

    #[error("unreadable snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection closed")]
    Closed,

    #[error("cannot encode mutation: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Connected replica of one session.
///
/// `revision` counts frames applied since the snapshot, so callers can
/// wait for their own mutation's echo (or anyone else's) deterministically
/// instead of sleeping.
pub struct SyncClient<M: Model> {
    state: Arc<Mutex<M>>,
    out: mpsc::UnboundedSender<Message>,
    revision: watch::Receiver<u64>,
}

/// Connect to `ws://host:port/<code>` and wait for the initial snapshot.
pub async fn connect<M: Model>(url: &str) -> Result<SyncClient<M>, ConnectError> {
    let url = Url::parse(url)?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // The first text frame is always the full snapshot.
    let first = loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_)))
            | Some(Ok(Message::Pong(_)))
            | Some(Ok(Message::Frame(_))) => continue,
            Some(Ok(_)) | None => return Err(ConnectError::NoSnapshot),
            Some(Err(err)) => return Err(ConnectError::Transport(err)),
        }
    };
    let snapshot: M::Snapshot = serde_json::from_str(first.as_str())?;
    let state = Arc::new(Mutex::new(M::load(snapshot)));

    let (out, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (revision_tx, revision) = watch::channel(0u64);

    // Outgoing mutations.
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Incoming frames; every one of them mutates the replica.
    let reader_state = state.clone();
    tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(err) = apply_frame::<M>(&reader_state, text.as_str()) {
                        tracing::warn!("dropping connection on unreadable frame: {err:#}");
                        break;
                    }
                    revision_tx.send_modify(|r| *r += 1);
                }
                Ok(Message::Binary(_)) => {
                    tracing::warn!("dropping connection on unexpected binary frame");
                    break;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(_) => break,
            }
        }
        // revision_tx drops here, which is how the handle learns the
        // connection is gone.
    });

    Ok(SyncClient {
        state,
        out,
        revision,
    })
}

fn apply_frame<M: Model>(state: &Mutex<M>, text: &str) -> anyhow::Result<()> {
    let update: Update = serde_json::from_str(text)?;
    let mutation = M::decode(&update)?;
    state.lock().apply(&mutation);
    Ok(())
}

impl<M: Model> SyncClient<M> {
    /// Send one mutation to the server. The replica is untouched until
    /// the server echoes the mutation back.
    pub fn mutate(&self, mutation: &M::Mutation) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let text = serde_json::to_string(&M::encode(mutation))?;
        self.out
            .send(Message::Text(text.into()))
            .map_err(|_| SyncError::Closed)
    }

    /// Run a closure against the replica.
    pub fn read<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.state.lock())
    }

    /// Snapshot of the replica as it stands right now.
    pub fn snapshot(&self) -> M::Snapshot {
        self.state.lock().save()
    }

    /// Frames applied since the initial snapshot.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Wait until at least `revision` frames have been applied and return
    /// the actual count.
    pub async fn wait_revision(&self, revision: u64) -> Result<u64, SyncError> {
        let mut rx = self.revision.clone();
        loop {
            let current = *rx.borrow_and_update();
            if current >= revision {
                return Ok(current);
            }
            rx.changed().await.map_err(|_| SyncError::Closed)?;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.revision.has_changed().is_err()
    }
}
