//! Session registry and per-session actors.
//!
//! Every live session is owned by one spawned actor task holding the
//! authoritative state. Connections talk to it through an unbounded
//! mailbox, so applying a mutation, rebroadcasting it, and persisting the
//! snapshot happen strictly one update at a time; that serialization is
//! what gives every subscriber the same message order.
//!
//! The registry itself only holds `Weak` references. Connections share an
//! `Arc<SessionHandle>`; when the last one disconnects the mailbox closes,
//! the actor drains, removes its own registry entry, and the state is
//! gone. The next attach loads the snapshot from disk again.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::model::{Model, Update};
use crate::session::SessionCode;
use crate::storage::{self, Store, StoreError};

#[derive(Debug, Error)]
pub enum AttachError {
    #[error(transparent)]
    Load(#[from] StoreError),

    #[error("storage task failed")]
    Task(#[source] tokio::task::JoinError),
}

/// Tracks which sessions are currently resident in memory.
pub struct Registry<M: Model> {
    store: Arc<Store>,
    sessions: DashMap<SessionCode, Weak<SessionHandle<M>>>,
}

impl<M: Model> Registry<M> {
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        Arc::new(Self {
            store,
            sessions: DashMap::new(),
        })
    }

    /// Resolve a session, loading it from disk if it is not resident.
    ///
    /// The returned handle keeps the session alive; callers hold it for
    /// the lifetime of their connection. A session whose snapshot cannot
    /// be loaded is not registered at all.
    pub async fn attach(
        self: &Arc<Self>,
        code: &SessionCode,
    ) -> Result<Arc<SessionHandle<M>>, AttachError> {
        if let Some(handle) = self.lookup(code) {
            return Ok(handle);
        }

        // Not resident: load outside any map lock, then race to insert.
        let store = Arc::clone(&self.store);
        let load_code = code.clone();
        let state = tokio::task::spawn_blocking(move || store.load::<M>(&load_code))
            .await
            .map_err(AttachError::Task)??;

        match self.sessions.entry(code.clone()) {
            dashmap::Entry::Occupied(mut occupied) => {
                // Someone else finished loading first; their actor wins
                // and our freshly loaded state is discarded.
                if let Some(handle) = occupied.get().upgrade() {
                    return Ok(handle);
                }
                let handle = self.spawn_session(code.clone(), state);
                occupied.insert(Arc::downgrade(&handle));
                Ok(handle)
            }
            dashmap::Entry::Vacant(vacant) => {
                let handle = self.spawn_session(code.clone(), state);
                vacant.insert(Arc::downgrade(&handle));
                Ok(handle)
            }
        }
    }

    fn lookup(&self, code: &SessionCode) -> Option<Arc<SessionHandle<M>>> {
        self.sessions.get(code).and_then(|entry| entry.upgrade())
    }

    fn spawn_session(self: &Arc<Self>, code: SessionCode, state: M) -> Arc<SessionHandle<M>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle {
            code: code.clone(),
            tx,
        });
        let actor = SessionActor {
            code,
            state,
            subscribers: HashMap::new(),
            store: Arc::clone(&self.store),
            pending: None,
        };
        tokio::spawn(actor.run(rx, Arc::clone(self)));
        handle
    }

    /// Called by an actor on exit. Guarded so a newer actor registered
    /// under the same code is left alone.
    fn forget(&self, code: &SessionCode) {
        self.sessions
            .remove_if(code, |_, weak| weak.upgrade().is_none());
    }
}

/// Commands a connection can put in a session's mailbox.
enum SessionCmd<M: Model> {
    Subscribe {
        conn: Uuid,
        tx: UnboundedSender<Utf8Bytes>,
    },
    Update {
        from: Uuid,
        raw: Utf8Bytes,
        update: Update,
        mutation: M::Mutation,
    },
    Unsubscribe {
        conn: Uuid,
    },
}

/// Shared reference to a live session.
///
/// Connections hold it behind an `Arc`; dropping the last reference is
/// what triggers eviction.
pub struct SessionHandle<M: Model> {
    code: SessionCode,
    tx: UnboundedSender<SessionCmd<M>>,
}

impl<M: Model> SessionHandle<M> {
    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    /// Register a connection. Its first received frame is a full snapshot
    /// of the state at registration time.
    pub(crate) fn subscribe(&self, conn: Uuid, tx: UnboundedSender<Utf8Bytes>) {
        let _ = self.tx.send(SessionCmd::Subscribe { conn, tx });
    }

    /// Queue one decoded mutation together with the raw frame it arrived
    /// in. The raw frame is what gets rebroadcast, byte for byte.
    pub(crate) fn update(&self, from: Uuid, raw: Utf8Bytes, update: Update, mutation: M::Mutation) {
        let _ = self.tx.send(SessionCmd::Update {
            from,
            raw,
            update,
            mutation,
        });
    }

    pub(crate) fn unsubscribe(&self, conn: Uuid) {
        let _ = self.tx.send(SessionCmd::Unsubscribe { conn });
    }
}

struct SessionActor<M: Model> {
    code: SessionCode,
    state: M,
    subscribers: HashMap<Uuid, UnboundedSender<Utf8Bytes>>,
    store: Arc<Store>,
    /// Commit message of a save that failed, retried before the next
    /// update is accepted.
    pending: Option<String>,
}

impl<M: Model> SessionActor<M> {
    async fn run(mut self, mut rx: UnboundedReceiver<SessionCmd<M>>, registry: Arc<Registry<M>>) {
        tracing::info!(code = %self.code, "session loaded");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SessionCmd::Subscribe { conn, tx } => self.handle_subscribe(conn, tx),
                SessionCmd::Update {
                    from,
                    raw,
                    update,
                    mutation,
                } => self.handle_update(from, raw, update, mutation).await,
                SessionCmd::Unsubscribe { conn } => {
                    self.subscribers.remove(&conn);
                    tracing::debug!(code = %self.code, %conn, "subscriber detached");
                }
            }
        }
        registry.forget(&self.code);
        tracing::info!(code = %self.code, "session evicted");
    }

    fn handle_subscribe(&mut self, conn: Uuid, tx: UnboundedSender<Utf8Bytes>) {
        let snapshot = match serde_json::to_string(&self.state.save()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // Dropping the channel closes the connection.
                tracing::error!(code = %self.code, %conn, "cannot serialize snapshot: {err}");
                return;
            }
        };
        let _ = tx.send(snapshot.into());
        self.subscribers.insert(conn, tx);
        tracing::debug!(code = %self.code, %conn, "subscriber attached");
    }

    async fn handle_update(
        &mut self,
        from: Uuid,
        raw: Utf8Bytes,
        update: Update,
        mutation: M::Mutation,
    ) {
        // Updates from a connection that was already kicked are stale.
        if !self.subscribers.contains_key(&from) {
            return;
        }

        // A failed save gets one retry before any further update is
        // accepted; if it fails again the update is refused and the
        // sender disconnected.
        if let Some(message) = self.pending.clone() {
            match self.persist(&message).await {
                Ok(()) => {
                    self.pending = None;
                    tracing::info!(code = %self.code, "snapshot save recovered");
                }
                Err(err) => {
                    tracing::error!(code = %self.code, "snapshot save still failing: {err:#}");
                    self.subscribers.remove(&from);
                    return;
                }
            }
        }

        self.state.apply(&mutation);

        for tx in self.subscribers.values() {
            let _ = tx.send(raw.clone());
        }
        tracing::debug!(code = %self.code, name = %update.name, "update applied");

        let message = update.commit_message();
        if let Err(err) = self.persist(&message).await {
            tracing::error!(code = %self.code, "snapshot save failed: {err:#}");
            self.pending = Some(message);
        }
    }

    async fn persist(&self, message: &str) -> anyhow::Result<()> {
        let contents = storage::render_snapshot(&self.state)?;
        let store = Arc::clone(&self.store);
        let code = self.code.clone();
        let message = message.to_owned();
        tokio::task::spawn_blocking(move || store.save(&code, &contents, &message)).await??;
        Ok(())
    }
}
