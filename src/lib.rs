//! # Lockstep - Server-Ordered State Synchronization
//!
//! Keeps full replicas of small JSON-shaped states converged across any
//! number of WebSocket clients, without CRDTs or operational transforms.
//!
//! ## How it works
//!
//! - **One writer per session**: the server holds the authoritative copy
//!   and applies mutations strictly one at a time
//! - **Broadcast and echo**: every accepted mutation is rebroadcast to all
//!   subscribers, the sender included; clients apply frames only in the
//!   order the server emits them
//! - **Snapshot persistence**: after each mutation the full state is
//!   written as pretty-printed JSON and committed to a git repository, so
//!   session history is ordinary git history
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lockstep::{Document, DocumentMutation};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = lockstep::sync::connect::<Document>("ws://127.0.0.1:3000/pad").await?;
//!     client.mutate(&DocumentMutation::Set {
//!         key: "greeting".into(),
//!         value: "hello".into(),
//!     })?;
//!     client.wait_revision(1).await?;
//!     client.read(|doc| println!("{:?}", doc.get("greeting")));
//!     Ok(())
//! }
//! ```
//!
//! Custom state shapes implement [`Model`]; both the server and the client
//! agent are generic over it.

pub mod model;
pub mod server;
pub mod session;
pub mod storage;
pub mod sync;

// Re-export main types for library consumers
pub use model::{DecodeError, Document, DocumentMutation, Model, Update};
pub use server::{serve, serve_on, Registry, SessionHandle};
pub use session::SessionCode;
pub use storage::{Store, StoreError};
pub use sync::{connect, SyncClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
