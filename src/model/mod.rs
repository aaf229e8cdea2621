//! State models.
//!
//! A [`Model`] describes a session's state shape: how a fresh session
//! starts, how state round-trips through a JSON snapshot, and which named
//! mutations it accepts. The server and the client agent are both generic
//! over it, so the same model type drives the authoritative copy and every
//! replica.

mod document;
mod update;

pub use document::{Document, DocumentMutation};
pub use update::{DecodeError, Update};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A replicable state shape.
///
/// Convergence rests on two properties every implementation must uphold:
///
/// * `load(save(&state))` reproduces `state` exactly, and
/// * `apply` is deterministic, so replicas that apply the same mutations in
///   the same order from the same snapshot end up identical.
///
/// `decode` runs at the wire boundary before a mutation ever reaches a
/// session, which keeps unknown names and malformed arguments out of the
/// ordered stream entirely.
pub trait Model: Sized + Send + Sync + 'static {
    /// Serialized form of the full state. Stored pretty-printed on disk
    /// and sent compact as the first frame of every connection.
    type Snapshot: Serialize + DeserializeOwned + Send;

    /// Typed form of one mutation.
    type Mutation: Send + 'static;

    /// State of a freshly provisioned session.
    fn init() -> Self;

    /// Capture the full current state.
    fn save(&self) -> Self::Snapshot;

    /// Reconstruct state from a snapshot.
    fn load(snapshot: Self::Snapshot) -> Self;

    /// Turn a wire update into a typed mutation.
    fn decode(update: &Update) -> Result<Self::Mutation, DecodeError>;

    /// Turn a typed mutation back into its wire form.
    fn encode(mutation: &Self::Mutation) -> Update;

    /// Apply one mutation in place.
    fn apply(&mut self, mutation: &Self::Mutation);
}
