pub mod client;

pub use client::{connect, ConnectError, SyncClient, SyncError};

// Client side of the sync protocol: a connected replica that sends
// mutations upstream and applies every server-ordered frame as it
// arrives, its own echoes included.
