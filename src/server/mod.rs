pub mod api;
pub mod registry;

pub use api::{serve, serve_on};
pub use registry::{AttachError, Registry, SessionHandle};
