//! Connection-keyed session storage
//!
//! - [`SessionStore`]: explicit get / put / remove / clear interface over
//!   process-lifetime keyed state
//! - [`InMemorySessionStore`]: lock-guarded map implementation
//! - [`ConnectionRegistry`]: live stream handlers by connection id

mod registry;
mod store;

pub use registry::ConnectionRegistry;
pub use store::{InMemorySessionStore, SessionStore};
