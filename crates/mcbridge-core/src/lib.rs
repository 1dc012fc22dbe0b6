//! mcbridge-core: Shared protocol library for the chat ⇄ game-server bridge.
//!
//! Provides the JSON envelope codec and typed handler router, endpoint
//! identity parsing, the hierarchical permission tree, and the error type
//! shared by every mcbridge crate.

pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod perms;

// Re-export commonly used items at crate root.
pub use endpoint::{Endpoint, EndpointRecord};
pub use envelope::{ChatMessage, Envelope, EnvelopeKind, EnvelopeRouter, RemoteCommand, ServerStatus};
pub use error::{BridgeError, BridgeResult};
pub use perms::{GuildPerms, Perm, PermCheck, PermDefault, PermNode, PermissionTree, PrincipalKind};
