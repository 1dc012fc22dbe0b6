//! Hierarchical permission tree.
//!
//! Permissions are dotted paths (`mcbridge.command.ls`) forming a forest of
//! [`PermNode`]s. Every node carries a default policy and, per tenant
//! (guild), explicit allow/block overrides for individual users and roles.
//!
//! # Resolution
//!
//! A query walks from the queried node up to its root:
//!
//! | Found at a node                      | Effect                                 |
//! |--------------------------------------|----------------------------------------|
//! | explicit override for the principal  | returned immediately (deepest wins)    |
//! | `Allow` / `Block` default            | remembered if nothing deeper was       |
//! | `Inherit` default                    | ignored                                |
//!
//! With no explicit override anywhere on the path, the remembered (deepest)
//! default decides. Roots are created with `Block`, so every registered path
//! resolves to some decision.

mod node;
mod tree;

pub use node::{GuildPerms, Perm, PermDefault, PermNode, PrincipalKind};
pub use tree::{PermCheck, PermissionTree};
