//! Command authorization against the shared permission tree.

use tokio::sync::RwLock;
use tracing::{debug, info};

use mcbridge_core::{BridgeResult, GuildPerms, PermCheck, PermDefault, PermissionTree, PrincipalKind};

/// Root of every permission this bot registers.
pub const ROOT: &str = "mcbridge";
/// Parent of local bot commands.
pub const COMMAND_ROOT: &str = "mcbridge.command";
/// Parent of commands forwarded to game servers.
pub const SERVER_COMMAND_ROOT: &str = "mcbridge.server.command";

pub fn command_path(name: &str) -> String {
    format!("{COMMAND_ROOT}.{name}")
}

pub fn server_command_path(verb: &str) -> String {
    format!("{SERVER_COMMAND_ROOT}.{verb}")
}

/// Gatekeeper for command execution.
///
/// Reads share the lock; registration and override edits take it exclusively.
#[derive(Debug)]
pub struct Authorizer {
    tree: RwLock<PermissionTree>,
}

impl Authorizer {
    /// Wrap a loaded tree, making sure the bot's own subtrees exist.
    pub fn new(mut tree: PermissionTree) -> BridgeResult<Self> {
        tree.get_or_create_path(COMMAND_ROOT)?;
        tree.get_or_create_path(SERVER_COMMAND_ROOT)?;
        Ok(Self {
            tree: RwLock::new(tree),
        })
    }

    /// Decide whether `user` (with `roles`, in priority order) may run the
    /// command at `path` in `tenant`. Denial is `Err(PermissionDenied)`.
    pub async fn authorize(&self, path: &str, tenant: &str, user: &str, roles: &[String]) -> BridgeResult<PermCheck> {
        let result = self.tree.read().await.is_command_allowed(path, tenant, user, roles);
        match &result {
            Ok(check) => debug!(path, tenant, user, decided_at = %check.path, explicit = check.explicit, "authorized"),
            Err(e) => info!(path, tenant, user, error = %e, "authorization refused"),
        }
        result
    }

    /// Create `path` if needed and set its default.
    pub async fn register_command_path(&self, path: &str, default: PermDefault) -> BridgeResult<()> {
        self.tree.write().await.register_command_path(path, default)?;
        Ok(())
    }

    /// Create `path` if needed, leaving an existing node's default alone.
    pub async fn ensure_path(&self, path: &str) -> BridgeResult<()> {
        self.tree.write().await.get_or_create_path(path)?;
        Ok(())
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.tree.read().await.lookup(path).is_ok()
    }

    pub async fn set_override(
        &self,
        path: &str,
        tenant: &str,
        kind: PrincipalKind,
        principal: &str,
        allowed: bool,
    ) -> BridgeResult<()> {
        self.tree.write().await.set_override(path, tenant, kind, principal, allowed)
    }

    pub async fn remove_override(
        &self,
        path: &str,
        tenant: &str,
        kind: PrincipalKind,
        principal: &str,
    ) -> BridgeResult<bool> {
        self.tree.write().await.remove_override(path, tenant, kind, principal)
    }

    pub async fn guild_overrides(&self, path: &str, tenant: &str) -> BridgeResult<Option<GuildPerms>> {
        self.tree.read().await.guild_overrides(path, tenant)
    }

    pub async fn all_paths(&self) -> Vec<String> {
        self.tree.read().await.all_paths()
    }

    /// Copy of the tree for persistence.
    pub async fn snapshot(&self) -> PermissionTree {
        self.tree.read().await.clone()
    }
}
