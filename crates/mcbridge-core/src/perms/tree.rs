//! The permission forest and its resolution rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::node::{GuildPerms, PermDefault, PermNode, PrincipalKind};
use crate::error::{BridgeError, BridgeResult};

/// Outcome of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermCheck {
    pub allowed: bool,
    /// Full name of the node whose value decided.
    pub path: String,
    /// Whether the decision came from an explicit override.
    pub explicit: bool,
}

/// Forest of permission roots, serialized as `{"roots": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTree {
    #[serde(default)]
    roots: BTreeMap<String, PermNode>,
}

fn split_path(path: &str) -> BridgeResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(BridgeError::PermNotFound(format!("invalid path '{path}'")));
    }
    Ok(segments)
}

impl PermissionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roots(&self) -> impl Iterator<Item = &PermNode> {
        self.roots.values()
    }

    pub fn root(&self, name: &str) -> Option<&PermNode> {
        self.roots.get(name)
    }

    /// Fetch a root, creating it with a `Block` default if absent.
    pub fn get_or_create_root(&mut self, name: &str) -> &mut PermNode {
        self.roots.entry(name.to_string()).or_insert_with(|| {
            debug!(root = name, "added permission root");
            PermNode::root(name)
        })
    }

    /// Fetch the node at `path`, creating missing segments.
    ///
    /// The first segment is created as a root (`Block`); everything below it
    /// is created with `Inherit`.
    pub fn get_or_create_path(&mut self, path: &str) -> BridgeResult<&mut PermNode> {
        let segments = split_path(path)?;
        let (root, rest) = segments
            .split_first()
            .ok_or_else(|| BridgeError::PermNotFound(path.to_string()))?;
        Ok(self.get_or_create_root(root).get_or_create_descendant(rest))
    }

    /// Create `path` if needed and set its default policy.
    pub fn register_command_path(&mut self, path: &str, default: PermDefault) -> BridgeResult<&mut PermNode> {
        let node = self.get_or_create_path(path)?;
        node.set_default_policy(default);
        Ok(node)
    }

    fn find(&self, segments: &[&str]) -> Option<&PermNode> {
        let (root, rest) = segments.split_first()?;
        self.roots.get(*root)?.descendant(rest)
    }

    /// Pure lookup; never creates.
    pub fn lookup(&self, path: &str) -> BridgeResult<&PermNode> {
        let segments = split_path(path)?;
        self.find(&segments)
            .ok_or_else(|| BridgeError::PermNotFound(path.to_string()))
    }

    pub fn lookup_mut(&mut self, path: &str) -> BridgeResult<&mut PermNode> {
        let segments = split_path(path)?;
        let (root, rest) = segments
            .split_first()
            .ok_or_else(|| BridgeError::PermNotFound(path.to_string()))?;
        self.roots
            .get_mut(*root)
            .and_then(|r| r.descendant_mut(rest))
            .ok_or_else(|| BridgeError::PermNotFound(path.to_string()))
    }

    pub fn set_default(&mut self, path: &str, default: PermDefault) -> BridgeResult<()> {
        self.lookup_mut(path)?.set_default_policy(default);
        Ok(())
    }

    /// Set or overwrite an explicit override on an existing node.
    pub fn set_override(
        &mut self,
        path: &str,
        tenant: &str,
        kind: PrincipalKind,
        principal: &str,
        allowed: bool,
    ) -> BridgeResult<()> {
        self.lookup_mut(path)?
            .set_override(tenant, kind, principal, allowed);
        debug!(path, tenant, %kind, principal, allowed, "permission override set");
        Ok(())
    }

    /// Remove an explicit override. Returns whether one existed.
    pub fn remove_override(
        &mut self,
        path: &str,
        tenant: &str,
        kind: PrincipalKind,
        principal: &str,
    ) -> BridgeResult<bool> {
        let removed = self
            .lookup_mut(path)?
            .remove_override(tenant, kind, principal);
        debug!(path, tenant, %kind, principal, removed, "permission override removed");
        Ok(removed)
    }

    /// Overrides recorded at exactly `path` for a tenant.
    pub fn guild_overrides(&self, path: &str, tenant: &str) -> BridgeResult<Option<GuildPerms>> {
        Ok(self.lookup(path)?.guild(tenant).cloned())
    }

    /// Every node's full name, sorted.
    pub fn all_paths(&self) -> Vec<String> {
        let mut nodes = Vec::new();
        for root in self.roots.values() {
            root.collect(&mut nodes);
        }
        let mut paths: Vec<String> = nodes.iter().map(|n| n.full_name().to_string()).collect();
        paths.sort();
        paths
    }

    /// Resolve a single principal against `path`.
    ///
    /// Walks from the deepest node to the root. The first explicit override
    /// found wins; otherwise the deepest non-`Inherit` default decides.
    /// Every prefix of `path` must exist.
    pub fn is_principal_allowed(
        &self,
        path: &str,
        tenant: &str,
        kind: PrincipalKind,
        principal: &str,
    ) -> BridgeResult<PermCheck> {
        let segments = split_path(path)?;
        let mut implicit: Option<PermCheck> = None;

        for depth in (1..=segments.len()).rev() {
            let prefix = &segments[..depth];
            let node = self
                .find(prefix)
                .ok_or_else(|| BridgeError::PermNotFound(prefix.join(".")))?;

            if let Some(allowed) = node.explicit(tenant, kind, principal) {
                trace!(node = node.full_name(), %kind, principal, allowed, "explicit override");
                return Ok(PermCheck {
                    allowed,
                    path: node.full_name().to_string(),
                    explicit: true,
                });
            }

            if implicit.is_none() {
                let allowed = match node.default_policy() {
                    PermDefault::Allow => Some(true),
                    PermDefault::Block => Some(false),
                    PermDefault::Inherit => None,
                };
                if let Some(allowed) = allowed {
                    trace!(node = node.full_name(), allowed, "implicit default");
                    implicit = Some(PermCheck {
                        allowed,
                        path: node.full_name().to_string(),
                        explicit: false,
                    });
                }
            }
        }

        Ok(implicit.unwrap_or_else(|| PermCheck {
            allowed: false,
            path: path.to_string(),
            explicit: false,
        }))
    }

    /// Combine a user's result with its roles' results.
    ///
    /// An explicit user result is final. Otherwise roles are scanned in the
    /// given order and the scan stops at the first role with an explicit
    /// result, which then decides. Failing that, an implicit allow (user
    /// first, then the first implicitly allowed role) grants access.
    ///
    /// Returns the deciding check; `allowed == false` is a denial.
    pub fn resolve_command<S: AsRef<str>>(
        &self,
        path: &str,
        tenant: &str,
        user: &str,
        roles: &[S],
    ) -> BridgeResult<PermCheck> {
        self.evaluate(path, tenant, user, roles).map(|(check, _)| check)
    }

    /// Like [`resolve_command`](Self::resolve_command), but a denial is
    /// returned as [`BridgeError::PermissionDenied`].
    pub fn is_command_allowed<S: AsRef<str>>(
        &self,
        path: &str,
        tenant: &str,
        user: &str,
        roles: &[S],
    ) -> BridgeResult<PermCheck> {
        match self.evaluate(path, tenant, user, roles)? {
            (check, None) => Ok(check),
            (check, Some(reason)) => Err(BridgeError::PermissionDenied {
                path: check.path,
                explicit: check.explicit,
                reason,
            }),
        }
    }

    fn evaluate<S: AsRef<str>>(
        &self,
        path: &str,
        tenant: &str,
        user: &str,
        roles: &[S],
    ) -> BridgeResult<(PermCheck, Option<String>)> {
        let user_check = self.is_principal_allowed(path, tenant, PrincipalKind::User, user)?;

        if user_check.explicit {
            return Ok(if user_check.allowed {
                (user_check, None)
            } else {
                let reason = format!("user {user} is explicitly disallowed");
                (user_check, Some(reason))
            });
        }

        let mut implicit_role: Option<PermCheck> = None;
        let mut explicit_role: Option<(PermCheck, &str)> = None;
        for role in roles {
            let role = role.as_ref();
            let check = self.is_principal_allowed(path, tenant, PrincipalKind::Role, role)?;
            if check.explicit {
                explicit_role = Some((check, role));
                break;
            }
            if implicit_role.is_none() && check.allowed {
                implicit_role = Some(check);
            }
        }

        if let Some((check, role)) = explicit_role {
            return Ok(if check.allowed {
                (check, None)
            } else {
                let reason = format!("role {role} is disallowed");
                (check, Some(reason))
            });
        }

        if user_check.allowed {
            debug!(path = %user_check.path, user, "implicitly allowed user");
            return Ok((user_check, None));
        }

        if let Some(check) = implicit_role {
            debug!(path = %check.path, user, "implicitly allowed by role");
            return Ok((check, None));
        }

        Ok((user_check, Some("no allowed path found".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "guild";

    fn tree_with_cmd() -> PermissionTree {
        let mut tree = PermissionTree::new();
        tree.get_or_create_root("r");
        tree.register_command_path("r.cmd", PermDefault::Allow).unwrap();
        tree
    }

    #[test]
    fn get_or_create_path_is_idempotent() {
        let mut tree = PermissionTree::new();
        let first = tree.get_or_create_path("a.b.c").unwrap() as *const PermNode;
        let second = tree.get_or_create_path("a.b.c").unwrap() as *const PermNode;
        assert_eq!(first, second);
        assert_eq!(tree.all_paths(), vec!["a", "a.b", "a.b.c"]);
        assert_eq!(tree.lookup("a.b.c").unwrap().full_name(), "a.b.c");
    }

    #[test]
    fn lookup_never_creates() {
        let tree = PermissionTree::new();
        assert!(matches!(tree.lookup("x.y"), Err(BridgeError::PermNotFound(_))));
        assert!(tree.all_paths().is_empty());
        assert!(tree.lookup("x..y").is_err());
    }

    #[test]
    fn bare_root_blocks() {
        let mut tree = PermissionTree::new();
        tree.get_or_create_root("r");
        let check = tree
            .is_principal_allowed("r", G, PrincipalKind::User, "anyone")
            .unwrap();
        assert_eq!(
            check,
            PermCheck {
                allowed: false,
                path: "r".into(),
                explicit: false
            }
        );
    }

    #[test]
    fn child_allow_default_wins_over_root_block() {
        let tree = tree_with_cmd();
        let check = tree
            .is_command_allowed::<&str>("r.cmd", G, "user", &[])
            .unwrap();
        assert_eq!(
            check,
            PermCheck {
                allowed: true,
                path: "r.cmd".into(),
                explicit: false
            }
        );
    }

    #[test]
    fn inherit_falls_through_to_nearest_default() {
        let mut tree = tree_with_cmd();
        tree.get_or_create_path("r.cmd.sub.leaf").unwrap();
        let check = tree
            .is_principal_allowed("r.cmd.sub.leaf", G, PrincipalKind::User, "u")
            .unwrap();
        assert!(check.allowed);
        assert_eq!(check.path, "r.cmd");
    }

    #[test]
    fn explicit_user_block_beats_allow_defaults() {
        let mut tree = tree_with_cmd();
        tree.set_default("r", PermDefault::Allow).unwrap();
        tree.set_override("r.cmd", G, PrincipalKind::User, "u", false)
            .unwrap();

        let check = tree.resolve_command::<&str>("r.cmd", G, "u", &[]).unwrap();
        assert!(!check.allowed);
        assert!(check.explicit);
        assert_eq!(check.path, "r.cmd");

        match tree.is_command_allowed::<&str>("r.cmd", G, "u", &[]) {
            Err(BridgeError::PermissionDenied { path, explicit, .. }) => {
                assert_eq!(path, "r.cmd");
                assert!(explicit);
            }
            other => panic!("expected denial, got {other:?}"),
        }

        // Other users and other tenants are unaffected.
        assert!(tree.is_command_allowed::<&str>("r.cmd", G, "v", &[]).is_ok());
        assert!(tree.is_command_allowed::<&str>("r.cmd", "other", "u", &[]).is_ok());
    }

    #[test]
    fn explicit_ancestor_beats_deeper_implicit() {
        let mut tree = tree_with_cmd();
        tree.set_override("r", G, PrincipalKind::User, "u", false)
            .unwrap();
        let check = tree
            .is_principal_allowed("r.cmd", G, PrincipalKind::User, "u")
            .unwrap();
        assert_eq!(
            check,
            PermCheck {
                allowed: false,
                path: "r".into(),
                explicit: true
            }
        );
    }

    #[test]
    fn deepest_explicit_wins() {
        let mut tree = tree_with_cmd();
        tree.set_override("r", G, PrincipalKind::User, "u", false)
            .unwrap();
        tree.set_override("r.cmd", G, PrincipalKind::User, "u", true)
            .unwrap();
        let check = tree
            .is_principal_allowed("r.cmd", G, PrincipalKind::User, "u")
            .unwrap();
        assert!(check.allowed && check.explicit);
        assert_eq!(check.path, "r.cmd");
    }

    #[test]
    fn first_explicit_role_stops_the_scan() {
        let mut tree = PermissionTree::new();
        tree.get_or_create_path("r.cmd").unwrap();
        // Role A: explicit allow at the root. Role B: explicit block deeper.
        tree.set_override("r", G, PrincipalKind::Role, "A", true).unwrap();
        tree.set_override("r.cmd", G, PrincipalKind::Role, "B", false)
            .unwrap();

        let check = tree
            .is_command_allowed("r.cmd", G, "u", &["A", "B"])
            .unwrap();
        assert_eq!(
            check,
            PermCheck {
                allowed: true,
                path: "r".into(),
                explicit: true
            }
        );

        // Reversed order: B is consulted first and its block decides.
        let err = tree
            .is_command_allowed("r.cmd", G, "u", &["B", "A"])
            .unwrap_err();
        assert!(err.is_denial());
    }

    #[test]
    fn explicit_user_result_skips_roles() {
        let mut tree = PermissionTree::new();
        tree.get_or_create_path("r.cmd").unwrap();
        tree.set_override("r.cmd", G, PrincipalKind::User, "u", true)
            .unwrap();
        tree.set_override("r.cmd", G, PrincipalKind::Role, "A", false)
            .unwrap();
        assert!(tree.is_command_allowed("r.cmd", G, "u", &["A"]).is_ok());
    }

    #[test]
    fn no_allow_anywhere_denies_implicitly() {
        let mut tree = PermissionTree::new();
        tree.get_or_create_path("r.cmd").unwrap();
        match tree.is_command_allowed("r.cmd", G, "u", &["A"]) {
            Err(BridgeError::PermissionDenied { path, explicit, .. }) => {
                assert_eq!(path, "r");
                assert!(!explicit);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn missing_node_is_lookup_error() {
        let mut tree = tree_with_cmd();
        let err = tree
            .is_command_allowed::<&str>("r.cmd.missing", G, "u", &[])
            .unwrap_err();
        assert!(matches!(err, BridgeError::PermNotFound(p) if p == "r.cmd.missing"));
        assert!(tree
            .set_override("nope", G, PrincipalKind::User, "u", true)
            .is_err());
    }

    #[test]
    fn remove_override_restores_default() {
        let mut tree = tree_with_cmd();
        tree.set_override("r.cmd", G, PrincipalKind::Role, "A", false)
            .unwrap();
        assert!(tree.is_command_allowed("r.cmd", G, "u", &["A"]).is_err());
        assert!(tree
            .remove_override("r.cmd", G, PrincipalKind::Role, "A")
            .unwrap());
        assert!(tree.is_command_allowed("r.cmd", G, "u", &["A"]).is_ok());
        assert!(tree.guild_overrides("r.cmd", G).unwrap().is_none());
    }

    #[test]
    fn snapshot_shape_and_reload() {
        let mut tree = tree_with_cmd();
        tree.set_override("r.cmd", G, PrincipalKind::User, "u", true)
            .unwrap();

        let json = serde_json::to_value(&tree).unwrap();
        let cmd = &json["roots"]["r"]["children"]["cmd"];
        assert_eq!(json["roots"]["r"]["permdefault"], 2);
        assert_eq!(cmd["fullname"], "r.cmd");
        assert_eq!(cmd["permdefault"], 1);
        assert_eq!(cmd["guildperms"][G]["id"], G);
        assert_eq!(cmd["guildperms"][G]["userperms"]["u"], serde_json::json!({"id": "u", "y": true}));

        let reloaded: PermissionTree = serde_json::from_value(json).unwrap();
        assert_eq!(reloaded, tree);
    }
}
