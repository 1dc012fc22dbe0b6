//! Permission nodes and their per-tenant overrides.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default policy of a node when no explicit override applies.
///
/// Serialized as its numeric code (0 = Inherit, 1 = Allow, 2 = Block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PermDefault {
    #[default]
    Inherit,
    Allow,
    Block,
}

impl From<PermDefault> for u8 {
    fn from(p: PermDefault) -> u8 {
        match p {
            PermDefault::Inherit => 0,
            PermDefault::Allow => 1,
            PermDefault::Block => 2,
        }
    }
}

impl TryFrom<u8> for PermDefault {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PermDefault::Inherit),
            1 => Ok(PermDefault::Allow),
            2 => Ok(PermDefault::Block),
            other => Err(format!("invalid permission default: {other}")),
        }
    }
}

impl fmt::Display for PermDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PermDefault::Inherit => "inherit",
            PermDefault::Allow => "allow",
            PermDefault::Block => "block",
        })
    }
}

/// The kind of principal an override applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    User,
    Role,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrincipalKind::User => "user",
            PrincipalKind::Role => "role",
        })
    }
}

/// A single explicit override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perm {
    pub id: String,
    #[serde(rename = "y")]
    pub allowed: bool,
}

/// Overrides held by one node for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPerms {
    pub id: String,
    #[serde(rename = "userperms", default)]
    pub users: HashMap<String, Perm>,
    #[serde(rename = "roleperms", default)]
    pub roles: HashMap<String, Perm>,
}

impl GuildPerms {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            users: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    fn map(&self, kind: PrincipalKind) -> &HashMap<String, Perm> {
        match kind {
            PrincipalKind::User => &self.users,
            PrincipalKind::Role => &self.roles,
        }
    }

    fn map_mut(&mut self, kind: PrincipalKind) -> &mut HashMap<String, Perm> {
        match kind {
            PrincipalKind::User => &mut self.users,
            PrincipalKind::Role => &mut self.roles,
        }
    }

    /// Explicit value for a principal, if one is set.
    pub fn get(&self, kind: PrincipalKind, principal: &str) -> Option<bool> {
        self.map(kind).get(principal).map(|p| p.allowed)
    }

    pub fn set(&mut self, kind: PrincipalKind, principal: &str, allowed: bool) {
        self.map_mut(kind)
            .entry(principal.to_string())
            .and_modify(|p| p.allowed = allowed)
            .or_insert_with(|| Perm {
                id: principal.to_string(),
                allowed,
            });
    }

    /// Returns `true` if an override was removed.
    pub fn remove(&mut self, kind: PrincipalKind, principal: &str) -> bool {
        self.map_mut(kind).remove(principal).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.roles.is_empty()
    }
}

/// A node of the permission forest.
///
/// Each node owns its children outright and caches its dotted full name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermNode {
    name: String,
    #[serde(rename = "fullname")]
    full_name: String,
    #[serde(default)]
    children: BTreeMap<String, PermNode>,
    #[serde(rename = "guildperms", default)]
    guilds: HashMap<String, GuildPerms>,
    #[serde(rename = "permdefault", default)]
    default: PermDefault,
}

impl PermNode {
    /// A root node. Roots block unless told otherwise.
    pub(crate) fn root(name: &str) -> Self {
        Self::with_default(name.to_string(), name.to_string(), PermDefault::Block)
    }

    fn child_of(parent_full_name: &str, name: &str) -> Self {
        Self::with_default(
            name.to_string(),
            format!("{parent_full_name}.{name}"),
            PermDefault::Inherit,
        )
    }

    fn with_default(name: String, full_name: String, default: PermDefault) -> Self {
        Self {
            name,
            full_name,
            children: BTreeMap::new(),
            guilds: HashMap::new(),
            default,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn default_policy(&self) -> PermDefault {
        self.default
    }

    pub fn set_default_policy(&mut self, default: PermDefault) {
        self.default = default;
    }

    pub fn children(&self) -> impl Iterator<Item = &PermNode> {
        self.children.values()
    }

    pub fn child(&self, name: &str) -> Option<&PermNode> {
        self.children.get(name)
    }

    pub fn guild(&self, tenant: &str) -> Option<&GuildPerms> {
        self.guilds.get(tenant)
    }

    /// Walk (creating as needed) down `segments` below this node.
    pub fn get_or_create_descendant(&mut self, segments: &[&str]) -> &mut PermNode {
        let Some((first, rest)) = segments.split_first() else {
            return self;
        };
        let parent = &self.full_name;
        let child = self.children.entry(first.to_string()).or_insert_with(|| {
            let child = PermNode::child_of(parent, first);
            debug!(node = %child.full_name, "added permission node");
            child
        });
        child.get_or_create_descendant(rest)
    }

    pub fn descendant(&self, segments: &[&str]) -> Option<&PermNode> {
        match segments.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get(*first)?.descendant(rest),
        }
    }

    pub fn descendant_mut(&mut self, segments: &[&str]) -> Option<&mut PermNode> {
        match segments.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get_mut(*first)?.descendant_mut(rest),
        }
    }

    /// Explicit override for a principal in a tenant at this exact node.
    pub fn explicit(&self, tenant: &str, kind: PrincipalKind, principal: &str) -> Option<bool> {
        self.guilds.get(tenant)?.get(kind, principal)
    }

    pub fn set_override(&mut self, tenant: &str, kind: PrincipalKind, principal: &str, allowed: bool) {
        self.guilds
            .entry(tenant.to_string())
            .or_insert_with(|| GuildPerms::new(tenant))
            .set(kind, principal, allowed);
    }

    /// Returns `true` if an override was removed.
    pub fn remove_override(&mut self, tenant: &str, kind: PrincipalKind, principal: &str) -> bool {
        let Some(guild) = self.guilds.get_mut(tenant) else {
            return false;
        };
        let removed = guild.remove(kind, principal);
        if guild.is_empty() {
            self.guilds.remove(tenant);
        }
        removed
    }

    /// Push this node and all of its descendants onto `out`.
    pub fn collect<'a>(&'a self, out: &mut Vec<&'a PermNode>) {
        out.push(self);
        for child in self.children.values() {
            child.collect(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_codes_round_trip() {
        for (p, code) in [
            (PermDefault::Inherit, 0u8),
            (PermDefault::Allow, 1),
            (PermDefault::Block, 2),
        ] {
            assert_eq!(serde_json::to_string(&p).unwrap(), code.to_string());
            assert_eq!(serde_json::from_str::<PermDefault>(&code.to_string()).unwrap(), p);
        }
        assert!(serde_json::from_str::<PermDefault>("3").is_err());
    }

    #[test]
    fn children_inherit_and_extend_full_name() {
        let mut root = PermNode::root("r");
        let leaf = root.get_or_create_descendant(&["a", "b"]);
        assert_eq!(leaf.full_name(), "r.a.b");
        assert_eq!(leaf.default_policy(), PermDefault::Inherit);
        assert_eq!(root.default_policy(), PermDefault::Block);
        assert_eq!(root.child("a").unwrap().full_name(), "r.a");
    }

    #[test]
    fn override_set_overwrite_remove() {
        let mut node = PermNode::root("r");
        node.set_override("g1", PrincipalKind::User, "u1", true);
        assert_eq!(node.explicit("g1", PrincipalKind::User, "u1"), Some(true));
        node.set_override("g1", PrincipalKind::User, "u1", false);
        assert_eq!(node.explicit("g1", PrincipalKind::User, "u1"), Some(false));
        assert_eq!(node.explicit("g1", PrincipalKind::Role, "u1"), None);
        assert_eq!(node.explicit("g2", PrincipalKind::User, "u1"), None);

        assert!(node.remove_override("g1", PrincipalKind::User, "u1"));
        assert!(!node.remove_override("g1", PrincipalKind::User, "u1"));
        assert!(node.guild("g1").is_none());
    }
}
