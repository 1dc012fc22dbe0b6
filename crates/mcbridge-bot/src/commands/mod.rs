//! Local bot commands.
//!
//! Every command has a permission node at `mcbridge.command.<name>`. All of
//! them default to Allow except the ones that edit overrides, which default
//! to Block so that only explicitly granted principals can change policy.

mod perms;
mod servers;

use mcbridge_core::{BridgeResult, PermDefault};

use crate::platform::IncomingMessage;
use crate::relay::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCommand {
    Commands,
    ServerCommands,
    SetChannel,
    Ls,
    As,
    Rm,
    Rename,
    Status,
    Perms,
    PermNode,
    PermUser,
    PermRole,
    UnpermUser,
    UnpermRole,
}

impl LocalCommand {
    pub const ALL: [LocalCommand; 14] = [
        LocalCommand::Commands,
        LocalCommand::ServerCommands,
        LocalCommand::SetChannel,
        LocalCommand::Ls,
        LocalCommand::As,
        LocalCommand::Rm,
        LocalCommand::Rename,
        LocalCommand::Status,
        LocalCommand::Perms,
        LocalCommand::PermNode,
        LocalCommand::PermUser,
        LocalCommand::PermRole,
        LocalCommand::UnpermUser,
        LocalCommand::UnpermRole,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LocalCommand::Commands => "commands",
            LocalCommand::ServerCommands => "servercommands",
            LocalCommand::SetChannel => "setchannel",
            LocalCommand::Ls => "ls",
            LocalCommand::As => "as",
            LocalCommand::Rm => "rm",
            LocalCommand::Rename => "rename",
            LocalCommand::Status => "status",
            LocalCommand::Perms => "perms",
            LocalCommand::PermNode => "permnode",
            LocalCommand::PermUser => "permuser",
            LocalCommand::PermRole => "permrole",
            LocalCommand::UnpermUser => "unpermuser",
            LocalCommand::UnpermRole => "unpermrole",
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            LocalCommand::Commands => "commands",
            LocalCommand::ServerCommands => "servercommands",
            LocalCommand::SetChannel => "setchannel",
            LocalCommand::Ls => "ls",
            LocalCommand::As => "as <ip:port> <name>",
            LocalCommand::Rm => "rm <ip:port|name>",
            LocalCommand::Rename => "rename <ip:port|name> <new name>",
            LocalCommand::Status => "status <ip:port|name>",
            LocalCommand::Perms => "perms [prefix]",
            LocalCommand::PermNode => "permnode <path>",
            LocalCommand::PermUser => "permuser <path> <@user> yes|no",
            LocalCommand::PermRole => "permrole <path> <@&role|role name> yes|no",
            LocalCommand::UnpermUser => "unpermuser <path> <@user>",
            LocalCommand::UnpermRole => "unpermrole <path> <@&role|role name>",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            LocalCommand::Commands => "List bot commands.",
            LocalCommand::ServerCommands => "List known server commands.",
            LocalCommand::SetChannel => "Relay chat through this channel.",
            LocalCommand::Ls => "List registered servers.",
            LocalCommand::As => "Add a server.",
            LocalCommand::Rm => "Remove a server.",
            LocalCommand::Rename => "Rename a server.",
            LocalCommand::Status => "Show the last status a server reported.",
            LocalCommand::Perms => "List permission nodes.",
            LocalCommand::PermNode => "Show overrides at a permission node.",
            LocalCommand::PermUser => "Allow or block a user at a node.",
            LocalCommand::PermRole => "Allow or block a role at a node.",
            LocalCommand::UnpermUser => "Remove a user's override at a node.",
            LocalCommand::UnpermRole => "Remove a role's override at a node.",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Default policy of the command's permission node.
    pub fn default_policy(self) -> PermDefault {
        match self {
            LocalCommand::PermUser
            | LocalCommand::PermRole
            | LocalCommand::UnpermUser
            | LocalCommand::UnpermRole => PermDefault::Block,
            _ => PermDefault::Allow,
        }
    }

    /// Commands that only run in the relay channel.
    pub fn channel_bound(self) -> bool {
        matches!(
            self,
            LocalCommand::Ls | LocalCommand::As | LocalCommand::Rm | LocalCommand::Rename
        )
    }
}

/// A command the bridge knows game servers understand.
#[derive(Debug, Clone, Copy)]
pub struct ServerCommandInfo {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

pub const SERVER_COMMANDS: &[ServerCommandInfo] = &[
    ServerCommandInfo { name: "list", usage: "list", description: "List online players." },
    ServerCommandInfo { name: "say", usage: "say <message>", description: "Broadcast a message." },
    ServerCommandInfo { name: "whitelist", usage: "whitelist add|remove|list [player]", description: "Manage the whitelist." },
    ServerCommandInfo { name: "kick", usage: "kick <player> [reason]", description: "Kick a player." },
    ServerCommandInfo { name: "ban", usage: "ban <player> [reason]", description: "Ban a player." },
    ServerCommandInfo { name: "pardon", usage: "pardon <player>", description: "Lift a ban." },
    ServerCommandInfo { name: "op", usage: "op <player>", description: "Grant operator status." },
    ServerCommandInfo { name: "deop", usage: "deop <player>", description: "Revoke operator status." },
    ServerCommandInfo { name: "time", usage: "time set|add <value>", description: "Change the world time." },
    ServerCommandInfo { name: "weather", usage: "weather clear|rain|thunder", description: "Change the weather." },
    ServerCommandInfo { name: "save-all", usage: "save-all", description: "Flush the world to disk." },
    ServerCommandInfo { name: "stop", usage: "stop", description: "Stop the server." },
];

/// Run `command` with its argument string.
pub async fn execute(command: LocalCommand, relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    match command {
        LocalCommand::Commands => list_commands(relay, message).await,
        LocalCommand::ServerCommands => list_server_commands(relay, message).await,
        LocalCommand::SetChannel => {
            relay.bind_channel(&message.channel).await;
            relay.persist().await;
            Ok(())
        }
        LocalCommand::Ls => servers::list(relay, message).await,
        LocalCommand::As => servers::add(relay, args).await,
        LocalCommand::Rm => servers::remove(relay, args).await,
        LocalCommand::Rename => servers::rename(relay, args).await,
        LocalCommand::Status => servers::status(relay, message, args).await,
        LocalCommand::Perms => perms::list(relay, message, args).await,
        LocalCommand::PermNode => perms::node(relay, message, args).await,
        LocalCommand::PermUser => perms::set_user(relay, message, args).await,
        LocalCommand::PermRole => perms::set_role(relay, message, args).await,
        LocalCommand::UnpermUser => perms::unset_user(relay, message, args).await,
        LocalCommand::UnpermRole => perms::unset_role(relay, message, args).await,
    }
}

async fn list_commands(relay: &Relay, message: &IncomingMessage) -> BridgeResult<()> {
    let control = relay.control_char().await;
    let lines: Vec<String> = LocalCommand::ALL
        .iter()
        .map(|c| format!("{control}{} - {}", c.usage(), c.description()))
        .collect();
    relay
        .platform()
        .send_message(&message.channel, &format!("Bot commands:\n{}", lines.join("\n")))
        .await
}

async fn list_server_commands(relay: &Relay, message: &IncomingMessage) -> BridgeResult<()> {
    let control = relay.control_char().await;
    let lines: Vec<String> = SERVER_COMMANDS
        .iter()
        .map(|c| format!("{control}{control}<server> {} - {}", c.usage, c.description))
        .collect();
    relay
        .platform()
        .send_message(&message.channel, &format!("Server commands:\n{}", lines.join("\n")))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::REACT_OK;
    use crate::relay::testing::Harness;

    #[test]
    fn names_round_trip_and_are_unique() {
        for c in LocalCommand::ALL {
            assert_eq!(LocalCommand::from_name(c.name()), Some(c));
        }
        let mut names: Vec<_> = LocalCommand::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), LocalCommand::ALL.len());
        assert_eq!(LocalCommand::from_name("json"), None);
    }

    #[test]
    fn only_override_editing_is_blocked_by_default() {
        let blocked: Vec<_> = LocalCommand::ALL
            .iter()
            .filter(|c| c.default_policy() == PermDefault::Block)
            .map(|c| c.name())
            .collect();
        assert_eq!(blocked, vec!["permuser", "permrole", "unpermuser", "unpermrole"]);
    }

    #[tokio::test]
    async fn listings_use_control_char() {
        let h = Harness::new().await;
        assert_eq!(h.say("1", "c", "u", &[], "!commands").await, vec![REACT_OK]);
        assert_eq!(h.say("2", "c", "u", &[], "!servercommands").await, vec![REACT_OK]);
        let sent = h.platform.sent_to("c");
        assert!(sent[0].starts_with("Bot commands:"));
        assert!(sent[0].contains("!as <ip:port> <name> - Add a server."));
        assert!(sent[1].contains("!!<server> kick <player> [reason] - Kick a player."));
    }
}
