//! Permission commands.
//!
//! Users are given as a mention (`<@id>` or `<@!id>`) or a raw id. Roles are
//! given as a role mention (`<@&id>`) or a role name, which the platform
//! resolves to an id in the message's guild.

use mcbridge_core::{BridgeError, BridgeResult, PrincipalKind};
use tracing::info;

use crate::platform::IncomingMessage;
use crate::relay::{split_command, Relay};

pub(super) async fn list(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let prefix = args.trim();
    let paths: Vec<String> = relay
        .authorizer()
        .all_paths()
        .await
        .into_iter()
        .filter(|p| p.starts_with(prefix))
        .collect();
    let text = if paths.is_empty() {
        format!("No permission nodes under \"{prefix}\".")
    } else {
        format!("Permission nodes:\n{}", paths.join("\n"))
    };
    relay.platform().send_message(&message.channel, &text).await
}

pub(super) async fn node(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let (path, _) = split_command(args);
    if path.is_empty() {
        return Err(BridgeError::Other("usage: permnode <path>".into()));
    }
    let text = match relay.authorizer().guild_overrides(path, &message.guild).await? {
        None => format!("{path}: no overrides."),
        Some(guild) => {
            let mut lines: Vec<String> = guild
                .users
                .values()
                .map(|p| format!("user <@{}>: {}", p.id, verdict(p.allowed)))
                .chain(
                    guild
                        .roles
                        .values()
                        .map(|p| format!("role <@&{}>: {}", p.id, verdict(p.allowed))),
                )
                .collect();
            lines.sort();
            format!("{path}:\n{}", lines.join("\n"))
        }
    };
    relay.platform().send_message(&message.channel, &text).await
}

pub(super) async fn set_user(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let (path, who, allowed) = split_set(args, "permuser <path> <@user> yes|no")?;
    let user = parse_user(who)?;
    apply(relay, message, path, PrincipalKind::User, &user, allowed).await
}

pub(super) async fn set_role(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let (path, who, allowed) = split_set(args, "permrole <path> <@&role|role name> yes|no")?;
    let role = parse_role(relay, &message.guild, who).await?;
    apply(relay, message, path, PrincipalKind::Role, &role, allowed).await
}

pub(super) async fn unset_user(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let (path, who) = split_command(args);
    if path.is_empty() || who.is_empty() {
        return Err(BridgeError::Other("usage: unpermuser <path> <@user>".into()));
    }
    let user = parse_user(who)?;
    revoke(relay, message, path, PrincipalKind::User, &user).await
}

pub(super) async fn unset_role(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let (path, who) = split_command(args);
    if path.is_empty() || who.is_empty() {
        return Err(BridgeError::Other("usage: unpermrole <path> <@&role|role name>".into()));
    }
    let role = parse_role(relay, &message.guild, who).await?;
    revoke(relay, message, path, PrincipalKind::Role, &role).await
}

async fn apply(
    relay: &Relay,
    message: &IncomingMessage,
    path: &str,
    kind: PrincipalKind,
    principal: &str,
    allowed: bool,
) -> BridgeResult<()> {
    relay
        .authorizer()
        .set_override(path, &message.guild, kind, principal, allowed)
        .await?;
    info!(path, guild = %message.guild, %kind, principal, allowed, by = %message.author.id, "override set");
    relay.persist().await;
    let text = format!("{path}: {kind} {} is now {}.", mention(kind, principal), verdict(allowed));
    relay.platform().send_message(&message.channel, &text).await
}

async fn revoke(
    relay: &Relay,
    message: &IncomingMessage,
    path: &str,
    kind: PrincipalKind,
    principal: &str,
) -> BridgeResult<()> {
    let removed = relay
        .authorizer()
        .remove_override(path, &message.guild, kind, principal)
        .await?;
    if !removed {
        return Err(BridgeError::Other(format!("{path} has no override for {kind} {principal}")));
    }
    info!(path, guild = %message.guild, %kind, principal, by = %message.author.id, "override removed");
    relay.persist().await;
    let text = format!("{path}: {kind} {} override removed.", mention(kind, principal));
    relay.platform().send_message(&message.channel, &text).await
}

/// Split `<path> <principal...> yes|no`.
fn split_set<'a>(args: &'a str, usage: &str) -> BridgeResult<(&'a str, &'a str, bool)> {
    let usage_err = || BridgeError::Other(format!("usage: {usage}"));
    let (path, rest) = split_command(args);
    let (who, value) = rest.rsplit_once(char::is_whitespace).ok_or_else(usage_err)?;
    let who = who.trim();
    if path.is_empty() || who.is_empty() {
        return Err(usage_err());
    }
    let allowed = match value.to_ascii_lowercase().as_str() {
        "yes" | "y" | "allow" => true,
        "no" | "n" | "block" => false,
        _ => return Err(usage_err()),
    };
    Ok((path, who, allowed))
}

fn parse_user(token: &str) -> BridgeResult<String> {
    let id = match token.strip_prefix("<@").and_then(|t| t.strip_suffix('>')) {
        Some(inner) => inner.strip_prefix('!').unwrap_or(inner),
        None => token,
    };
    if id.is_empty() || id.contains(|c: char| c.is_whitespace() || c == '<' || c == '>' || c == '&') {
        return Err(BridgeError::Other(format!("not a user: {token}")));
    }
    Ok(id.to_string())
}

async fn parse_role(relay: &Relay, guild: &str, token: &str) -> BridgeResult<String> {
    if let Some(id) = token.strip_prefix("<@&").and_then(|t| t.strip_suffix('>')) {
        if id.is_empty() {
            return Err(BridgeError::Other(format!("not a role: {token}")));
        }
        return Ok(id.to_string());
    }
    relay
        .platform()
        .role_id(guild, token)
        .await?
        .ok_or_else(|| BridgeError::Other(format!("no role named {token}")))
}

fn mention(kind: PrincipalKind, id: &str) -> String {
    match kind {
        PrincipalKind::User => format!("<@{id}>"),
        PrincipalKind::Role => format!("<@&{id}>"),
    }
}

fn verdict(allowed: bool) -> &'static str {
    if allowed {
        "allowed"
    } else {
        "blocked"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{REACT_FAIL, REACT_OK};
    use crate::relay::testing::Harness;
    use crate::state::StateFile;

    #[test]
    fn user_tokens() {
        assert_eq!(parse_user("<@123>").unwrap(), "123");
        assert_eq!(parse_user("<@!123>").unwrap(), "123");
        assert_eq!(parse_user("123").unwrap(), "123");
        assert!(parse_user("<@&123>").is_err());
        assert!(parse_user("<@>").is_err());
    }

    #[test]
    fn set_arguments() {
        assert_eq!(
            split_set("a.b <@&9> yes", "u").unwrap(),
            ("a.b", "<@&9>", true)
        );
        assert_eq!(
            split_set("a.b Server Mods no", "u").unwrap(),
            ("a.b", "Server Mods", false)
        );
        assert!(split_set("a.b <@1> maybe", "u").is_err());
        assert!(split_set("a.b yes", "u").is_err());
    }

    #[tokio::test]
    async fn editing_overrides_needs_a_grant() {
        let h = Harness::new().await;
        assert_eq!(
            h.say("1", "c", "u", &[], "!permuser mcbridge.command.ls <@troll> no").await,
            vec![REACT_FAIL]
        );

        h.relay.grant_admin("g", "boss").await.unwrap();
        assert_eq!(
            h.say("2", "c", "boss", &[], "!permuser mcbridge.command.ls <@!troll> no").await,
            vec![REACT_OK]
        );
        assert!(h
            .relay
            .authorizer()
            .authorize("mcbridge.command.ls", "g", "troll", &[])
            .await
            .is_err());
        let saved = StateFile::load(&h.state_path()).unwrap();
        let overrides = saved.chat.perms.guild_overrides("mcbridge.command.ls", "g").unwrap();
        assert_eq!(overrides.unwrap().get(PrincipalKind::User, "troll"), Some(false));

        assert_eq!(
            h.say("3", "c", "boss", &[], "!unpermuser mcbridge.command.ls troll").await,
            vec![REACT_OK]
        );
        assert_eq!(
            h.say("4", "c", "boss", &[], "!unpermuser mcbridge.command.ls troll").await,
            vec![REACT_FAIL]
        );
    }

    #[tokio::test]
    async fn roles_by_mention_or_name() {
        let h = Harness::new().await;
        h.platform.add_role("g", "Server Mods", "77");
        h.relay.grant_admin("g", "boss").await.unwrap();

        assert_eq!(
            h.say("1", "c", "boss", &[], "!permrole mcbridge.server.command Server Mods yes").await,
            vec![REACT_OK]
        );
        assert_eq!(
            h.say("2", "c", "boss", &[], "!permrole mcbridge.server.command <@&88> no").await,
            vec![REACT_OK]
        );
        assert_eq!(
            h.say("3", "c", "boss", &[], "!permrole mcbridge.server.command Nobody yes").await,
            vec![REACT_FAIL]
        );
        assert_eq!(
            h.say("4", "c", "boss", &[], "!permrole mcbridge.nope <@&88> yes").await,
            vec![REACT_FAIL]
        );

        h.say("5", "c", "boss", &[], "!permnode mcbridge.server.command").await;
        let text = h.platform.sent_to("c").pop().unwrap();
        assert_eq!(
            text,
            "mcbridge.server.command:\nrole <@&77>: allowed\nrole <@&88>: blocked"
        );

        assert_eq!(
            h.say("6", "c", "boss", &[], "!unpermrole mcbridge.server.command Server Mods").await,
            vec![REACT_OK]
        );
        h.say("7", "c", "boss", &[], "!permnode mcbridge.server.command").await;
        let text = h.platform.sent_to("c").pop().unwrap();
        assert_eq!(text, "mcbridge.server.command:\nrole <@&88>: blocked");
    }

    #[tokio::test]
    async fn perms_lists_by_prefix() {
        let h = Harness::new().await;
        assert_eq!(h.say("1", "c", "u", &[], "!perms mcbridge.server").await, vec![REACT_OK]);
        let text = h.platform.sent_to("c").pop().unwrap();
        assert!(text.contains("mcbridge.server.command.stop"));
        assert!(!text.contains("mcbridge.command.ls"));

        h.say("2", "c", "u", &[], "!perms zzz").await;
        assert_eq!(h.platform.sent_to("c").pop().unwrap(), "No permission nodes under \"zzz\".");

        h.say("3", "c", "u", &[], "!permnode mcbridge.command.ls").await;
        assert_eq!(h.platform.sent_to("c").pop().unwrap(), "mcbridge.command.ls: no overrides.");
    }
}
