//! Server registry commands: `ls`, `as`, `rm`, `rename` and `status`.

use mcbridge_core::{BridgeError, BridgeResult, Endpoint, ServerStatus};
use tracing::info;

use crate::platform::IncomingMessage;
use crate::relay::{split_command, Relay};

pub(super) async fn list(relay: &Relay, message: &IncomingMessage) -> BridgeResult<()> {
    let servers = relay.dispatcher().list_all().await;
    let text = if servers.is_empty() {
        "No servers registered.".to_string()
    } else {
        let lines: Vec<String> = servers
            .iter()
            .map(|s| format!("{} - {} ({})", s.name, s.endpoint, s.status))
            .collect();
        format!("Servers:\n{}", lines.join("\n"))
    };
    relay.platform().send_message(&message.channel, &text).await
}

pub(super) async fn add(relay: &Relay, args: &str) -> BridgeResult<()> {
    let (location, name) = split_command(args);
    if location.is_empty() || name.is_empty() {
        return Err(BridgeError::Other("usage: as <ip:port> <name>".into()));
    }
    let endpoint = Endpoint::parse(location)?;
    relay.dispatcher().add(endpoint, name.to_string()).await?;
    relay.persist().await;
    Ok(())
}

/// A target containing `:` is an endpoint, anything else a name.
pub(super) async fn remove(relay: &Relay, args: &str) -> BridgeResult<()> {
    let (target, _) = split_command(args);
    if target.is_empty() {
        return Err(BridgeError::Other("usage: rm <ip:port|name>".into()));
    }
    if target.contains(':') {
        relay.dispatcher().remove_by_endpoint(&Endpoint::parse(target)?).await?;
    } else {
        relay.dispatcher().remove_by_name(target).await?;
    }
    relay.persist().await;
    Ok(())
}

pub(super) async fn rename(relay: &Relay, args: &str) -> BridgeResult<()> {
    let (target, new_name) = split_command(args);
    if target.is_empty() || new_name.is_empty() {
        return Err(BridgeError::Other("usage: rename <ip:port|name> <new name>".into()));
    }
    let manager = relay.dispatcher().resolve(target).await?;
    relay
        .dispatcher()
        .rename(manager.endpoint(), new_name.to_string())
        .await?;
    info!(endpoint = %manager.endpoint(), new_name, "server renamed by command");
    relay.persist().await;
    Ok(())
}

pub(super) async fn status(relay: &Relay, message: &IncomingMessage, args: &str) -> BridgeResult<()> {
    let (target, _) = split_command(args);
    if target.is_empty() {
        return Err(BridgeError::Other("usage: status <ip:port|name>".into()));
    }
    let manager = relay.dispatcher().resolve(target).await?;
    let text = match manager.last_status() {
        Some(status) => describe(&manager.name(), &status),
        None => format!("No status from {} yet ({}).", manager.name(), manager.status()),
    };
    relay.platform().send_message(&message.channel, &text).await
}

fn describe(name: &str, s: &ServerStatus) -> String {
    let players = if s.players.is_empty() {
        String::new()
    } else {
        format!(" [{}]", s.players.join(", "))
    };
    let tps: Vec<String> = s.tps.iter().map(|(dim, tps)| format!("{dim}={tps:.1}")).collect();
    format!(
        "{name}: {}\nPlayers: {}/{}{players}\nMemory: {}/{} MB\nStorage: {}/{} MB\nTPS: {}\nUp: {}s",
        s.status,
        s.player_count,
        s.player_max,
        s.memory,
        s.memory_max,
        s.storage,
        s.storage_max,
        if tps.is_empty() { "-".to_string() } else { tps.join(" ") },
        s.active_time,
    )
}
