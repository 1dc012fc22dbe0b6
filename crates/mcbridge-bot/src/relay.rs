//! Chat router: classifies platform messages and moves chat between the
//! platform and the game servers.
//!
//! | message                        | handling                                   |
//! |--------------------------------|--------------------------------------------|
//! | `<ctl><ctl>target command...`  | authorized, sent as `cmd` to one server    |
//! | `<ctl>name args...`            | authorized, run as a local command         |
//! | anything else, bound channel   | broadcast to every server as `say`         |
//! | anything else, other channel   | ignored                                    |

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use mcbridge_client::{Dialer, Dispatcher, RouterFactory};
use mcbridge_core::{
    BridgeError, BridgeResult, ChatMessage, Endpoint, EndpointRecord, Envelope, EnvelopeRouter, PrincipalKind,
};

use crate::authorizer::{self, Authorizer};
use crate::commands::{self, LocalCommand, SERVER_COMMANDS};
use crate::platform::{ChatPlatform, IncomingMessage, REACT_FAIL, REACT_OK};
use crate::state::{ChatSection, StateFile};

/// A chat line received from a game server.
pub type ServerChat = (Endpoint, ChatMessage);

/// How a platform message is to be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified<'a> {
    Chat,
    Local { name: &'a str, args: &'a str },
    Server { target: &'a str, command: &'a str },
}

/// Split `text` into its first word and the trimmed remainder.
pub fn split_command(text: &str) -> (&str, &str) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    }
}

pub fn classify<'a>(content: &'a str, control: &str) -> Classified<'a> {
    let Some(rest) = content.strip_prefix(control) else {
        return Classified::Chat;
    };
    match rest.strip_prefix(control) {
        Some(server) => {
            let (target, command) = split_command(server);
            Classified::Server { target, command }
        }
        None => {
            let (name, args) = split_command(rest);
            Classified::Local { name, args }
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelSettings {
    channel_id: String,
    control_char: String,
}

/// The bridge between one chat platform and every registered server.
pub struct Relay {
    platform: Arc<dyn ChatPlatform>,
    authorizer: Authorizer,
    dispatcher: Dispatcher,
    settings: RwLock<ChannelSettings>,
    state_path: PathBuf,
    persist_lock: Mutex<()>,
}

impl Relay {
    /// Build a relay around a loaded state. Chat lines coming back from
    /// servers arrive on the returned receiver; feed it to
    /// [`forward_server_chat`](Self::forward_server_chat).
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        dialer: Arc<dyn Dialer>,
        chat: ChatSection,
        control_char: String,
        state_path: PathBuf,
    ) -> BridgeResult<(Arc<Self>, mpsc::UnboundedReceiver<ServerChat>)> {
        // Unbounded: server chat waits for the platform, it is never dropped.
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        let routers: RouterFactory = Arc::new(move |endpoint: &Endpoint| {
            let mut router = EnvelopeRouter::new();
            let tx = chat_tx.clone();
            let endpoint = endpoint.clone();
            router
                .on_msg(move |msg| {
                    tx.send((endpoint.clone(), msg.clone()))
                        .map_err(|_| BridgeError::Closed)
                })
                .on_status(|status| {
                    debug!(server = %status.name, players = status.player_count, "status snapshot");
                    Ok(())
                });
            router
        });

        let relay = Relay {
            platform,
            authorizer: Authorizer::new(chat.perms)?,
            dispatcher: Dispatcher::new(dialer, routers),
            settings: RwLock::new(ChannelSettings {
                channel_id: chat.channel_id,
                control_char,
            }),
            state_path,
            persist_lock: Mutex::new(()),
        };
        Ok((Arc::new(relay), chat_rx))
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn platform(&self) -> &dyn ChatPlatform {
        self.platform.as_ref()
    }

    pub async fn channel_id(&self) -> String {
        self.settings.read().await.channel_id.clone()
    }

    pub async fn control_char(&self) -> String {
        self.settings.read().await.control_char.clone()
    }

    pub async fn bind_channel(&self, channel: &str) {
        self.settings.write().await.channel_id = channel.to_string();
        info!(channel, "relay channel bound");
    }

    /// Register every local command with its default policy and every known
    /// server command verb under the bot's permission roots.
    pub async fn register_commands(&self) -> BridgeResult<()> {
        for command in LocalCommand::ALL {
            self.authorizer
                .register_command_path(&authorizer::command_path(command.name()), command.default_policy())
                .await?;
        }
        for info in SERVER_COMMANDS {
            self.authorizer
                .ensure_path(&authorizer::server_command_path(info.name))
                .await?;
        }
        debug!(
            local = LocalCommand::ALL.len(),
            server = SERVER_COMMANDS.len(),
            "commands registered"
        );
        Ok(())
    }

    /// Give `user` an explicit allow on the whole bot root in `tenant`.
    pub async fn grant_admin(&self, tenant: &str, user: &str) -> BridgeResult<()> {
        self.authorizer
            .set_override(authorizer::ROOT, tenant, PrincipalKind::User, user, true)
            .await?;
        info!(tenant, user, "granted admin");
        Ok(())
    }

    /// Re-add persisted servers. Bad entries are logged and skipped.
    pub async fn restore_servers(&self, servers: Vec<EndpointRecord>) {
        for record in servers {
            if let Err(e) = self.dispatcher.add(record.endpoint.clone(), record.name.clone()).await {
                warn!(endpoint = %record.endpoint, name = %record.name, error = %e, "skipping persisted server");
            }
        }
    }

    /// Write the current state to disk. Failures are logged; in-memory state
    /// stays authoritative.
    pub async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let settings = self.settings.read().await.clone();
        let state = StateFile {
            chat: ChatSection {
                channel_id: settings.channel_id,
                control_char: settings.control_char,
                perms: self.authorizer.snapshot().await,
            },
            servers: self.dispatcher.records().await,
        };
        match state.save(&self.state_path) {
            Ok(()) => debug!(path = %self.state_path.display(), "state saved"),
            Err(e) => warn!(path = %self.state_path.display(), error = %e, "failed to save state"),
        }
    }

    /// Handle platform messages until the sender closes, one task each.
    pub async fn run(self: Arc<Self>, mut messages: mpsc::Receiver<IncomingMessage>) {
        while let Some(message) = messages.recv().await {
            let relay = Arc::clone(&self);
            tokio::spawn(async move { relay.handle_message(message).await });
        }
        debug!("platform message stream ended");
    }

    /// Post server chat into the bound channel until every sender is gone.
    pub async fn forward_server_chat(self: Arc<Self>, mut chat: mpsc::UnboundedReceiver<ServerChat>) {
        while let Some((endpoint, message)) = chat.recv().await {
            let channel = self.channel_id().await;
            if channel.is_empty() {
                debug!(%endpoint, "no relay channel bound, dropping server chat");
                continue;
            }
            let server = match self.dispatcher.get(&endpoint).await {
                Some(manager) => manager.name(),
                None => endpoint.to_string(),
            };
            let text = format!("{server}: {}", message.message);
            if let Err(e) = self.platform.send_message(&channel, &text).await {
                warn!(%endpoint, error = %e, "failed to post server chat");
            }
        }
    }

    pub async fn handle_message(&self, message: IncomingMessage) {
        let control = self.control_char().await;
        match classify(&message.content, &control) {
            Classified::Chat => self.relay_chat(&message).await,
            Classified::Local { name, args } => {
                debug!(command = name, user = %message.author.name, "local command");
                let result = self.run_local(name, args, &message).await;
                self.acknowledge(&message, result).await;
            }
            Classified::Server { target, command } => {
                debug!(target, command, user = %message.author.name, "server command");
                let result = self.run_server_command(target, command, &message).await;
                self.acknowledge(&message, result).await;
            }
        }
    }

    async fn relay_chat(&self, message: &IncomingMessage) {
        if message.channel != self.channel_id().await {
            return;
        }
        debug!(user = %message.author.name, "broadcasting chat");
        let command = format!("say {}: {}", message.author.name, message.content);
        self.dispatcher.send_to_all(Envelope::command(command)).await;
    }

    async fn run_local(&self, name: &str, args: &str, message: &IncomingMessage) -> BridgeResult<()> {
        self.authorizer
            .authorize(
                &authorizer::command_path(name),
                &message.guild,
                &message.author.id,
                &message.author.roles,
            )
            .await?;
        let command = LocalCommand::from_name(name)
            .ok_or_else(|| BridgeError::Other(format!("unknown command: {name}")))?;
        if command.channel_bound() && message.channel != self.channel_id().await {
            return Err(BridgeError::Other(format!("{name} only works in the relay channel")));
        }
        commands::execute(command, self, message, args).await
    }

    async fn run_server_command(&self, target: &str, command: &str, message: &IncomingMessage) -> BridgeResult<()> {
        if target.is_empty() || command.is_empty() {
            return Err(BridgeError::Other("usage: <server> <command...>".into()));
        }
        let (verb, _) = split_command(command);
        let verb_path = authorizer::server_command_path(verb);
        let path = if self.authorizer.contains(&verb_path).await {
            verb_path
        } else {
            authorizer::SERVER_COMMAND_ROOT.to_string()
        };
        self.authorizer
            .authorize(&path, &message.guild, &message.author.id, &message.author.roles)
            .await?;

        let manager = self.dispatcher.resolve(target).await?;
        manager.enqueue(Envelope::command(command)).await?;
        info!(server = %manager.name(), command, user = %message.author.name, "command sent to server");
        Ok(())
    }

    async fn acknowledge(&self, message: &IncomingMessage, result: BridgeResult<()>) {
        let emoji = match &result {
            Ok(()) => REACT_OK,
            Err(e) => {
                info!(content = %message.content, error = %e, "command failed");
                REACT_FAIL
            }
        };
        if let Err(e) = self.platform.react(message, emoji).await {
            warn!(error = %e, "failed to add reaction");
        }
    }

    /// Close every server connection and save state one last time.
    pub async fn shutdown(&self) {
        self.persist().await;
        for e in self.dispatcher.close_all().await {
            warn!(error = %e, "error while closing connection");
        }
    }
}
