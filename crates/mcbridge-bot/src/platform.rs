//! Chat platform abstraction.
//!
//! The relay only needs to post text, react to a message and map a role
//! name to its id. The console platform reads messages from stdin and prints
//! everything to stdout.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use mcbridge_core::{BridgeError, BridgeResult};

pub const REACT_OK: &str = "✅";
pub const REACT_FAIL: &str = "❌";

/// The sender of a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
    /// Role ids in priority order.
    pub roles: Vec<String>,
}

/// A message received from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: String,
    pub channel: String,
    /// Tenant the message was posted in.
    pub guild: String,
    pub author: Author,
    pub content: String,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post `text` into `channel`.
    async fn send_message(&self, channel: &str, text: &str) -> BridgeResult<()>;

    /// Add a reaction to `message`.
    async fn react(&self, message: &IncomingMessage, emoji: &str) -> BridgeResult<()>;

    /// Id of the role called `name` in `guild`, if there is one.
    async fn role_id(&self, guild: &str, name: &str) -> BridgeResult<Option<String>>;
}

/// Terminal-backed platform. Every channel prints to the same writer.
pub struct ConsolePlatform<W> {
    out: Mutex<W>,
}

impl ConsolePlatform<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> ConsolePlatform<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    async fn write_line(&self, line: &str) -> BridgeResult<()> {
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ChatPlatform for ConsolePlatform<W> {
    async fn send_message(&self, channel: &str, text: &str) -> BridgeResult<()> {
        for line in text.lines() {
            self.write_line(&format!("[#{channel}] {line}")).await?;
        }
        Ok(())
    }

    async fn react(&self, message: &IncomingMessage, emoji: &str) -> BridgeResult<()> {
        self.write_line(&format!("[#{}] {emoji} {}", message.channel, message.content)).await
    }

    /// Console roles are named by their ids.
    async fn role_id(&self, _guild: &str, name: &str) -> BridgeResult<Option<String>> {
        Ok(Some(name.to_string()))
    }
}

/// Who is typing at the console and where their messages land.
#[derive(Debug, Clone)]
pub struct ConsoleIdentity {
    pub channel: String,
    pub guild: String,
    pub author: Author,
}

/// Turn each non-empty input line into an [`IncomingMessage`] until EOF or
/// until the receiver goes away.
pub async fn read_messages<R>(input: R, identity: ConsoleIdentity, tx: mpsc::Sender<IncomingMessage>) -> BridgeResult<()>
where
    R: AsyncBufRead + Unpin,
{
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let content = line.trim();
        if content.is_empty() {
            continue;
        }
        let message = IncomingMessage {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string(),
            channel: identity.channel.clone(),
            guild: identity.guild.clone(),
            author: identity.author.clone(),
            content: content.to_string(),
        };
        if tx.send(message).await.is_err() {
            return Err(BridgeError::Closed);
        }
    }
    debug!("console input closed");
    Ok(())
}

#[cfg(test)]
pub(crate) mod memory {
    //! Recording platform for tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryPlatform {
        pub sent: Mutex<Vec<(String, String)>>,
        pub reactions: Mutex<Vec<(String, String)>>,
        pub roles: Mutex<HashMap<(String, String), String>>,
    }

    impl MemoryPlatform {
        pub fn add_role(&self, guild: &str, name: &str, id: &str) {
            self.roles
                .lock()
                .unwrap()
                .insert((guild.to_string(), name.to_string()), id.to_string());
        }

        /// Reactions added to the message with `id`.
        pub fn reactions_for(&self, id: &str) -> Vec<String> {
            self.reactions
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == id)
                .map(|(_, e)| e.clone())
                .collect()
        }

        pub fn sent_to(&self, channel: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChatPlatform for MemoryPlatform {
        async fn send_message(&self, channel: &str, text: &str) -> BridgeResult<()> {
            self.sent.lock().unwrap().push((channel.to_string(), text.to_string()));
            Ok(())
        }

        async fn react(&self, message: &IncomingMessage, emoji: &str) -> BridgeResult<()> {
            self.reactions
                .lock()
                .unwrap()
                .push((message.id.clone(), emoji.to_string()));
            Ok(())
        }

        async fn role_id(&self, guild: &str, name: &str) -> BridgeResult<Option<String>> {
            Ok(self
                .roles
                .lock()
                .unwrap()
                .get(&(guild.to_string(), name.to_string()))
                .cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ConsoleIdentity {
        ConsoleIdentity {
            channel: "console".into(),
            guild: "local".into(),
            author: Author {
                id: "1".into(),
                name: "alex".into(),
                roles: vec!["ops".into()],
            },
        }
    }

    #[tokio::test]
    async fn lines_become_messages() {
        let input: &[u8] = b"hello\n\n  !ls  \n";
        let (tx, mut rx) = mpsc::channel(8);
        read_messages(input, identity(), tx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.content, "hello");
        assert_eq!(first.guild, "local");
        assert_eq!(first.author.roles, vec!["ops".to_string()]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.content, "!ls");
        assert_ne!(first.id, second.id);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn console_prints_messages_and_reactions() {
        let platform = ConsolePlatform::new(Vec::<u8>::new());
        platform.send_message("general", "a\nb").await.unwrap();
        let msg = IncomingMessage {
            id: "9".into(),
            channel: "general".into(),
            guild: "local".into(),
            author: identity().author,
            content: "!ls".into(),
        };
        platform.react(&msg, REACT_OK).await.unwrap();
        assert_eq!(platform.role_id("local", "ops").await.unwrap().as_deref(), Some("ops"));

        let out = String::from_utf8(platform.into_inner().await).unwrap();
        assert_eq!(out, "[#general] a\n[#general] b\n[#general] ✅ !ls\n");
    }
}
