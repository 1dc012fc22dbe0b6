//! JSON envelope codec for the bridge ⇄ game-server link.
//!
//! Wire format: one JSON text frame per envelope,
//! `{"type": "<msg|status|cmd>", "data": {...}}`.
//!
//! Envelopes are decoded once at the boundary into the [`Envelope`] sum type;
//! [`EnvelopeRouter`] then fans each decoded value out to the typed handlers
//! registered for its variant, in registration order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

/// Go-style `time.Stamp` layout (`Jan _2 15:04:05`) used for chat timestamps.
const STAMP_FORMAT: &str = "%b %e %H:%M:%S";

/// Chat line relayed between the chat platform and a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub timestamp: String,
    pub message: String,
}

/// Telemetry snapshot pushed by a game server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStatus {
    pub memory: i64,
    #[serde(rename = "memorymax")]
    pub memory_max: i64,
    pub storage: u64,
    #[serde(rename = "storagemax")]
    pub storage_max: u64,
    pub players: Vec<String>,
    #[serde(rename = "playercount")]
    pub player_count: u32,
    #[serde(rename = "playermax")]
    pub player_max: u32,
    /// Ticks per second keyed by dimension id.
    pub tps: BTreeMap<i32, f32>,
    pub name: String,
    pub status: String,
    #[serde(rename = "activetime")]
    pub active_time: i64,
}

/// A console command for the remote server to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommand {
    #[serde(rename = "cmd", alias = "command")]
    pub command: String,
}

/// Envelope variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Msg,
    Status,
    Cmd,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Msg => "msg",
            Self::Status => "status",
            Self::Cmd => "cmd",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Envelope {
    #[serde(rename = "msg")]
    Msg(ChatMessage),
    #[serde(rename = "status")]
    Status(ServerStatus),
    #[serde(rename = "cmd")]
    Cmd(RemoteCommand),
}

impl Envelope {
    /// Build a `msg` envelope stamped with the local time.
    pub fn chat(message: impl Into<String>) -> Self {
        Envelope::Msg(ChatMessage {
            timestamp: chrono::Local::now().format(STAMP_FORMAT).to_string(),
            message: message.into(),
        })
    }

    /// Build a `cmd` envelope.
    pub fn command(command: impl Into<String>) -> Self {
        Envelope::Cmd(RemoteCommand {
            command: command.into(),
        })
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Msg(_) => EnvelopeKind::Msg,
            Envelope::Status(_) => EnvelopeKind::Status,
            Envelope::Cmd(_) => EnvelopeKind::Cmd,
        }
    }

    /// Serialize into a JSON text frame.
    pub fn encode(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame. Unknown `type` values are a codec error.
    pub fn decode(raw: &str) -> BridgeResult<Self> {
        serde_json::from_str(raw).map_err(|e| BridgeError::Codec(format!("bad envelope: {e}")))
    }
}

type Handler<T> = Arc<dyn Fn(&T) -> BridgeResult<()> + Send + Sync>;

/// Per-variant ordered handler lists.
///
/// Handlers are registered up front and the router is then shared read-only,
/// so dispatch needs no locking.
#[derive(Clone, Default)]
pub struct EnvelopeRouter {
    msg: Vec<Handler<ChatMessage>>,
    status: Vec<Handler<ServerStatus>>,
    cmd: Vec<Handler<RemoteCommand>>,
}

impl EnvelopeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_msg<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ChatMessage) -> BridgeResult<()> + Send + Sync + 'static,
    {
        self.msg.push(Arc::new(handler));
        self
    }

    pub fn on_status<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ServerStatus) -> BridgeResult<()> + Send + Sync + 'static,
    {
        self.status.push(Arc::new(handler));
        self
    }

    pub fn on_cmd<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&RemoteCommand) -> BridgeResult<()> + Send + Sync + 'static,
    {
        self.cmd.push(Arc::new(handler));
        self
    }

    /// Number of handlers registered for a variant.
    pub fn handler_count(&self, kind: EnvelopeKind) -> usize {
        match kind {
            EnvelopeKind::Msg => self.msg.len(),
            EnvelopeKind::Status => self.status.len(),
            EnvelopeKind::Cmd => self.cmd.len(),
        }
    }

    /// Run every handler for the envelope's variant, in registration order.
    ///
    /// A failing handler is logged and does not stop the ones after it.
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        match envelope {
            Envelope::Msg(m) => run_all(&self.msg, m, EnvelopeKind::Msg),
            Envelope::Status(s) => run_all(&self.status, s, EnvelopeKind::Status),
            Envelope::Cmd(c) => run_all(&self.cmd, c, EnvelopeKind::Cmd),
        }
    }

    /// Decode a raw frame and dispatch it.
    ///
    /// A decode failure is logged and returned; no handler runs for that frame.
    pub fn handle_text(&self, raw: &str) -> BridgeResult<usize> {
        match Envelope::decode(raw) {
            Ok(envelope) => Ok(self.dispatch(&envelope)),
            Err(e) => {
                warn!(error = %e, "dropping undecodable envelope");
                Err(e)
            }
        }
    }
}

fn run_all<T>(handlers: &[Handler<T>], value: &T, kind: EnvelopeKind) -> usize {
    for handler in handlers {
        if let Err(e) = handler(value) {
            warn!(kind = %kind, error = %e, "envelope handler failed");
        }
    }
    debug!(kind = %kind, count = handlers.len(), "envelope dispatched");
    handlers.len()
}

impl fmt::Debug for EnvelopeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeRouter")
            .field("msg", &self.msg.len())
            .field("status", &self.status.len())
            .field("cmd", &self.cmd.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn msg_round_trip() {
        let env = Envelope::Msg(ChatMessage {
            timestamp: "T".into(),
            message: "hello".into(),
        });
        let raw = env.encode().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&raw).unwrap(),
            serde_json::json!({"type": "msg", "data": {"timestamp": "T", "message": "hello"}})
        );
        assert_eq!(Envelope::decode(&raw).unwrap(), env);
    }

    #[test]
    fn unknown_type_runs_no_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = EnvelopeRouter::new();
        for _ in 0..2 {
            let calls = calls.clone();
            router.on_msg(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = router
            .handle_text(r#"{"type":"unknown","data":{"message":"x"}}"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Codec(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Later envelopes are unaffected.
        let n = router
            .handle_text(r#"{"type":"msg","data":{"timestamp":"t","message":"x"}}"#)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn malformed_payload_is_codec_error() {
        let router = EnvelopeRouter::new();
        assert!(router.handle_text("not json").is_err());
        assert!(router.handle_text(r#"{"type":"msg","data":{"timestamp":5}}"#).is_err());
    }

    #[test]
    fn status_uses_lowercase_wire_names() {
        let raw = r#"{"type":"status","data":{
            "memory":512,"memorymax":2048,"storage":10,"storagemax":100,
            "players":["steve","alex"],"playercount":2,"playermax":20,
            "tps":{"0":19.5,"-1":20.0},"name":"survival","status":"running","activetime":3600}}"#;
        let Envelope::Status(status) = Envelope::decode(raw).unwrap() else {
            panic!("expected status");
        };
        assert_eq!(status.memory_max, 2048);
        assert_eq!(status.players, vec!["steve", "alex"]);
        assert_eq!(status.tps.get(&-1), Some(&20.0));
        assert_eq!(status.active_time, 3600);
    }

    #[test]
    fn partial_status_defaults_missing_fields() {
        let Envelope::Status(status) =
            Envelope::decode(r#"{"type":"status","data":{"name":"lobby"}}"#).unwrap()
        else {
            panic!("expected status");
        };
        assert_eq!(status.name, "lobby");
        assert!(status.players.is_empty());
    }

    #[test]
    fn cmd_wire_name_and_alias() {
        let raw = Envelope::command("say hi").encode().unwrap();
        assert!(raw.contains(r#""cmd":"say hi""#));
        let decoded = Envelope::decode(r#"{"type":"cmd","data":{"command":"list"}}"#).unwrap();
        assert_eq!(decoded, Envelope::command("list"));
    }

    #[test]
    fn handlers_run_in_order_and_survive_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut router = EnvelopeRouter::new();
        {
            let seen = seen.clone();
            router.on_cmd(move |c| {
                seen.lock().unwrap().push(format!("a:{}", c.command));
                Err(BridgeError::Other("boom".into()))
            });
        }
        {
            let seen = seen.clone();
            router.on_cmd(move |c| {
                seen.lock().unwrap().push(format!("b:{}", c.command));
                Ok(())
            });
        }

        assert_eq!(router.dispatch(&Envelope::command("stop")), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a:stop", "b:stop"]);
        assert_eq!(router.handler_count(EnvelopeKind::Msg), 0);
    }

    #[test]
    fn chat_helper_stamps_time() {
        let Envelope::Msg(m) = Envelope::chat("connected") else {
            panic!("expected msg");
        };
        assert_eq!(m.message, "connected");
        // "Jan _2 15:04:05" is always 15 characters.
        assert_eq!(m.timestamp.len(), 15);
    }
}
