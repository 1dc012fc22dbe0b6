//! WebSocket echo server for exercising the bridge without a game server.
//!
//! Every text frame must decode as an envelope; it is logged and sent back
//! unchanged. Anything else ends the connection.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use mcbridge_core::{BridgeError, BridgeResult, Envelope};

pub const DEFAULT_PORT: u16 = 3553;

pub struct EchoServer {
    listener: TcpListener,
}

impl EchoServer {
    pub async fn bind(addr: SocketAddr) -> BridgeResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("echo bind failed: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one task each.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "echo server listening");
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, remote).await {
                            warn!(%remote, error = %e, "echo connection ended");
                        }
                    });
                }
                Err(e) => error!(error = %e, "TCP accept failed"),
            }
        }
    }
}

async fn serve(stream: TcpStream, remote: SocketAddr) -> BridgeResult<()> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| BridgeError::Transport(format!("handshake failed: {e}")))?;
    debug!(%remote, "echo client connected");

    while let Some(message) = ws.next().await {
        let message = message.map_err(|e| BridgeError::Transport(e.to_string()))?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => {
                let _ = ws.close(None).await;
                return Err(BridgeError::Codec(format!("unexpected frame: {other:?}")));
            }
        };
        let envelope = match Envelope::decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = ws.close(None).await;
                return Err(e);
            }
        };
        info!(%remote, kind = envelope.kind().as_str(), "echo");
        ws.send(Message::Text(text))
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
    }
    debug!(%remote, "echo client disconnected");
    Ok(())
}
