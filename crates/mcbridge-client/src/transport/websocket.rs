//! WebSocket links to game servers.
//!
//! One text frame carries one JSON envelope. The handshake carries an
//! `Origin: http://<local address>` header; servers use it to tell bridges
//! apart.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use mcbridge_core::{BridgeError, BridgeResult, Endpoint};

use super::{Dialer, FrameSink, FrameStream, Link};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Best guess at this host's non-loopback IPv4 address.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outbound interface.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}

/// Dials `ws://<address>:<port>` with a fixed Origin header.
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    origin: String,
}

impl WebSocketDialer {
    pub fn new(origin: impl Into<String>) -> Self {
        Self { origin: origin.into() }
    }

    /// Origin derived from the local IPv4 address, falling back to localhost.
    pub fn with_local_origin() -> Self {
        let host = local_ipv4()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "localhost".to_string());
        Self::new(format!("http://{host}"))
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, endpoint: &Endpoint) -> BridgeResult<Link> {
        let url = endpoint.ws_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Transport(format!("bad WebSocket URL {url}: {e}")))?;
        let origin = HeaderValue::from_str(&self.origin)
            .map_err(|e| BridgeError::Transport(format!("bad origin {}: {e}", self.origin)))?;
        request.headers_mut().insert("Origin", origin);

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| BridgeError::Transport(format!("WebSocket connect error: {e}")))?;
        tracing::debug!(%url, "WebSocket handshake complete");

        let (sink, stream) = ws.split();
        Ok(Link {
            sink: Box::new(WsSink(sink)),
            stream: Box::new(WsFrames(stream)),
        })
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> BridgeResult<()> {
        self.0
            .send(Message::Text(frame))
            .await
            .map_err(|e| BridgeError::Transport(format!("WS write error: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

struct WsFrames(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsFrames {
    async fn recv(&mut self) -> BridgeResult<String> {
        // Pings are answered by tungstenite on the next read.
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data)
                        .map_err(|e| BridgeError::Transport(format!("non-UTF-8 binary frame: {e}")));
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(BridgeError::Transport("closed by peer".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(BridgeError::Transport(format!("WS read error: {e}"))),
                None => return Err(BridgeError::Transport("stream ended".into())),
            }
        }
    }
}
