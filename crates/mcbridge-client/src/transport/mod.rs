//! Abstract transport for server links.
//!
//! A link is a pair of halves carrying text frames: the write loop owns the
//! [`FrameSink`], the read loop owns the [`FrameStream`]. A [`Dialer`] opens
//! new links; the WebSocket dialer is used in production and the in-memory
//! dialer in tests.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;

use mcbridge_core::{BridgeResult, Endpoint};

pub use memory::{memory_link, MemoryDialer, MemoryPeer};
pub use websocket::WebSocketDialer;

/// Outbound half of a link.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: String) -> BridgeResult<()>;

    /// Close the outbound half. Errors are not interesting at this point.
    async fn close(&mut self) {}
}

/// Inbound half of a link.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next text frame. Errors once the peer is gone.
    async fn recv(&mut self) -> BridgeResult<String>;
}

/// An open link to one server.
pub struct Link {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to endpoints.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, endpoint: &Endpoint) -> BridgeResult<Link>;
}
