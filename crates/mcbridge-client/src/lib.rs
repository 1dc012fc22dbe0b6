//! mcbridge-client: server-side links for the chat bridge.
//!
//! Each registered game server gets a [`ConnectionManager`] that dials it,
//! keeps a read loop and a write loop running while connected, and tears the
//! link down and redials after too many consecutive transport errors. The
//! [`Dispatcher`] indexes managers by address and by name and fans
//! envelopes out to them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcbridge_client::{Dispatcher, WebSocketDialer};
//! use mcbridge_core::{Endpoint, Envelope, EnvelopeRouter};
//!
//! # async fn example() -> mcbridge_core::BridgeResult<()> {
//! let dispatcher = Dispatcher::new(
//!     Arc::new(WebSocketDialer::with_local_origin()),
//!     Arc::new(|_endpoint: &Endpoint| EnvelopeRouter::new()),
//! );
//! dispatcher.add(Endpoint::parse("127.0.0.1:25580")?, "survival".into()).await?;
//! dispatcher.send_to_all(Envelope::command("say hello")).await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod registry;
pub mod transport;

// Re-export primary public types.
pub use connection::{
    ConnectionManager, ConnectionStatus, CONSECUTIVE_ERROR_MAX, OUTBOUND_QUEUE_CAPACITY, RETRY_INTERVAL,
};
pub use registry::{Dispatcher, EndpointInfo, RouterFactory};
pub use transport::{Dialer, FrameSink, FrameStream, Link, MemoryDialer, MemoryPeer, WebSocketDialer};

// Re-export core error types for convenience.
pub use mcbridge_core::{BridgeError, BridgeResult};
