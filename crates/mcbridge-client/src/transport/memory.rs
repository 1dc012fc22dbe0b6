//! In-memory links backed by mpsc channels.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mcbridge_core::{BridgeError, BridgeResult, Endpoint};

use super::{Dialer, FrameSink, FrameStream, Link};

/// The far end of an in-memory link.
///
/// Frames pushed into `to_bridge` show up on the link's stream; frames sent
/// on the link's sink arrive on `from_bridge`. Dropping `to_bridge` makes the
/// link's stream fail, the same way a dead socket does.
#[derive(Debug)]
pub struct MemoryPeer {
    pub to_bridge: mpsc::Sender<String>,
    pub from_bridge: mpsc::Receiver<String>,
}

struct MemorySink(mpsc::Sender<String>);

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: String) -> BridgeResult<()> {
        self.0
            .send(frame)
            .await
            .map_err(|_| BridgeError::Transport("memory peer gone".into()))
    }
}

struct MemoryStream(mpsc::Receiver<String>);

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> BridgeResult<String> {
        self.0
            .recv()
            .await
            .ok_or_else(|| BridgeError::Transport("memory peer gone".into()))
    }
}

/// Create a connected link/peer pair.
pub fn memory_link(capacity: usize) -> (Link, MemoryPeer) {
    let (to_bridge, inbound) = mpsc::channel(capacity);
    let (outbound, from_bridge) = mpsc::channel(capacity);
    let link = Link {
        sink: Box::new(MemorySink(outbound)),
        stream: Box::new(MemoryStream(inbound)),
    };
    (link, MemoryPeer { to_bridge, from_bridge })
}

/// A dialer that hands out pre-built links in order and fails once they run out.
#[derive(Default)]
pub struct MemoryDialer {
    links: Mutex<VecDeque<Link>>,
    attempts: AtomicUsize,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fresh link and return its peer.
    pub fn push_link(&self) -> MemoryPeer {
        let (link, peer) = memory_link(64);
        if let Ok(mut links) = self.links.lock() {
            links.push_back(link);
        }
        peer
    }

    /// Number of dial attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, endpoint: &Endpoint) -> BridgeResult<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .links
            .lock()
            .map_err(|_| BridgeError::Other("memory dialer poisoned".into()))?
            .pop_front();
        next.ok_or_else(|| BridgeError::Transport(format!("connection refused: {endpoint}")))
    }
}
