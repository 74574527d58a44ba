//! In-process virtual bus
//!
//! [`LoopbackBus`] is the transport half; [`LoopbackPeer`] is the other end
//! of the wire. The peer injects frames (and link failures) that the bus
//! receives, and collects every frame the bus sends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use crate::transport::Transport;
use crate::types::Frame;
use crate::{BusError, Result};

#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Failure(String),
}

#[derive(Debug, Default)]
struct LinkState {
    reopen_count: AtomicU32,
    reopen_failures: AtomicU32,
}

/// Transport end of a virtual bus
pub struct LoopbackBus {
    name: String,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: mpsc::UnboundedSender<Frame>,
    link: Arc<LinkState>,
}

/// Test/demo end of a virtual bus
#[derive(Clone)]
pub struct LoopbackPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<Frame>>>,
    link: Arc<LinkState>,
}

impl LoopbackBus {
    /// Create a connected bus/peer pair
    pub fn pair(name: impl Into<String>) -> (Self, LoopbackPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = Arc::new(LinkState::default());

        let bus = Self {
            name: name.into(),
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            link: Arc::clone(&link),
        };
        let peer = LoopbackPeer {
            inbound: inbound_tx,
            outbound: Arc::new(Mutex::new(outbound_rx)),
            link,
        };
        (bus, peer)
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recv(&self) -> Result<Frame> {
        match self.inbound.lock().await.recv().await {
            Some(Inbound::Frame(frame)) => {
                trace!(id = frame.id(), "loopback frame received");
                Ok(frame)
            }
            Some(Inbound::Failure(reason)) => Err(BusError::Receive {
                interface: self.name.clone(),
                source: std::io::Error::other(reason),
            }),
            None => Err(BusError::Closed { interface: self.name.clone() }),
        }
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        self.outbound.send(*frame).map_err(|_| BusError::Closed { interface: self.name.clone() })
    }

    async fn reopen(&self) -> Result<()> {
        self.link.reopen_count.fetch_add(1, Ordering::Relaxed);
        let failures = self.link.reopen_failures.load(Ordering::Relaxed);
        if failures > 0 {
            self.link.reopen_failures.store(failures - 1, Ordering::Relaxed);
            debug!(interface = %self.name, "loopback reopen refused");
            return Err(BusError::connection_failed(&self.name, "reopen refused"));
        }
        Ok(())
    }
}

impl LoopbackPeer {
    /// Put a frame on the wire for the bus to receive
    pub fn inject(&self, frame: Frame) {
        let _ = self.inbound.send(Inbound::Frame(frame));
    }

    /// Make the next receive fail with a link error
    pub fn inject_failure(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Failure(reason.into()));
    }

    /// Make the next `count` reopen attempts fail
    pub fn refuse_reopens(&self, count: u32) {
        self.link.reopen_failures.store(count, Ordering::Relaxed);
    }

    /// Number of reopen attempts so far
    pub fn reopen_count(&self) -> u32 {
        self.link.reopen_count.load(Ordering::Relaxed)
    }

    /// Wait for the next frame sent by the bus
    pub async fn next_sent(&self) -> Option<Frame> {
        self.outbound.lock().await.recv().await
    }

    /// Take every frame sent so far without waiting
    pub async fn drain_sent(&self) -> Vec<Frame> {
        let mut outbound = self.outbound.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameFormat;

    #[tokio::test]
    async fn frames_cross_in_both_directions() {
        let (bus, peer) = LoopbackBus::pair("vcan0");
        let frame = Frame::data(FrameFormat::Standard, 0x42, &[9]).unwrap();

        peer.inject(frame);
        assert_eq!(bus.recv().await.unwrap(), frame);

        bus.send(&frame).await.unwrap();
        assert_eq!(peer.next_sent().await, Some(frame));
    }

    #[tokio::test]
    async fn dropped_peer_closes_the_bus() {
        let (bus, peer) = LoopbackBus::pair("vcan0");
        drop(peer);
        assert!(matches!(bus.recv().await, Err(BusError::Closed { .. })));
    }

    #[tokio::test]
    async fn refused_reopens_are_counted() {
        let (bus, peer) = LoopbackBus::pair("vcan0");
        peer.refuse_reopens(2);
        assert!(bus.reopen().await.is_err());
        assert!(bus.reopen().await.is_err());
        assert!(bus.reopen().await.is_ok());
        assert_eq!(peer.reopen_count(), 3);
    }
}
