//! Transport trait for bus access

use std::sync::Arc;

use crate::statistics::Counters;
use crate::types::Frame;
use crate::Result;

/// Trait for bus transports
///
/// Transports abstract over the raw frame I/O (SocketCAN, an in-process
/// loopback bus, ...). Methods take `&self` so the receive pump and any
/// number of transmit jobs can share one transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Interface name, used in logs and errors
    fn name(&self) -> &str;

    /// Wait for the next frame
    ///
    /// Returns:
    /// - `Ok(frame)` - A frame arrived (error frames included)
    /// - `Err(e)` - The link failed; callers may [`reopen`](Self::reopen)
    async fn recv(&self) -> Result<Frame>;

    /// Transmit one frame
    async fn send(&self, frame: &Frame) -> Result<()>;

    /// Re-establish the link after a receive failure
    async fn reopen(&self) -> Result<()>;
}

/// Shared handle to a transport and the bus traffic counters.
///
/// Every successful send bumps the transmit total exactly once. The receive
/// total belongs to the ingest task, which counts only frames that pass the
/// filter.
#[derive(Clone)]
pub struct BusHandle {
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
}

impl BusHandle {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self { transport, counters: Arc::new(Counters::new()) }
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub async fn recv(&self) -> Result<Frame> {
        self.transport.recv().await
    }

    pub async fn send(&self, frame: &Frame) -> Result<()> {
        self.transport.send(frame).await?;
        self.counters.record_tx();
        Ok(())
    }

    pub async fn reopen(&self) -> Result<()> {
        self.transport.reopen().await
    }
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle")
            .field("interface", &self.name())
            .field("rx_total", &self.counters.rx_total())
            .field("tx_total", &self.counters.tx_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::loopback::LoopbackBus;
    use crate::types::FrameFormat;

    #[tokio::test]
    async fn counts_successful_sends_only() {
        let (bus, peer) = LoopbackBus::pair("vcan0");
        let handle = BusHandle::new(bus);

        peer.inject(Frame::data(FrameFormat::Standard, 0x10, &[1]).unwrap());
        peer.inject_failure("link down");
        assert!(handle.recv().await.is_ok());
        assert!(handle.recv().await.is_err());
        assert_eq!(handle.counters().rx_total(), 0);

        handle.send(&Frame::data(FrameFormat::Extended, 0x1234, &[]).unwrap()).await.unwrap();
        assert_eq!(handle.counters().tx_total(), 1);
        assert_eq!(peer.drain_sent().await.len(), 1);

        drop(peer);
        assert!(handle.send(&Frame::error(0)).await.is_err());
        assert_eq!(handle.counters().tx_total(), 1);
    }
}
