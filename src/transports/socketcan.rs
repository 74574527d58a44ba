//! SocketCAN transport for Linux

use std::sync::{Arc, Mutex, PoisonError};

use ::socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};
use tracing::{debug, info};

use crate::transport::Transport;
use crate::types::{Frame, FrameFormat, FrameKind};
use crate::{BusError, Result};

/// Raw CAN socket bound to one interface
pub struct SocketCanTransport {
    name: String,
    socket: Mutex<Arc<CanSocket>>,
}

impl SocketCanTransport {
    /// Bind a raw CAN socket to `interface`
    pub fn open(interface: &str) -> Result<Self> {
        let socket = bind(interface)?;
        info!(interface, "SocketCAN socket bound");
        Ok(Self { name: interface.to_string(), socket: Mutex::new(Arc::new(socket)) })
    }

    fn current(&self) -> Arc<CanSocket> {
        Arc::clone(&self.socket.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn bind(interface: &str) -> Result<CanSocket> {
    CanSocket::open(interface).map_err(|e| {
        BusError::connection_failed_with_source(interface, "error binding raw CAN socket", Box::new(e))
    })
}

#[async_trait::async_trait]
impl Transport for SocketCanTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn recv(&self) -> Result<Frame> {
        let socket = self.current();
        let raw = tokio::task::spawn_blocking(move || socket.read_frame())
            .await
            .map_err(|e| BusError::connection_failed(&self.name, format!("receive task failed: {e}")))?
            .map_err(|source| BusError::Receive { interface: self.name.clone(), source })?;
        from_socketcan(raw).map_err(|e| BusError::parse_error("received frame", e.to_string()))
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        let raw = to_socketcan(frame).ok_or_else(|| {
            BusError::parse_error("outgoing frame", format!("cannot encode id {:#X}", frame.id()))
        })?;
        let socket = self.current();
        tokio::task::spawn_blocking(move || socket.write_frame(&raw))
            .await
            .map_err(|e| BusError::connection_failed(&self.name, format!("send task failed: {e}")))?
            .map_err(|source| BusError::Send { interface: self.name.clone(), source })
    }

    async fn reopen(&self) -> Result<()> {
        let name = self.name.clone();
        let socket = tokio::task::spawn_blocking(move || bind(&name))
            .await
            .map_err(|e| BusError::connection_failed(&self.name, format!("reopen task failed: {e}")))??;
        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(socket);
        debug!(interface = %self.name, "SocketCAN socket rebound");
        Ok(())
    }
}

fn split_id(id: Id) -> (FrameFormat, u32) {
    match id {
        Id::Standard(id) => (FrameFormat::Standard, id.as_raw() as u32),
        Id::Extended(id) => (FrameFormat::Extended, id.as_raw()),
    }
}

fn from_socketcan(raw: CanFrame) -> std::result::Result<Frame, crate::ValidationError> {
    match raw {
        CanFrame::Data(frame) => {
            let (format, id) = split_id(EmbeddedFrame::id(&frame));
            Frame::data(format, id, EmbeddedFrame::data(&frame))
        }
        CanFrame::Remote(frame) => {
            let (format, id) = split_id(EmbeddedFrame::id(&frame));
            Frame::remote(format, id, EmbeddedFrame::dlc(&frame) as u8)
        }
        CanFrame::Error(frame) => Ok(Frame::error(::socketcan::Frame::raw_id(&frame))),
    }
}

fn to_socketcan(frame: &Frame) -> Option<CanFrame> {
    let id: Id = match frame.kind().format()? {
        FrameFormat::Standard => StandardId::new(frame.id() as u16)?.into(),
        FrameFormat::Extended => ExtendedId::new(frame.id())?.into(),
    };
    match frame.kind() {
        FrameKind::StandardRemote | FrameKind::ExtendedRemote => {
            CanFrame::new_remote(id, frame.dlc() as usize)
        }
        _ => CanFrame::new(id, frame.payload()),
    }
}
