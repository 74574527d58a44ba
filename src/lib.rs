//! Live monitor and traffic generator for CAN buses.
//!
//! canscope receives frames from a CAN interface, keeps a per-identifier
//! aggregation table and a scrolling log, computes per-second traffic
//! statistics, and transmits frames once, periodically or randomly.
//!
//! # Features
//!
//! - **SocketCAN**: raw sockets on Linux behind the `socketcan` feature
//! - **Loopback bus**: an in-process bus for demos and tests on any platform
//! - **Reconnect**: receive failures reopen the link with exponential backoff
//! - **Channels, not locks**: displays read `watch`/`mpsc` receivers and send [`Command`]s
//!
//! ## Example (loopback)
//!
//! ```rust,no_run
//! use canscope::{CanScope, Command, MonitorConfig};
//! use canscope::types::{Frame, FrameFormat};
//!
//! #[tokio::main]
//! async fn main() -> canscope::Result<()> {
//!     let (monitor, mut channels, peer) = CanScope::loopback(&MonitorConfig::default())?;
//!     peer.inject(Frame::data(FrameFormat::Standard, 0x123, &[1, 2, 3]).unwrap());
//!
//!     channels.table.changed().await.ok();
//!     for line in channels.table.borrow().lines() {
//!         println!("{line}");
//!     }
//!     monitor.execute(Command::Clear).await.ok();
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Input handling
pub mod config;
pub mod filter;
pub mod input;

// Frame processing
pub mod ingest;
pub mod scroll_log;
pub mod statistics;
pub mod stream;
pub mod table;
pub mod tx;

// Bus access
pub mod discovery;
pub mod monitor;
pub mod transport;
pub mod transports;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use config::MonitorConfig;
pub use discovery::{BusParameters, InterfaceList};
pub use filter::RangeFilter;
pub use ingest::{LinkState, LogEvent};
pub use monitor::{Command, Monitor, MonitorChannels};
pub use statistics::StatSnapshot;
pub use table::TableView;
pub use transport::{BusHandle, Transport};
pub use transports::loopback::{LoopbackBus, LoopbackPeer};
pub use tx::TxForm;

/// A monitor attached to a real interface, with what discovery found.
pub struct Session {
    pub monitor: Monitor,
    pub channels: MonitorChannels,
    pub interfaces: InterfaceList,
    pub parameters: BusParameters,
}

/// Entry point for starting a monitor.
pub struct CanScope;

impl CanScope {
    /// Discover `config.interface`, check that it is up and start monitoring it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The interface is not a `can` or `vcan` link
    /// - The interface is down
    /// - The raw socket cannot be bound
    /// - The crate was built without the `socketcan` feature or not for Linux
    pub async fn connect(config: &MonitorConfig) -> Result<Session> {
        let interfaces = discovery::list_interfaces().await?;
        discovery::ensure_up(&config.interface, &interfaces).await?;
        let parameters = discovery::read_parameters(&config.interface, &interfaces).await;
        let bus = open_socketcan(&config.interface)?;
        let (monitor, channels) = Monitor::spawn(bus, config)?;
        Ok(Session { monitor, channels, interfaces, parameters })
    }

    /// Monitor an in-process bus named after `config.interface`.
    ///
    /// The returned peer plays the rest of the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn loopback(config: &MonitorConfig) -> Result<(Monitor, MonitorChannels, LoopbackPeer)> {
        let (bus, peer) = LoopbackBus::pair(config.interface.clone());
        let (monitor, channels) = Monitor::spawn(BusHandle::new(bus), config)?;
        Ok((monitor, channels, peer))
    }
}

#[cfg(all(target_os = "linux", feature = "socketcan"))]
fn open_socketcan(interface: &str) -> Result<BusHandle> {
    transports::socketcan::SocketCanTransport::open(interface).map(BusHandle::new)
}

#[cfg(not(all(target_os = "linux", feature = "socketcan")))]
fn open_socketcan(_interface: &str) -> Result<BusHandle> {
    Err(BusError::unsupported_platform("SocketCAN", "Linux with the `socketcan` feature"))
}
