//! Frame ingestion: receive pump and table/log fan-out
//!
//! Two tasks cooperate here. The receive pump owns the blocking side of the
//! transport and forwards frames over a channel, reopening the link with
//! exponential backoff when a receive fails. The ingest task owns the
//! [`FrameIngestor`] (table, log and filter) and publishes display updates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::BusError;
use crate::config::ReconnectPolicy;
use crate::filter::RangeFilter;
use crate::scroll_log::ScrollLog;
use crate::statistics::Counters;
use crate::table::{AggregationTable, TableView, Upsert};
use crate::transport::BusHandle;
use crate::types::Frame;

/// Connection state of the receive side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Connected,
    /// Reopening after a receive failure
    Reconnecting { attempt: u32 },
    /// Gave up; no more frames will arrive
    Lost,
}

/// What happened to one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// Reached the log and the table; `chunk` is a coalesced log flush, if due
    Accepted { chunk: Option<String>, upsert: Upsert },
    /// Outside the enabled identifier range
    Filtered,
    /// Bus error frame, logged and dropped
    ErrorFrame,
}

/// Display-bound log traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// Coalesced lines, in arrival order
    Chunk(String),
    /// Everything shown so far should be discarded
    Cleared,
}

/// Classifies, filters and fans frames out into the table and the log.
#[derive(Debug)]
pub struct FrameIngestor {
    table: AggregationTable,
    log: ScrollLog,
    filter: RangeFilter,
}

impl FrameIngestor {
    pub fn new(log_interval: Duration) -> Self {
        Self {
            table: AggregationTable::new(),
            log: ScrollLog::new(log_interval),
            filter: RangeFilter::disabled(),
        }
    }

    pub fn ingest(&mut self, frame: &Frame) -> Ingested {
        self.ingest_at(frame, Instant::now())
    }

    pub fn ingest_at(&mut self, frame: &Frame, now: Instant) -> Ingested {
        if frame.is_error() {
            warn!(class = format_args!("{:#010X}", frame.id()), "Error frame received");
            return Ingested::ErrorFrame;
        }
        if !self.filter.accepts(frame.id()) {
            return Ingested::Filtered;
        }
        let chunk = self.log.add_at(frame, now);
        let upsert = self.table.upsert_at(frame, now);
        Ingested::Accepted { chunk, upsert }
    }

    /// Log text held back by coalescing, if its interval has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Option<String> {
        self.log.flush_due(now)
    }

    pub fn set_filter(&mut self, filter: RangeFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> &RangeFilter {
        &self.filter
    }

    pub fn table(&self) -> &AggregationTable {
        &self.table
    }

    pub fn clear(&mut self) {
        self.table.clear();
        self.log.reset();
    }
}

/// Requests handled by the ingest task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IngestControl {
    Clear,
}

/// Sending halves the ingest task publishes to.
pub(crate) struct IngestOutputs {
    pub table: watch::Sender<Arc<TableView>>,
    pub log: mpsc::UnboundedSender<LogEvent>,
    /// Receive total, bumped once per accepted frame
    pub counters: Arc<Counters>,
}

/// Forward frames from the transport until cancelled or the link is lost.
pub(crate) async fn receive_pump(
    bus: BusHandle,
    frames: mpsc::Sender<Frame>,
    link: watch::Sender<LinkState>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
) {
    info!(interface = bus.name(), "Receive pump started");
    let mut frame_count = 0u64;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Receive pump cancelled");
                break;
            }
            result = bus.recv() => result,
        };

        match result {
            Ok(frame) => {
                frame_count += 1;
                trace!(id = frame.id(), kind = ?frame.kind(), "Frame {}", frame_count);
                if frames.send(frame).await.is_err() {
                    debug!("Ingest task gone, shutting down");
                    break;
                }
            }
            Err(e @ BusError::Parse { .. }) => {
                warn!(interface = bus.name(), "Dropping undecodable frame: {}", e);
            }
            Err(e) if !e.is_retryable() => {
                error!(interface = bus.name(), "Receive failed permanently: {}", e);
                link.send_replace(LinkState::Lost);
                break;
            }
            Err(e) => {
                error!(interface = bus.name(), "Receive failed: {}", e);
                if !reconnect(&bus, &link, &policy, &cancel).await {
                    break;
                }
            }
        }
    }

    info!("Receive pump ended ({} frames)", frame_count);
}

/// Reopen the transport with exponential backoff. Returns false when giving up.
async fn reconnect(
    bus: &BusHandle,
    link: &watch::Sender<LinkState>,
    policy: &ReconnectPolicy,
    cancel: &CancellationToken,
) -> bool {
    let mut backoff = policy.initial_backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if policy.max_attempts.is_some_and(|max| attempt > max) {
            error!(interface = bus.name(), "Giving up after {} reconnect attempts", attempt - 1);
            link.send_replace(LinkState::Lost);
            return false;
        }
        link.send_replace(LinkState::Reconnecting { attempt });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(backoff) => {}
        }

        match bus.reopen().await {
            Ok(()) => {
                info!(interface = bus.name(), attempt, "Link re-established");
                link.send_replace(LinkState::Connected);
                return true;
            }
            Err(e) => {
                warn!(interface = bus.name(), attempt, "Reopen failed: {}", e);
                backoff = (backoff * 2).min(policy.max_backoff());
            }
        }
    }
}

/// Own the ingestor and publish table snapshots and log chunks.
pub(crate) async fn ingest_task(
    mut ingestor: FrameIngestor,
    mut frames: mpsc::Receiver<Frame>,
    mut control: mpsc::UnboundedReceiver<IngestControl>,
    mut filter: watch::Receiver<RangeFilter>,
    outputs: IngestOutputs,
    refresh: Duration,
    cancel: CancellationToken,
) {
    info!("Ingest task started");
    ingestor.set_filter(*filter.borrow_and_update());

    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dirty = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(command) = control.recv() => match command {
                IngestControl::Clear => {
                    debug!("Clearing table and log");
                    ingestor.clear();
                    let _ = outputs.log.send(LogEvent::Cleared);
                    dirty = true;
                }
            },
            Ok(()) = filter.changed() => {
                let next = *filter.borrow_and_update();
                debug!(start = next.start, end = next.end, enabled = next.enabled, "Filter updated");
                ingestor.set_filter(next);
            }
            // Ahead of frames so a backlog cannot starve the refresh
            _ = ticker.tick() => {
                if let Some(chunk) = ingestor.flush_due(Instant::now()) {
                    let _ = outputs.log.send(LogEvent::Chunk(chunk));
                }
                if dirty {
                    outputs.table.send_replace(Arc::new(ingestor.table().view()));
                    dirty = false;
                }
            }
            received = frames.recv() => {
                let Some(frame) = received else {
                    debug!("Receive pump ended, stopping ingest");
                    break;
                };
                if let Ingested::Accepted { chunk, .. } = ingestor.ingest(&frame) {
                    outputs.counters.record_rx();
                    dirty = true;
                    if let Some(chunk) = chunk {
                        let _ = outputs.log.send(LogEvent::Chunk(chunk));
                    }
                }
            }
        }
    }

    // Final state for late readers
    if let Some(chunk) = ingestor.flush_due(Instant::now() + refresh.max(Duration::from_secs(1))) {
        let _ = outputs.log.send(LogEvent::Chunk(chunk));
    }
    outputs.table.send_replace(Arc::new(ingestor.table().view()));
    info!("Ingest task ended ({} rows)", ingestor.table().len());
}
