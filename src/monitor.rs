//! Monitor: spawns and owns the processing tasks for one bus
//!
//! ```text
//!  transport ──▶ receive pump ──mpsc──▶ ingest task ──watch──▶ table view
//!      ▲              │                     └──────mpsc──────▶ log events
//!      │              └──watch──▶ link state
//!   tx jobs ──▶ indicator ──▶ blinker ──watch──▶ tx active
//!   counters ──▶ statistics task ──watch──▶ snapshots
//! ```
//!
//! The display side only reads channels and sends [`Command`]s.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::filter::RangeFilter;
use crate::ingest::{self, FrameIngestor, IngestControl, IngestOutputs, LinkState, LogEvent};
use crate::statistics::{Counters, StatSnapshot, StatisticsEngine};
use crate::stream::ThrottleExt;
use crate::table::TableView;
use crate::transport::BusHandle;
use crate::tx::{self, TxForm, TxIndicator, TxScheduler};
use crate::types::{Frame, UpdateRate};
use crate::{CommandError, Result, ValidationError};

/// Operator actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the receive filter from form text; blank bounds keep their value
    SetFilter { start: String, end: String, enabled: bool },
    /// Empty the table and log and reset statistics
    Clear,
    /// Store new transmit form contents
    EditForm(TxForm),
    /// Send the current form once
    SendOnce,
    /// Send the current form every `period`, re-reading it each tick
    StartPeriodic { period: Duration },
    /// Send random frames in the form's identifier format every `period`
    StartRandomized { period: Duration },
    /// Stop every repeating transmission
    Stop,
}

/// Display-side ends of the monitor's channels.
pub struct MonitorChannels {
    /// Latest table snapshot
    pub table: watch::Receiver<Arc<TableView>>,
    /// Log chunks, never dropped
    pub log: mpsc::UnboundedReceiver<LogEvent>,
    /// One snapshot per statistics tick; `None` before the first
    pub stats: watch::Receiver<Option<StatSnapshot>>,
    /// Transmit indicator, changes at most once per blink period
    pub tx_active: watch::Receiver<bool>,
    pub link: watch::Receiver<LinkState>,
    table_hz: f64,
}

type BoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

impl MonitorChannels {
    /// Table snapshots, optionally rate-limited below the refresh rate.
    pub fn table_updates(&self, rate: UpdateRate) -> BoxedStream<Arc<TableView>> {
        let updates = WatchStream::new(self.table.clone());
        match rate.throttle_interval(self.table_hz) {
            None => updates.boxed(),
            Some(interval) => updates.throttle(interval).boxed(),
        }
    }

    /// Statistics snapshots as they are produced.
    pub fn stat_updates(&self) -> BoxedStream<StatSnapshot> {
        WatchStream::from_changes(self.stats.clone()).filter_map(|snapshot| async move { snapshot }).boxed()
    }
}

/// Handle to a running monitor. Dropping it stops every task.
pub struct Monitor {
    bus: BusHandle,
    scheduler: TxScheduler,
    form: watch::Sender<TxForm>,
    filter: watch::Sender<RangeFilter>,
    ingest_control: mpsc::UnboundedSender<IngestControl>,
    stats_control: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
}

impl Monitor {
    /// Spawn the receive, ingest, statistics and blinker tasks for `bus`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails [`MonitorConfig::validate`]; no task
    /// is started in that case.
    pub fn spawn(bus: BusHandle, config: &MonitorConfig) -> Result<(Self, MonitorChannels)> {
        config.validate()?;
        let cancel = CancellationToken::new();

        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(config.frame_queue);
        let (table_tx, table_rx) = watch::channel(Arc::new(TableView::default()));
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = watch::channel(LinkState::Connected);
        let (stats_tx, stats_rx) = watch::channel(None);
        let (active_tx, active_rx) = watch::channel(false);
        let (filter_tx, filter_rx) = watch::channel(config.filter);
        let (form_tx, _) = watch::channel(TxForm::default());
        let (ingest_control, ingest_control_rx) = mpsc::unbounded_channel();
        let (stats_control, stats_control_rx) = mpsc::unbounded_channel();

        tokio::spawn(ingest::receive_pump(bus.clone(), frame_tx, link_tx, config.reconnect, cancel.clone()));
        tokio::spawn(ingest::ingest_task(
            FrameIngestor::new(config.log_interval()),
            frame_rx,
            ingest_control_rx,
            filter_rx,
            IngestOutputs { table: table_tx, log: log_tx, counters: Arc::clone(bus.counters()) },
            config.table_refresh(),
            cancel.clone(),
        ));
        tokio::spawn(statistics_task(
            Arc::clone(bus.counters()),
            stats_tx,
            stats_control_rx,
            config.stats_interval(),
            cancel.clone(),
        ));

        let indicator = Arc::new(TxIndicator::new());
        tokio::spawn(tx::blinker(Arc::clone(&indicator), active_tx, config.blink_interval(), cancel.clone()));
        let scheduler = TxScheduler::new(bus.clone(), indicator, cancel.clone());

        info!(interface = bus.name(), "Monitor started");

        let monitor = Self {
            bus,
            scheduler,
            form: form_tx,
            filter: filter_tx,
            ingest_control,
            stats_control,
            cancel,
        };
        let channels = MonitorChannels {
            table: table_rx,
            log: log_rx,
            stats: stats_rx,
            tx_active: active_rx,
            link: link_rx,
            table_hz: 1000.0 / config.table_refresh_ms as f64,
        };
        Ok((monitor, channels))
    }

    /// Apply one operator command.
    ///
    /// Rejected input leaves all state unchanged.
    pub async fn execute(&self, command: Command) -> Result<(), CommandError> {
        debug!(?command, "Executing command");
        match command {
            Command::SetFilter { start, end, enabled } => {
                let next = self.filter.borrow().with_input(&start, &end, enabled)?;
                self.filter.send_replace(next);
            }
            Command::Clear => {
                let _ = self.ingest_control.send(IngestControl::Clear);
                let _ = self.stats_control.send(());
            }
            Command::EditForm(form) => {
                self.form.send_replace(form);
            }
            Command::SendOnce => {
                let frame = self.form.borrow().build()?;
                self.scheduler.send_once(&frame).await?;
            }
            Command::StartPeriodic { period } => {
                let period = checked_period(period)?;
                let form = self.form.subscribe();
                self.scheduler.start_periodic(move || form.borrow().build(), period);
            }
            Command::StartRandomized { period } => {
                let period = checked_period(period)?;
                let format = self.form.borrow().format;
                self.scheduler.start_randomized(format, period);
            }
            Command::Stop => self.scheduler.stop(),
        }
        Ok(())
    }

    pub fn interface(&self) -> &str {
        self.bus.name()
    }

    pub fn filter(&self) -> RangeFilter {
        *self.filter.borrow()
    }

    pub fn form(&self) -> TxForm {
        self.form.borrow().clone()
    }

    pub fn counters(&self) -> &Arc<Counters> {
        self.bus.counters()
    }

    pub fn active_jobs(&self) -> usize {
        self.scheduler.active_jobs()
    }

    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!(interface = self.bus.name(), "Monitor shutting down");
            self.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn checked_period(period: Duration) -> Result<Duration, ValidationError> {
    if period.is_zero() {
        return Err(ValidationError::InvalidPeriod { input: format!("{}", period.as_millis()) });
    }
    Ok(period)
}

/// Sample the shared counters once per `period`. A clear request resets the
/// counters and the engine between two samples.
async fn statistics_task(
    counters: Arc<Counters>,
    out: watch::Sender<Option<StatSnapshot>>,
    mut clear: mpsc::UnboundedReceiver<()>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut engine = StatisticsEngine::new();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(()) = clear.recv() => {
                debug!("Statistics cleared");
                engine.clear(&counters);
            }
            _ = ticker.tick() => {
                out.send_replace(Some(engine.tick(&counters)));
            }
        }
    }
}
