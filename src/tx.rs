//! Transmit side: the send form, repeating jobs and the activity indicator
//!
//! Repeating jobs are plain tokio tasks ticking on an interval. They share a
//! *stop generation*: one [`CancellationToken`] that every running job
//! watches. [`TxScheduler::stop`] cancels the current generation and installs
//! a fresh token, so jobs started afterwards are unaffected. A job checks for
//! cancellation between ticks only; a send already in flight completes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::input::{parse_hex_byte, parse_hex_id, parse_length};
use crate::transport::BusHandle;
use crate::types::{Frame, FrameFormat, MAX_DLC};
use crate::{Result, ValidationError};

/// Operator-editable transmit form, kept as raw text until a send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxForm {
    /// Hexadecimal identifier
    pub id: String,
    pub format: FrameFormat,
    pub remote: bool,
    /// Decimal DLC, 0 to 8
    pub length: String,
    /// Hexadecimal bytes; only the first `length` are read
    pub data: [String; 8],
}

impl TxForm {
    /// Validate the fields and build the frame to send.
    pub fn build(&self) -> std::result::Result<Frame, ValidationError> {
        let id = parse_hex_id("identifier", &self.id)?;
        let len = parse_length(&self.length)?;
        if self.remote {
            return Frame::remote(self.format, id, len);
        }

        let mut payload = [0u8; MAX_DLC];
        for (index, (byte, text)) in payload.iter_mut().zip(&self.data).take(len as usize).enumerate() {
            *byte = parse_hex_byte(index, text)?;
        }
        Frame::data(self.format, id, &payload[..len as usize])
    }
}

/// Random data frame with a uniform identifier in the format's range and a
/// uniform length in 0..=8.
pub fn random_frame<R: Rng + ?Sized>(
    rng: &mut R,
    format: FrameFormat,
) -> std::result::Result<Frame, ValidationError> {
    let id = rng.gen_range(0..format.id_limit());
    let len = rng.gen_range(0..=MAX_DLC);
    let mut payload = [0u8; MAX_DLC];
    rng.fill(&mut payload[..len]);
    Frame::data(format, id, &payload[..len])
}

/// Latching "a send happened" flag sampled by the blinker.
#[derive(Debug, Default)]
pub struct TxIndicator {
    pending: AtomicBool,
}

impl TxIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note one transmission.
    pub fn trigger(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Read and reset the flag.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Publish the indicator state once per `period`, only when it changes.
pub(crate) async fn blinker(
    indicator: Arc<TxIndicator>,
    out: watch::Sender<bool>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let active = indicator.take();
                out.send_if_modified(|shown| {
                    let changed = *shown != active;
                    *shown = active;
                    changed
                });
            }
        }
    }
}

/// Keeps `active` in step with live jobs, including panicked ones.
struct ActiveJob(Arc<AtomicUsize>);

impl ActiveJob {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sends single frames and runs repeating transmit jobs.
#[derive(Debug, Clone)]
pub struct TxScheduler {
    bus: BusHandle,
    indicator: Arc<TxIndicator>,
    generation: Arc<Mutex<CancellationToken>>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl TxScheduler {
    /// Jobs also end when `shutdown` is cancelled.
    pub fn new(bus: BusHandle, indicator: Arc<TxIndicator>, shutdown: CancellationToken) -> Self {
        let generation = Arc::new(Mutex::new(shutdown.child_token()));
        Self { bus, indicator, generation, shutdown, active: Arc::new(AtomicUsize::new(0)) }
    }

    pub async fn send_once(&self, frame: &Frame) -> Result<()> {
        self.indicator.trigger();
        self.bus.send(frame).await
    }

    /// Send `build()` every `period`, re-reading it each tick.
    ///
    /// Ticks whose build fails are skipped without sending.
    pub fn start_periodic<F>(&self, build: F, period: Duration) -> JoinHandle<()>
    where
        F: Fn() -> std::result::Result<Frame, ValidationError> + Send + 'static,
    {
        info!(period_ms = period.as_millis() as u64, "Starting periodic transmit");
        self.spawn_job("periodic", period, move || build().ok())
    }

    /// Send a fresh random frame every `period`.
    pub fn start_randomized(&self, format: FrameFormat, period: Duration) -> JoinHandle<()> {
        info!(period_ms = period.as_millis() as u64, ?format, "Starting random transmit");
        let mut rng = StdRng::from_entropy();
        self.spawn_job("random", period, move || random_frame(&mut rng, format).ok())
    }

    /// End every job running now. Jobs started later are not affected.
    pub fn stop(&self) {
        let mut current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = self.shutdown.child_token();
        debug!(active = self.active_jobs(), "Transmit jobs signalled to stop");
    }

    /// Jobs that have not yet observed a stop.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    fn spawn_job<F>(&self, mode: &'static str, period: Duration, mut next_frame: F) -> JoinHandle<()>
    where
        F: FnMut() -> Option<Frame> + Send + 'static,
    {
        let token = self.generation.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let guard = ActiveJob::enter(&self.active);
        let bus = self.bus.clone();
        let indicator = Arc::clone(&self.indicator);

        tokio::spawn(async move {
            let _guard = guard;
            // First send one period after the start
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(frame) = next_frame() else { continue };
                indicator.trigger();
                match bus.send(&frame).await {
                    Ok(()) => sent += 1,
                    Err(e) => warn!(mode, id = frame.id(), "Transmit failed: {}", e),
                }
            }

            debug!(mode, sent, "Transmit job stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::loopback::{LoopbackBus, LoopbackPeer};
    use crate::types::{EXTENDED_ID_LIMIT, STANDARD_ID_LIMIT};

    fn scheduler() -> (TxScheduler, LoopbackPeer) {
        let (bus, peer) = LoopbackBus::pair("vcan0");
        let scheduler =
            TxScheduler::new(BusHandle::new(bus), Arc::new(TxIndicator::new()), CancellationToken::new());
        (scheduler, peer)
    }

    fn form(id: &str, format: FrameFormat, length: &str, data: &[&str]) -> TxForm {
        let mut form = TxForm { id: id.into(), format, length: length.into(), ..TxForm::default() };
        for (slot, text) in form.data.iter_mut().zip(data) {
            *slot = text.to_string();
        }
        form
    }

    #[test]
    fn form_identifier_range_follows_format() {
        let standard = form("900", FrameFormat::Standard, "0", &[]);
        assert_eq!(standard.build(), Err(ValidationError::IdOutOfRange { id: 0x900, limit: 0x800 }));

        let extended = form("900", FrameFormat::Extended, "0", &[]);
        assert_eq!(extended.build().unwrap().id(), 0x900);
    }

    #[test]
    fn form_reads_only_length_bytes() {
        let frame = form("7FF", FrameFormat::Standard, "2", &["01", "a", "zz"]).build().unwrap();
        assert_eq!(frame.payload(), &[0x01, 0x0A]);
    }

    #[test]
    fn form_rejects_bad_bytes_and_lengths() {
        let bad_byte = form("1", FrameFormat::Standard, "2", &["01", "xyz"]);
        assert!(matches!(bad_byte.build(), Err(ValidationError::InvalidByte { index: 1, .. })));

        let bad_length = form("1", FrameFormat::Standard, "9", &[]);
        assert!(matches!(bad_length.build(), Err(ValidationError::InvalidLength { .. })));
    }

    #[test]
    fn remote_form_ignores_data() {
        let remote = TxForm { remote: true, ..form("123", FrameFormat::Standard, "4", &["zz"]) };
        let frame = remote.build().unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.dlc(), 4);
        assert!(frame.payload().is_empty());
    }

    #[test]
    fn random_frames_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let standard = random_frame(&mut rng, FrameFormat::Standard).unwrap();
            assert!(standard.id() < STANDARD_ID_LIMIT);
            assert!(standard.dlc() <= 8);
            assert!(!standard.is_error());

            let extended = random_frame(&mut rng, FrameFormat::Extended).unwrap();
            assert!(extended.id() < EXTENDED_ID_LIMIT);
        }
    }

    #[test]
    fn indicator_latches_until_taken() {
        let indicator = TxIndicator::new();
        assert!(!indicator.take());
        indicator.trigger();
        indicator.trigger();
        assert!(indicator.take());
        assert!(!indicator.take());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_job_sends_every_period() {
        let (scheduler, peer) = scheduler();
        let frame = Frame::data(FrameFormat::Standard, 0x100, &[1, 2]).unwrap();

        scheduler.start_periodic(move || Ok(frame), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let sent = peer.drain_sent().await;
        assert!(sent.len() >= 9, "only {} frames sent", sent.len());
        assert!(sent.iter().all(|f| *f == frame));
        assert_eq!(scheduler.bus.counters().tx_total(), sent.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn first_send_waits_one_period() {
        let (scheduler, peer) = scheduler();
        let frame = Frame::data(FrameFormat::Standard, 0x7FF, &[]).unwrap();

        scheduler.start_periodic(move || Ok(frame), Duration::from_millis(100));
        scheduler.start_randomized(FrameFormat::Standard, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.drain_sent().await.is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(peer.drain_sent().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_ticks_are_skipped() {
        let (scheduler, peer) = scheduler();
        let form = form("FFF", FrameFormat::Standard, "0", &[]);

        let job = scheduler.start_periodic(move || form.build(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();
        job.await.unwrap();

        assert!(peer.drain_sent().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_all_jobs_and_spares_later_ones() {
        let (scheduler, peer) = scheduler();
        let first = scheduler.start_randomized(FrameFormat::Standard, Duration::from_millis(20));
        let second = scheduler.start_randomized(FrameFormat::Extended, Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.active_jobs(), 2);

        scheduler.stop();
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(scheduler.active_jobs(), 0);

        peer.drain_sent().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.drain_sent().await.is_empty());

        let frame = Frame::data(FrameFormat::Standard, 0x1, &[]).unwrap();
        scheduler.start_periodic(move || Ok(frame), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!peer.drain_sent().await.is_empty());
        assert_eq!(scheduler.active_jobs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blinker_publishes_changes_only() {
        let indicator = Arc::new(TxIndicator::new());
        let (tx, mut rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        tokio::spawn(blinker(Arc::clone(&indicator), tx, Duration::from_millis(500), cancel.clone()));

        indicator.trigger();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(*rx.borrow_and_update());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!*rx.borrow_and_update());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!rx.has_changed().unwrap());
        cancel.cancel();
    }
}
