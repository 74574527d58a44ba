//! Throughput statistics sampled on a fixed interval
//!
//! [`Counters`] are bumped by the ingest task for every frame that passes the
//! filter and by the bus handle on every successful send. [`StatisticsEngine`] turns the cumulative totals into
//! per-tick deltas, running maxima and running averages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cumulative frame counters shared by the ingest task, the bus handle and the sampler.
#[derive(Debug, Default)]
pub struct Counters {
    rx_total: AtomicU64,
    tx_total: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rx(&self) {
        self.rx_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self) {
        self.tx_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rx_total(&self) -> u64 {
        self.rx_total.load(Ordering::Relaxed)
    }

    pub fn tx_total(&self) -> u64 {
        self.tx_total.load(Ordering::Relaxed)
    }

    /// Zero both totals. Only [`StatisticsEngine::clear`] should call this,
    /// so the engine's previous totals are reset in the same step.
    fn reset(&self) {
        self.rx_total.store(0, Ordering::Relaxed);
        self.tx_total.store(0, Ordering::Relaxed);
    }
}

/// Derived rates for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionStats {
    pub total: u64,
    pub last_sec: u64,
    pub max_sec: u64,
    pub avg_sec: u64,
}

/// Statistics as of one sampler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatSnapshot {
    pub rx: DirectionStats,
    pub tx: DirectionStats,
    /// Number of the tick that produced this snapshot, starting at 1
    pub tick: u64,
}

impl fmt::Display for StatSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics                 RX           TX")?;
        writeln!(f, "Number of Frames:{:12} {:12}", self.rx.total, self.tx.total)?;
        writeln!(f, "Last Sec Frames: {:12} {:12}", self.rx.last_sec, self.tx.last_sec)?;
        writeln!(f, "Max Frames/s:    {:12} {:12}", self.rx.max_sec, self.tx.max_sec)?;
        writeln!(f, "Ave Frames/s:    {:12} {:12}", self.rx.avg_sec, self.tx.avg_sec)
    }
}

#[derive(Debug, Default)]
struct Direction {
    prev_total: u64,
    max_sec: u64,
}

impl Direction {
    fn sample(&mut self, total: u64, ticks: u64) -> DirectionStats {
        // A clear racing a tick can leave total below prev_total for one sample
        let last_sec = total.saturating_sub(self.prev_total);
        self.prev_total = total;
        self.max_sec = self.max_sec.max(last_sec);
        DirectionStats { total, last_sec, max_sec: self.max_sec, avg_sec: total / ticks }
    }
}

/// Turns cumulative counters into per-second rates.
#[derive(Debug)]
pub struct StatisticsEngine {
    rx: Direction,
    tx: Direction,
    ticks: u64,
}

impl Default for StatisticsEngine {
    fn default() -> Self {
        Self { rx: Direction::default(), tx: Direction::default(), ticks: 1 }
    }
}

impl StatisticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the shared counters.
    pub fn tick(&mut self, counters: &Counters) -> StatSnapshot {
        self.tick_with(counters.rx_total(), counters.tx_total())
    }

    /// Sample explicit totals.
    pub fn tick_with(&mut self, rx_total: u64, tx_total: u64) -> StatSnapshot {
        let snapshot = StatSnapshot {
            rx: self.rx.sample(rx_total, self.ticks),
            tx: self.tx.sample(tx_total, self.ticks),
            tick: self.ticks,
        };
        self.ticks += 1;
        snapshot
    }

    /// Elapsed tick counter; the next average divides by this.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reset derived state and the shared totals together.
    pub fn clear(&mut self, counters: &Counters) {
        counters.reset();
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_follow_cumulative_totals() {
        let mut engine = StatisticsEngine::new();
        let snapshots: Vec<_> = [0, 10, 25].iter().map(|&rx| engine.tick_with(rx, 0)).collect();

        assert_eq!(snapshots[1].rx.last_sec, 10);
        assert_eq!(snapshots[2].rx.last_sec, 15);
        assert_eq!(snapshots[2].rx.max_sec, 15);
        assert_eq!(snapshots[2].tick, 3);
        // 25 frames over 3 ticks
        assert_eq!(snapshots[2].rx.avg_sec, 8);
    }

    #[test]
    fn first_average_divides_by_one() {
        let mut engine = StatisticsEngine::new();
        let snapshot = engine.tick_with(7, 3);
        assert_eq!(snapshot.rx.avg_sec, 7);
        assert_eq!(snapshot.tx.avg_sec, 3);
        assert_eq!(engine.ticks(), 2);
    }

    #[test]
    fn maximum_is_sticky() {
        let mut engine = StatisticsEngine::new();
        engine.tick_with(0, 0);
        engine.tick_with(0, 50);
        let snapshot = engine.tick_with(0, 60);
        assert_eq!(snapshot.tx.last_sec, 10);
        assert_eq!(snapshot.tx.max_sec, 50);
    }

    #[test]
    fn clear_resets_engine_and_counters() {
        let counters = Counters::new();
        let mut engine = StatisticsEngine::new();
        for _ in 0..30 {
            counters.record_rx();
        }
        counters.record_tx();
        engine.tick(&counters);
        engine.tick(&counters);

        engine.clear(&counters);
        assert_eq!(counters.rx_total(), 0);
        assert_eq!(engine.ticks(), 1);

        counters.record_rx();
        let snapshot = engine.tick(&counters);
        assert_eq!(snapshot.rx.last_sec, 1);
        assert_eq!(snapshot.rx.max_sec, 1);
        assert_eq!(snapshot.tx.total, 0);
    }

    #[test]
    fn display_is_aligned() {
        let mut engine = StatisticsEngine::new();
        let text = engine.tick_with(12, 3).to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "Number of Frames:          12            3");
        assert!(lines[1..].iter().all(|line| line.len() == lines[1].len()));
    }
}
