//! Coalesced raw frame log
//!
//! Every accepted frame becomes one line of text. Lines accumulate in a
//! buffer that is handed out at most once per coalescing interval, so
//! display writes stay bounded no matter how fast frames arrive.

use std::time::{Duration, Instant};

use crate::types::{Frame, render};

/// Default minimum spacing between two flushes.
pub const DEFAULT_COALESCE_INTERVAL: Duration = Duration::from_millis(250);

/// Column header matching the log lines.
pub const LOG_HEADER: &str = "ID       DLC  DATA                       ASCII";

#[derive(Debug)]
pub struct ScrollLog {
    buffer: String,
    separator: &'static str,
    last_flush: Option<Instant>,
    interval: Duration,
}

impl Default for ScrollLog {
    fn default() -> Self {
        Self::new(DEFAULT_COALESCE_INTERVAL)
    }
}

impl ScrollLog {
    pub fn new(interval: Duration) -> Self {
        Self { buffer: String::new(), separator: "", last_flush: None, interval }
    }

    /// Append `frame` and return the pending text if a flush is due.
    pub fn add(&mut self, frame: &Frame) -> Option<String> {
        self.add_at(frame, Instant::now())
    }

    pub fn add_at(&mut self, frame: &Frame, now: Instant) -> Option<String> {
        self.buffer.push_str(self.separator);
        self.buffer.push_str(&format_line(frame));
        self.separator = "\n";
        self.flush_due(now)
    }

    /// Hand out the buffer if it is non-empty and the interval has elapsed.
    ///
    /// Called on refresh ticks so the tail of a burst is not held back
    /// until the next frame arrives.
    pub fn flush_due(&mut self, now: Instant) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let due = match self.last_flush {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if !due {
            return None;
        }
        self.last_flush = Some(now);
        Some(std::mem::take(&mut self.buffer))
    }

    /// Text accumulated since the last flush.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.separator = "";
        self.last_flush = None;
    }
}

fn format_line(frame: &Frame) -> String {
    format!(
        "{:<8} [{}]  {:<25}  |{:<8}|",
        render::hex_id(frame),
        frame.dlc(),
        render::hex_payload(frame),
        render::ascii(frame.payload()),
    )
}
