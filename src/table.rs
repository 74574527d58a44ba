//! Live frame table: one row per identifier, kept in ascending order
//!
//! The table is owned by the ingest task. Displays read [`TableView`]
//! snapshots published by the monitor, or any other [`TabularSource`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::types::{Frame, render};

/// Column header matching [`Row::text`].
pub const TABLE_HEADER: &str = "ID       DLC  DATA                       Period  Count  ASCII";

/// Generic single-column tabular data source for displays.
pub trait TabularSource {
    fn row_count(&self) -> usize;

    /// Always 1: each row is rendered as a single line of text.
    fn column_count(&self) -> usize {
        1
    }

    /// Cell text, or `None` for out-of-range coordinates.
    fn cell(&self, row: usize, column: usize) -> Option<&str>;
}

/// Aggregated state for one identifier.
#[derive(Debug, Clone)]
pub struct Row {
    frame: Frame,
    period_ms: u64,
    last: Instant,
    count: u64,
    text: String,
}

impl Row {
    fn new(frame: Frame, now: Instant) -> Self {
        let mut row = Self { frame, period_ms: 0, last: now, count: 1, text: String::new() };
        row.render();
        row
    }

    fn update(&mut self, frame: Frame, now: Instant) {
        self.count += 1;
        self.frame = frame;
        self.period_ms = now.saturating_duration_since(self.last).as_millis() as u64;
        self.last = now;
        self.render();
    }

    fn render(&mut self) {
        self.text = format!(
            "{:<8} [{}]  {:<25} {:>7} {:>6}  |{:<8}|",
            render::hex_id(&self.frame),
            self.frame.dlc(),
            render::hex_payload(&self.frame),
            self.period_ms,
            self.count,
            render::ascii(self.frame.payload()),
        );
    }

    pub fn id(&self) -> u32 {
        self.frame.id()
    }

    /// Most recent frame seen for this identifier.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Milliseconds between the two most recent occurrences, 0 after the first.
    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn last(&self) -> Instant {
        self.last
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Outcome of [`AggregationTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new row was inserted at this position
    Inserted(usize),
    /// The existing row at this position was updated
    Updated(usize),
    /// Error frames never enter the table
    Discarded,
}

/// Identifier-sorted table with an id→position index.
#[derive(Debug, Default)]
pub struct AggregationTable {
    rows: Vec<Row>,
    index: HashMap<u32, usize>,
}

impl AggregationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the row for `frame.id()`, stamped with the current time.
    pub fn upsert(&mut self, frame: &Frame) -> Upsert {
        self.upsert_at(frame, Instant::now())
    }

    /// Insert or update the row for `frame.id()` as of `now`.
    pub fn upsert_at(&mut self, frame: &Frame, now: Instant) -> Upsert {
        if frame.is_error() {
            return Upsert::Discarded;
        }

        if let Some(&pos) = self.index.get(&frame.id()) {
            self.rows[pos].update(*frame, now);
            return Upsert::Updated(pos);
        }

        let pos = self.insert_position(frame.id());
        self.rows.insert(pos, Row::new(*frame, now));
        self.rebuild_index();
        Upsert::Inserted(pos)
    }

    /// Position for an identifier known to be absent.
    ///
    /// The cases are decided against the bounds before any mutation, so a
    /// new minimum is only ever prepended once.
    fn insert_position(&self, id: u32) -> usize {
        match self.rows.as_slice() {
            [] => 0,
            [only] => {
                if id < only.id() {
                    0
                } else {
                    1
                }
            }
            [first, .., last] => {
                if id < first.id() {
                    0
                } else if id > last.id() {
                    self.rows.len()
                } else {
                    // rows[i-1].id < id < rows[i].id
                    self.rows.partition_point(|row| row.id() < id)
                }
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        self.index.extend(self.rows.iter().enumerate().map(|(pos, row)| (row.id(), pos)));
    }

    pub fn contains(&self, id: u32) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Row> {
        self.index.get(&id).map(|&pos| &self.rows[pos])
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.index.clear();
    }

    /// Immutable snapshot of the rendered rows for a display.
    pub fn view(&self) -> TableView {
        TableView { rows: self.rows.iter().map(|row| Arc::<str>::from(row.text())).collect() }
    }
}

impl TabularSource for AggregationTable {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, row: usize, column: usize) -> Option<&str> {
        if column > 0 {
            return None;
        }
        self.rows.get(row).map(Row::text)
    }
}

/// Rendered table snapshot handed to displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableView {
    rows: Vec<Arc<str>>,
}

impl TableView {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl TabularSource for TableView {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, row: usize, column: usize) -> Option<&str> {
        if column > 0 {
            return None;
        }
        self.rows.get(row).map(|text| text.as_ref())
    }
}
