//! Inbound identifier range filter

use serde::{Deserialize, Serialize};

use crate::ValidationError;
use crate::input::parse_hex_id;

/// Inclusive identifier range, applied to received frames only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub start: u32,
    pub end: u32,
    pub enabled: bool,
}

impl RangeFilter {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end, enabled: true }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn accepts(&self, id: u32) -> bool {
        !self.enabled || (id >= self.start && id <= self.end)
    }

    /// Build the next filter from the operator's form fields.
    ///
    /// Blank fields keep the current bound. Any malformed field rejects the
    /// whole edit and leaves `self` as it was.
    pub fn with_input(&self, start: &str, end: &str, enabled: bool) -> Result<Self, ValidationError> {
        let start = match start.trim() {
            "" => self.start,
            text => parse_hex_id("start identifier", text)?,
        };
        let end = match end.trim() {
            "" => self.end,
            text => parse_hex_id("end identifier", text)?,
        };
        if enabled && start > end {
            return Err(ValidationError::InvertedRange { start, end });
        }
        Ok(Self { start, end, enabled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_range_is_inclusive() {
        let filter = RangeFilter::new(0x100, 0x1FF);
        assert!(filter.accepts(0x150));
        assert!(filter.accepts(0x100));
        assert!(filter.accepts(0x1FF));
        assert!(!filter.accepts(0x200));
        assert!(!filter.accepts(0x0FF));
    }

    #[test]
    fn disabled_accepts_everything() {
        let filter = RangeFilter { enabled: false, ..RangeFilter::new(0x100, 0x1FF) };
        assert!(filter.accepts(0x150));
        assert!(filter.accepts(0x200));
        assert!(RangeFilter::disabled().accepts(u32::MAX));
    }

    #[test]
    fn form_input_is_hex_only() {
        let current = RangeFilter::disabled();
        let next = current.with_input("100", "1ff", true).unwrap();
        assert_eq!(next, RangeFilter::new(0x100, 0x1FF));

        assert!(matches!(
            next.with_input("zz", "1ff", true),
            Err(ValidationError::InvalidHex { field: "start identifier", .. })
        ));
        assert!(next.with_input("100", "200", true).is_ok());
    }

    #[test]
    fn blank_fields_keep_previous_bounds() {
        let current = RangeFilter::new(0x10, 0x20);
        let next = current.with_input("", " ", false).unwrap();
        assert_eq!((next.start, next.end, next.enabled), (0x10, 0x20, false));
    }

    #[test]
    fn inverted_range_is_rejected_when_enabled() {
        let current = RangeFilter::disabled();
        assert!(matches!(
            current.with_input("200", "100", true),
            Err(ValidationError::InvertedRange { start: 0x200, end: 0x100 })
        ));
        assert!(current.with_input("200", "100", false).is_ok());
    }
}
