//! Parsing of operator-entered text fields

use std::time::Duration;

use crate::ValidationError;
use crate::types::MAX_DLC;

/// Parse a hexadecimal identifier, tolerating surrounding blanks and a `0x` prefix.
pub fn parse_hex_id(field: &'static str, text: &str) -> Result<u32, ValidationError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidHex { field, input: text.to_string() });
    }
    u32::from_str_radix(digits, 16)
        .map_err(|_| ValidationError::InvalidHex { field, input: text.to_string() })
}

/// Parse one payload byte of one or two hex digits.
pub fn parse_hex_byte(index: usize, text: &str) -> Result<u8, ValidationError> {
    let digits = text.trim();
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidByte { index, input: text.to_string() });
    }
    u8::from_str_radix(digits, 16)
        .map_err(|_| ValidationError::InvalidByte { index, input: text.to_string() })
}

/// Parse a decimal data length between 0 and 8.
pub fn parse_length(text: &str) -> Result<u8, ValidationError> {
    match text.trim().parse::<u8>() {
        Ok(len) if len as usize <= MAX_DLC => Ok(len),
        _ => Err(ValidationError::InvalidLength { input: text.to_string() }),
    }
}

/// Parse a positive decimal period in milliseconds.
pub fn parse_period(text: &str) -> Result<Duration, ValidationError> {
    match text.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ValidationError::InvalidPeriod { input: text.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_ids() {
        assert_eq!(parse_hex_id("identifier", "7ff"), Ok(0x7FF));
        assert_eq!(parse_hex_id("identifier", " 0x1FFFFFFF "), Ok(0x1FFF_FFFF));
        assert!(parse_hex_id("identifier", "").is_err());
        assert!(parse_hex_id("identifier", "12G").is_err());
        assert!(parse_hex_id("identifier", "-1").is_err());
        assert!(parse_hex_id("identifier", "123456789").is_err());
    }

    #[test]
    fn hex_bytes() {
        assert_eq!(parse_hex_byte(0, "ff"), Ok(0xFF));
        assert_eq!(parse_hex_byte(0, "A"), Ok(0x0A));
        assert!(matches!(parse_hex_byte(3, "100"), Err(ValidationError::InvalidByte { index: 3, .. })));
        assert!(parse_hex_byte(0, "").is_err());
    }

    #[test]
    fn lengths_and_periods() {
        assert_eq!(parse_length("8"), Ok(8));
        assert_eq!(parse_length("0"), Ok(0));
        assert!(parse_length("9").is_err());
        assert!(parse_length("x").is_err());
        assert_eq!(parse_period("100"), Ok(Duration::from_millis(100)));
        assert!(parse_period("0").is_err());
        assert!(parse_period("-5").is_err());
    }
}
