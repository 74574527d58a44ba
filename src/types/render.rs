//! Text rendering shared by the live table and the scroll log

use std::fmt::Write as _;

use super::{Frame, FrameFormat};

/// Placeholder shown instead of payload bytes for remote-request frames.
pub const REMOTE_PLACEHOLDER: &str = "---RTR---";

/// Identifier as 3 (standard) or 8 (extended) upper-case hex digits.
pub fn hex_id(frame: &Frame) -> String {
    match frame.kind().format() {
        Some(FrameFormat::Standard) => format!("{:03X}", frame.id()),
        Some(FrameFormat::Extended) => format!("{:08X}", frame.id()),
        None => format!("{:08X}", frame.id()),
    }
}

/// Payload as `"XX "` per byte, or the remote placeholder.
pub fn hex_payload(frame: &Frame) -> String {
    if frame.is_remote() {
        return REMOTE_PLACEHOLDER.to_string();
    }
    let mut out = String::with_capacity(frame.payload().len() * 3);
    for byte in frame.payload() {
        let _ = write!(out, "{byte:02X} ");
    }
    out
}

/// Printable ASCII rendering; bytes outside 32..=126 become `.`.
pub fn ascii(payload: &[u8]) -> String {
    payload.iter().map(|&b| if (32..=126).contains(&b) { b as char } else { '.' }).collect()
}
