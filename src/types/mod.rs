//! Core types for bus frame representation.
//!
//! ## Architecture
//!
//! - [`Frame`] is a `Copy` frame with inline payload, validated on construction
//! - [`FrameKind`] tags data, remote-request and error frames per identifier format
//! - [`FrameFormat`] selects the 11-bit or 29-bit identifier range
//! - [`UpdateRate`] controls how often display subscriptions yield
//! - [`render`] holds the text formatting shared by the table and the log
//!
//! ## Usage Example
//!
//! ```rust
//! use canscope::types::{Frame, FrameFormat, render};
//!
//! let frame = Frame::data(FrameFormat::Standard, 0x123, b"Hi\x01").unwrap();
//! assert_eq!(render::hex_id(&frame), "123");
//! assert_eq!(render::hex_payload(&frame), "48 69 01 ");
//! assert_eq!(render::ascii(frame.payload()), "Hi.");
//! ```

mod frame;
pub mod render;
mod update_rate;

// Re-export all public types
pub use frame::{EXTENDED_ID_LIMIT, Frame, FrameFormat, FrameKind, MAX_DLC, STANDARD_ID_LIMIT};
pub use update_rate::UpdateRate;
