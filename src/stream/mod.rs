//! Stream adapters for subscriptions

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
