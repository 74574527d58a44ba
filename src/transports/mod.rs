//! Transport implementations

pub mod loopback;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;
