//! Frame builders shared by unit tests and benchmarks

#![cfg(any(test, feature = "benchmark"))]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{Frame, FrameFormat};

/// Standard-format data frame; panics on invalid input.
pub fn std_frame(id: u32, payload: &[u8]) -> Frame {
    Frame::data(FrameFormat::Standard, id, payload).expect("valid standard frame")
}

/// Extended-format data frame; panics on invalid input.
pub fn ext_frame(id: u32, payload: &[u8]) -> Frame {
    Frame::data(FrameFormat::Extended, id, payload).expect("valid extended frame")
}

/// Deterministic traffic: `count` frames cycling over `distinct` identifiers
/// in random order, as a busy bus with recurring messages produces.
pub fn recurring_traffic(count: usize, distinct: u32, seed: u64) -> Vec<Frame> {
    let mut rng = StdRng::seed_from_u64(seed);
    let ids: Vec<u32> = (0..distinct.max(1)).map(|_| rng.gen_range(0..0x800)).collect();
    (0..count)
        .map(|_| {
            let id = ids[rng.gen_range(0..ids.len())];
            let len = rng.gen_range(0..=8usize);
            let payload: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            std_frame(id, &payload)
        })
        .collect()
}
