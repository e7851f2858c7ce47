//! Deterministic random streams
//!
//! Every entity owns one independent stream per purpose, derived from the run
//! seed. No stage touches shared random state, so generation is reproducible
//! regardless of how entities are scheduled across threads.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Purpose a random stream is drawn for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Trajectory,
    Materialize,
    LabelNoise,
    Split,
}

impl Stream {
    fn salt(self) -> u64 {
        match self {
            Stream::Trajectory => 0x7452_414a_4543_5452,
            Stream::Materialize => 0x4d41_5445_5249_414c,
            Stream::LabelNoise => 0x4c41_4245_4c4e_4f49,
            Stream::Split => 0x5350_4c49_5453_504c,
        }
    }
}

/// SplitMix64 finalizer
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Random stream for one entity and purpose: `f(seed, purpose, index)`
pub fn entity_rng(seed: u64, stream: Stream, index: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(splitmix64(seed ^ stream.salt()));
    rng.set_stream(index as u64);
    rng
}

/// Random stream not tied to an entity (dataset splits)
pub fn run_rng(seed: u64, stream: Stream) -> ChaCha8Rng {
    entity_rng(seed, stream, usize::MAX)
}
