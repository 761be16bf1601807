#![forbid(unsafe_code)]

//! Deterministic random streams and the random object construction
//! collaborator.
//!
//! Reproducibility is a hard requirement: one seeded generator drives a
//! whole checker run, threaded explicitly instead of living in process
//! global state. Child streams are derived from (seed, label) so that
//! adding a checked method does not perturb the sequence other methods
//! observe.

use feu_model::{FrameId, TypeToken, Value};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const MIX_CONST1: u64 = 0xBF58_476D_1CE4_E5B9;
const MIX_CONST2: u64 = 0x94D0_49BB_1331_11EB;

pub const DEFAULT_CHECK_SEED: u64 = 0xE0C1_1DF4_A3E5_70D1;

/// Consecutive clone failures tolerated per differential iteration before
/// the run aborts. Random construction is probabilistic; some type
/// combinations are only intermittently constructible, but an always-failing
/// clone must not loop forever.
pub const MAX_CLONE_RETRIES: usize = 50;

fn splitmix64(input: u64) -> u64 {
    let mut z = input;
    z = (z ^ (z >> 30)).wrapping_mul(MIX_CONST1);
    z = (z ^ (z >> 27)).wrapping_mul(MIX_CONST2);
    z ^ (z >> 31)
}

/// Counter-based splitmix64 stream. Copy-cheap, trivially forkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    stream_seed: u64,
    counter: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            stream_seed: seed,
            counter: 0,
        }
    }

    #[must_use]
    pub const fn state(self) -> (u64, u64) {
        (self.stream_seed, self.counter)
    }

    /// Independent child stream labelled by `label`; deterministic in
    /// (seed, label) and decoupled from this stream's counter.
    #[must_use]
    pub fn child(&self, label: &str) -> Self {
        let mut tag = self.stream_seed;
        for byte in label.bytes() {
            tag = splitmix64(tag ^ u64::from(byte).wrapping_mul(GOLDEN_GAMMA));
        }
        Self::new(tag)
    }

    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(1);
        splitmix64(
            self.stream_seed
                .wrapping_add(self.counter.wrapping_mul(GOLDEN_GAMMA)),
        )
    }

    #[must_use]
    pub fn next_f64(&mut self) -> f64 {
        // Sample the high 53 bits for IEEE754 mantissa precision in [0, 1).
        let sample = self.next_u64() >> 11;
        sample as f64 / (1u64 << 53) as f64
    }

    /// Uniform draw in [lo, hi).
    #[must_use]
    pub fn next_f64_in(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    #[must_use]
    pub fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }
}

/// Collaborator that manufactures random instances of registered types.
///
/// `None` is the "unsupported" sentinel for both operations: the checkers
/// skip or retry, they never treat it as a failure by itself.
pub trait RandomObjectService {
    /// A fresh random instance of `token` expressed in `frame`. Frameless
    /// types ignore the frame.
    fn next_instance(
        &self,
        rng: &mut DeterministicRng,
        frame: FrameId,
        token: TypeToken,
    ) -> Option<Value>;

    /// Independent structural clones of a whole argument tuple, or `None`
    /// when any member is not cloneable.
    fn clone_instances(&self, values: &[Value]) -> Option<Vec<Value>> {
        Some(values.iter().map(|value| value.boxed_clone()).collect())
    }
}
