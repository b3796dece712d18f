//! Cooperative cancellation and per-worker texel state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// How many texels a worker processes between refreshes of its cached
/// cancellation flag.
pub const CANCEL_CHECK_INTERVAL: u32 = 16;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State owned by one texel worker for the duration of a parallel stage.
///
/// Caches the cancellation flag and refreshes it every
/// [`CANCEL_CHECK_INTERVAL`] texels, so cancellation latency is bounded
/// without an atomic load per texel.
pub struct WorkerContext {
    token: CancellationToken,
    cancelled: bool,
    processed: u32,
    rng: ChaCha8Rng,
}

impl WorkerContext {
    pub fn new(token: CancellationToken, seed: u64) -> Self {
        Self {
            token,
            cancelled: false,
            processed: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Count one texel and report whether the stage should stop.
    pub fn should_stop(&mut self) -> bool {
        self.processed = self.processed.wrapping_add(1);
        if self.cancelled || self.processed % CANCEL_CHECK_INTERVAL == 0 {
            self.cancelled = self.token.is_cancelled();
        }
        self.cancelled
    }

    /// Texels counted so far.
    pub fn processed(&self) -> u32 {
        self.processed
    }

    /// The worker's generator, positioned at the start of `stream`.
    ///
    /// Every stream is independent, so a texel's samples do not depend on
    /// which worker runs it or in what order.
    pub fn rng_for_stream(&mut self, stream: u64) -> &mut ChaCha8Rng {
        self.rng.set_stream(stream);
        self.rng.set_word_pos(0);
        &mut self.rng
    }
}

/// Random stream identifier for one texel of one map in one bounce.
pub fn texel_stream(bounce: u32, map: usize, texel: usize) -> u64 {
    (bounce as u64) << 56 ^ (map as u64) << 32 ^ texel as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_token_clones_share_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancellation_observed_within_interval() {
        let token = CancellationToken::new();
        let mut ctx = WorkerContext::new(token.clone(), 1);
        for _ in 0..5 {
            assert!(!ctx.should_stop());
        }
        token.cancel();
        let mut steps = 0;
        while !ctx.should_stop() {
            steps += 1;
            assert!(steps <= CANCEL_CHECK_INTERVAL, "cancellation not observed");
        }
        // Once observed it sticks until the token is reset.
        assert!(ctx.should_stop());
    }

    #[test]
    fn test_streams_are_reproducible_across_workers() {
        let mut a = WorkerContext::new(CancellationToken::new(), 7);
        let mut b = WorkerContext::new(CancellationToken::new(), 7);
        let _ = a.rng_for_stream(1).random::<f32>();
        let x: f32 = a.rng_for_stream(texel_stream(0, 2, 9)).random();
        let y: f32 = b.rng_for_stream(texel_stream(0, 2, 9)).random();
        assert_eq!(x, y);
    }

    #[test]
    fn test_texel_streams_differ() {
        assert_ne!(texel_stream(0, 0, 1), texel_stream(1, 0, 1));
        assert_ne!(texel_stream(0, 1, 1), texel_stream(0, 0, 1));
        assert_ne!(texel_stream(0, 0, 1), texel_stream(0, 0, 2));
    }
}
