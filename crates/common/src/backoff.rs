//! Bounded exponential backoff with jitter, shared by every retry loop in
//! this system (upstream page fetches, storage writes, worker tick
//! failures).

use std::{
    cmp,
    ops::Div,
    time::Duration,
};

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial_backoff: Duration,
    max_backoff: Duration,
    num_failures: u32,
}

impl Backoff {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self { initial_backoff, max_backoff, num_failures: 0 }
    }

    pub fn reset(&mut self) {
        self.num_failures = 0;
    }

    /// Forces the next `fail()` to return `max_backoff`.
    pub fn force_max_backoff(&mut self) {
        self.num_failures = u32::MAX.div(2);
    }

    /// Records a failure and returns how long to wait before retrying.
    /// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>.
    pub fn fail(&mut self, rng: &mut impl Rng) -> Duration {
        let p = 2u32.checked_pow(self.num_failures).unwrap_or(u32::MAX);
        self.num_failures += 1;
        let jitter: f32 = rng.random();
        let backoff = self.initial_backoff.checked_mul(p).unwrap_or(self.max_backoff);
        cmp::min(backoff, self.max_backoff).mul_f32(jitter)
    }

    pub fn failures(&self) -> u32 {
        self.num_failures
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn backoff_never_exceeds_max() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let d = b.fail(&mut rng);
            assert!(d <= Duration::from_secs(10));
        }
    }

    #[test]
    fn reset_clears_failure_count() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_secs(1));
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        b.fail(&mut rng);
        b.fail(&mut rng);
        assert_eq!(b.failures(), 2);
        b.reset();
        assert_eq!(b.failures(), 0);
    }
}
