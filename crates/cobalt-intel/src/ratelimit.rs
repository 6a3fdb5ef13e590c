//! Token-bucket rate limiter, one per intel client (spec §4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Token bucket keyed in whole tokens, refilled continuously from a
/// per-minute rate. Fractional refill is tracked in `carry` so slow rates
/// (e.g. 1 rps) still make progress between polls instead of rounding to zero.
pub struct TokenBucket {
    tokens: AtomicU64,
    max_tokens: u64,
    refill_per_sec: f64,
    state: Mutex<RefillState>,
}

struct RefillState {
    last_refill: Instant,
    carry: f64,
}

impl TokenBucket {
    /// `capacity` tokens, refilled at `rate_per_min` tokens per minute.
    pub fn new(capacity: u64, rate_per_min: f64) -> Self {
        Self {
            tokens: AtomicU64::new(capacity),
            max_tokens: capacity,
            refill_per_sec: rate_per_min / 60.0,
            state: Mutex::new(RefillState {
                last_refill: Instant::now(),
                carry: 0.0,
            }),
        }
    }

    /// Attempt to consume one token; does not block.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        loop {
            let current = self.tokens.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    fn refill(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;

        let accrued = elapsed * self.refill_per_sec + state.carry;
        let whole = accrued.floor();
        state.carry = accrued - whole;

        if whole >= 1.0 {
            let current = self.tokens.load(Ordering::Acquire);
            let new_tokens = ((current as f64 + whole) as u64).min(self.max_tokens);
            self.tokens.store(new_tokens, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_blocks() {
        let bucket = TokenBucket::new(2, 0.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(1, 6000.0); // 100 tokens/sec
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(bucket.try_acquire());
    }
}
