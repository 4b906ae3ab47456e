//! Reconnect policy with jittered exponential back-off.
//!
//! Delay curve: `min(30s, 500ms · 2^n)` with ±20% jitter.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.2,
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exp = 2f64.powi(attempt.min(16) as i32);
        let capped_ms = (base_ms * exp).min(self.max_delay.as_millis() as f64);

        // ±jitter to spread reconnect storms; deterministic per attempt.
        let jitter = capped_ms * self.jitter_fraction * pseudo_random_signed(attempt);
        Duration::from_millis((capped_ms + jitter).max(0.0) as u64)
    }
}

/// Cheap deterministic "random" fraction in [-1, 1) based on the attempt
/// number. Not cryptographically secure — just enough to avoid lockstep.
fn pseudo_random_signed(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let p = ReconnectBackoff::default();
        let max_with_jitter = Duration::from_millis(36_000);
        let mut last = Duration::ZERO;
        for attempt in 0..8 {
            let d = p.delay_for_attempt(attempt);
            assert!(d <= max_with_jitter, "attempt {attempt}: {d:?}");
            if attempt >= 1 {
                // Growth dominates jitter at early attempts.
                assert!(d > last / 4, "attempt {attempt}: {d:?} vs {last:?}");
            }
            last = d;
        }
        // Deep attempts stay near the cap.
        let deep = p.delay_for_attempt(30);
        assert!(deep >= Duration::from_secs(24));
        assert!(deep <= max_with_jitter);
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = ReconnectBackoff::default();
        for attempt in 0..32 {
            let d = p.delay_for_attempt(attempt).as_millis() as f64;
            let base = (500.0 * 2f64.powi(attempt.min(16) as i32)).min(30_000.0);
            assert!(d >= base * 0.8 - 1.0, "attempt {attempt}");
            assert!(d <= base * 1.2 + 1.0, "attempt {attempt}");
        }
    }

    #[test]
    fn first_attempt_is_about_half_a_second() {
        let d = ReconnectBackoff::default().delay_for_attempt(0);
        assert!(d >= Duration::from_millis(400));
        assert!(d <= Duration::from_millis(600));
    }
}
