use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Discovery-window jitter: a small xorshift that folds the monotonic clock
/// into every draw. Two peers holding identical state still diverge because
/// they observe different clock values; that is the only property the
/// discovery loop needs to escape lock-step.
pub(crate) struct Jitter {
    state: u64,
    epoch: Instant,
}

impl Jitter {
    pub(crate) fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Self {
            state: seed | 1,
            epoch: Instant::now(),
        }
    }

    fn step(&mut self) -> u64 {
        self.state ^= self.epoch.elapsed().as_nanos() as u64;
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform-ish duration in `[min_ms, max_ms)`.
    pub(crate) fn window(&mut self, min_ms: u64, max_ms: u64) -> Duration {
        Duration::from_millis(min_ms + self.step() % (max_ms - min_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_stay_inside_their_bounds() {
        let mut jitter = Jitter::from_clock();
        for _ in 0..1000 {
            let w = jitter.window(500, 1900);
            assert!(w >= Duration::from_millis(500));
            assert!(w < Duration::from_millis(1900));
        }
    }

    #[test]
    fn identical_seeds_desynchronize_within_a_few_cycles() {
        let mut a = Jitter {
            state: 42,
            epoch: Instant::now(),
        };
        let mut b = Jitter {
            state: 42,
            epoch: Instant::now(),
        };

        let mut diverged = false;
        for _ in 0..20 {
            let wa = a.window(500, 1900);
            // Real peers never draw at the same nanosecond either.
            std::thread::sleep(Duration::from_micros(50));
            let wb = b.window(500, 1900);
            if wa != wb {
                diverged = true;
                break;
            }
        }
        assert!(diverged, "clock mixing must break seed lock-step");
    }
}
