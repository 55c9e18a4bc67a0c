use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Estimates transfer speed from a sliding window of confirmed chunks.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    /// Creates a calculator over `window`, retaining at most `max_samples`.
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: VecDeque::new(),
                max_samples: max_samples.max(2),
                window,
            }),
        }
    }

    /// Records `bytes` confirmed now.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, timestamp: Instant) {
        let Ok(mut s) = self.inner.lock() else {
            return;
        };
        s.samples.push_back(SpeedSample { bytes, timestamp });

        let window = s.window;
        while s
            .samples
            .front()
            .is_some_and(|sample| timestamp.duration_since(sample.timestamp) > window)
        {
            s.samples.pop_front();
        }
        while s.samples.len() > s.max_samples {
            s.samples.pop_front();
        }
    }

    /// Average bytes/second within the window; 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let Ok(s) = self.inner.lock() else {
            return 0.0;
        };
        let (Some(first), Some(last)) = (s.samples.front(), s.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        // The first sample marks the start of the interval.
        let bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining_bytes` at the current speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all samples, e.g. after a pause.
    pub fn reset(&self) {
        if let Ok(mut s) = self.inner.lock() {
            s.samples.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn single_sample() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn steady_rate() {
        let calc = SpeedCalculator::new(Duration::from_secs(10), 100);
        let t0 = Instant::now();
        calc.add_sample_at(1000, t0);
        calc.add_sample_at(1000, t0 + Duration::from_secs(1));
        calc.add_sample_at(1000, t0 + Duration::from_secs(2));

        let speed = calc.bytes_per_second();
        assert!((speed - 1000.0).abs() < 1e-6, "speed = {speed}");

        let eta = calc.eta(5000).unwrap();
        assert!((eta.as_secs_f64() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn old_samples_leave_window() {
        let calc = SpeedCalculator::new(Duration::from_secs(2), 100);
        let t0 = Instant::now();
        calc.add_sample_at(1_000_000, t0);
        calc.add_sample_at(10, t0 + Duration::from_secs(5));
        calc.add_sample_at(10, t0 + Duration::from_secs(6));

        // Only the last two samples remain: 10 bytes over one second.
        let speed = calc.bytes_per_second();
        assert!((speed - 10.0).abs() < 1e-6, "speed = {speed}");
    }

    #[test]
    fn max_samples_bounded() {
        let calc = SpeedCalculator::new(Duration::from_secs(60), 5);
        let t0 = Instant::now();
        for i in 0..20 {
            calc.add_sample_at(i * 10, t0 + Duration::from_millis(i * 10));
        }
        let s = calc.inner.lock().unwrap();
        assert_eq!(s.samples.len(), 5);
    }

    #[test]
    fn reset_clears() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        calc.add_sample(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }
}
