use std::time::Duration;

use pulse_settings::BackoffSettings;
use rand::Rng;

/// Exponential reconnect backoff with symmetric jitter.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffSettings::default())
    }
}

impl From<&BackoffSettings> for BackoffPolicy {
    fn from(settings: &BackoffSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (0-based).
    ///
    /// `base * 2^attempt`, capped at `max_delay`, then scaled by
    /// `1 ± jitter_factor`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt.min(32) as i32);
        let capped = exp_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64, jitter: f64) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(base),
            max_delay: Duration::from_millis(max),
            jitter_factor: jitter,
        }
    }

    #[test]
    fn doubles_without_jitter() {
        let p = policy(100, 10_000, 0.0);
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn capped_at_max() {
        let p = policy(100, 1_000, 0.0);
        assert_eq!(p.delay(10), Duration::from_millis(1_000));
        assert_eq!(p.delay(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_in_band() {
        let p = policy(1_000, 60_000, 0.2);
        for _ in 0..200 {
            let d = p.delay(0).as_millis();
            assert!((800..=1_200).contains(&d), "delay {d} out of band");
        }
    }

    #[test]
    fn from_settings() {
        let p = BackoffPolicy::from(&BackoffSettings {
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            jitter_factor: 3.0,
        });
        assert_eq!(p.base_delay, Duration::from_millis(250));
        assert_eq!(p.max_delay, Duration::from_millis(4_000));
        assert_eq!(p.jitter_factor, 1.0);
    }
}
