// ── Backoff policies ──
//
// Two independent failure domains: a tiered cool-down for HTTP 5xx on
// the vendor REST endpoint, and exponential reconnect backoff for the
// MQTT transport.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

// ── Server error cool-down ───────────────────────────────────────────

/// Cool-down per consecutive-failure count, in minutes. The last tier repeats.
pub const SERVER_BACKOFF_TIERS_MINUTES: [u64; 5] = [1, 2, 5, 10, 15];

/// Consecutive 5xx responses before a user-visible notice is raised.
pub const SERVER_ERROR_NOTIFY_THRESHOLD: u32 = 3;

/// Outcome of recording a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerErrorVerdict {
    pub consecutive: u32,
    pub window: Duration,
    pub notify: bool,
}

/// Counts consecutive 5xx responses and gates calls during the cool-down.
#[derive(Debug, Default)]
pub struct ServerErrorBackoff {
    consecutive: u32,
    until: Option<Instant>,
}

impl ServerErrorBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cool-down for the given consecutive-error count (1-based).
    pub fn tier(consecutive: u32) -> Duration {
        let idx = usize::try_from(consecutive.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .min(SERVER_BACKOFF_TIERS_MINUTES.len() - 1);
        Duration::from_secs(SERVER_BACKOFF_TIERS_MINUTES[idx] * 60)
    }

    /// `Err(remaining)` while inside a cool-down window.
    pub fn check(&self, now: Instant) -> Result<(), Duration> {
        match self.until {
            Some(until) if now < until => Err(until - now),
            _ => Ok(()),
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> ServerErrorVerdict {
        self.consecutive = self.consecutive.saturating_add(1);
        let window = Self::tier(self.consecutive);
        self.until = Some(now + window);
        ServerErrorVerdict {
            consecutive: self.consecutive,
            window,
            notify: self.consecutive >= SERVER_ERROR_NOTIFY_THRESHOLD,
        }
    }

    /// Reset after a successful response. Returns the count that was cleared.
    pub fn record_success(&mut self) -> u32 {
        let cleared = self.consecutive;
        self.consecutive = 0;
        self.until = None;
        cleared
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }

    /// Length of the current window, if one has been set.
    pub fn current_window(&self) -> Option<Duration> {
        (self.consecutive > 0).then(|| Self::tier(self.consecutive))
    }
}

// ── MQTT reconnect ───────────────────────────────────────────────────

/// Exponential backoff configuration for MQTT reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub min_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Growth factor per attempt. Default: 2.
    pub multiplier: f64,

    /// Relative jitter applied in both directions. Default: 0.1.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Stateful reconnect schedule.
///
/// `delay = min(min_delay * multiplier^(attempt-1), max_delay)` with
/// `±jitter`, clamped to `[min_delay, max_delay]`.
#[derive(Debug, Clone)]
pub struct ReconnectStrategy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectStrategy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay for a 1-based attempt number.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.config.min_delay.as_secs_f64() * self.config.multiplier.powi(exp);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Advance the attempt counter and return the delay to wait.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.base_delay(self.attempt).as_secs_f64();

        let jittered = if self.config.jitter > 0.0 {
            let spread = base * self.config.jitter;
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };

        let clamped = jittered
            .max(self.config.min_delay.as_secs_f64())
            .min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    /// Back to the first attempt after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_tiers() {
        assert_eq!(ServerErrorBackoff::tier(1), Duration::from_secs(60));
        assert_eq!(ServerErrorBackoff::tier(2), Duration::from_secs(120));
        assert_eq!(ServerErrorBackoff::tier(3), Duration::from_secs(300));
        assert_eq!(ServerErrorBackoff::tier(5), Duration::from_secs(900));
        assert_eq!(ServerErrorBackoff::tier(40), Duration::from_secs(900));
    }

    #[test]
    fn two_failures_give_two_minute_window_and_success_resets() {
        let mut backoff = ServerErrorBackoff::new();
        let t0 = Instant::now();

        let first = backoff.record_failure(t0);
        assert_eq!(first.window, Duration::from_secs(60));
        assert!(!first.notify);

        let t1 = t0 + Duration::from_secs(61);
        assert!(backoff.check(t1).is_ok());
        let second = backoff.record_failure(t1);
        assert_eq!(second.consecutive, 2);
        assert_eq!(second.window, Duration::from_secs(120));
        assert_eq!(
            backoff.check(t1 + Duration::from_secs(30)),
            Err(Duration::from_secs(90))
        );

        assert_eq!(backoff.record_success(), 2);
        assert_eq!(backoff.consecutive_errors(), 0);
        assert!(backoff.check(t1).is_ok());
    }

    #[test]
    fn third_failure_notifies() {
        let mut backoff = ServerErrorBackoff::new();
        let now = Instant::now();
        backoff.record_failure(now);
        backoff.record_failure(now);
        assert!(backoff.record_failure(now).notify);
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.min_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn base_delay_is_non_decreasing_and_capped() {
        let strategy = ReconnectStrategy::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..20 {
            let d = strategy.base_delay(attempt);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            assert!(d <= Duration::from_secs(60));
            prev = d;
        }
        assert_eq!(strategy.base_delay(1), Duration::from_secs(1));
        assert_eq!(strategy.base_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn jittered_delay_stays_in_bounds() {
        let mut strategy = ReconnectStrategy::default();
        for _ in 0..50 {
            let d = strategy.next_delay();
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_secs(60));
        }
    }

    #[test]
    fn reset_returns_to_min_delay() {
        let mut strategy = ReconnectStrategy::new(ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        });
        strategy.next_delay();
        strategy.next_delay();
        assert_eq!(strategy.next_delay(), Duration::from_secs(4));

        strategy.reset();
        assert_eq!(strategy.attempt(), 0);
        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
    }
}
