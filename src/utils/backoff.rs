//! 指数退避
//!
//! 服务器间链接断开后按 100ms 起步、翻倍、上限 60s 的节奏重连，连上后复位。

use std::cmp::min;
use std::time::Duration;

pub struct ExponentialBackoff {
    current: Duration,

    config_initial: Duration,
    config_max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            config_initial: initial,
            config_max: max.max(initial),
        }
    }

    /// 返回本次需要等待的时长，并把下一次翻倍
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = min(self.current.saturating_mul(2), self.config_max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.config_initial;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::initial(100, 100, 200)]
    #[case::doubles(400, 400, 800)]
    #[case::near_cap(40_000, 40_000, 60_000)]
    #[case::at_cap(60_000, 60_000, 60_000)]
    fn test_next_delay(#[case] current_ms: u64, #[case] expected_delay_ms: u64, #[case] expected_next_ms: u64) {
        let mut backoff = ExponentialBackoff::default();
        backoff.current = Duration::from_millis(current_ms);

        assert_eq!(backoff.next_delay(), Duration::from_millis(expected_delay_ms));
        assert_eq!(backoff.current, Duration::from_millis(expected_next_ms));
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut backoff = ExponentialBackoff::default();
        for _ in 0..20 {
            let _ = backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
