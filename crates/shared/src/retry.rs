//! 重试策略与退避
//!
//! 提供指数退避机制，用于消费会话中断（broker 重平衡、网络抖动）后的重新进入。
//! 消费循环的重试次数不设上限，退避只限制重试节奏，避免 broker 不可用时空转。

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

// ---------------------------------------------------------------------------
// RetryPolicy: 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 首次失败等 initial_delay，之后每次乘以 multiplier，直到 max_delay。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行），None 表示无限重试
    pub max_retries: Option<u32>,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限，防止等待过长
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
    /// 在 [delay/2, delay] 区间内随机取值，错开多个实例的重连时刻
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// 不做退避、无限重试
    pub fn immediate() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// 计算第 N 次重试的基础等待时间（attempt 从 0 开始，不含抖动）
    ///
    /// 公式: initial_delay * multiplier^attempt，结果不超过 max_delay。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 带抖动的等待时间
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let upper = delay.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(upper / 2..=upper))
    }

    /// 是否应继续重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }
}

// ---------------------------------------------------------------------------
// Backoff: 有状态的退避计数器
// ---------------------------------------------------------------------------

/// 记录连续失败次数的退避计数器
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// 连续失败次数
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 记录一次失败，返回下一次重试前的等待时间；超过重试上限时返回 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.should_retry(self.attempt) {
            return None;
        }
        let delay = self.policy.jittered_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// 成功后清零
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: None,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, None);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(policy.jitter);
    }

    #[test]
    fn test_delay_for_attempt_exponential_backoff() {
        let policy = policy(1000, 30_000);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = policy(1000, 5000);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        // 8s -> 受限于 max_delay -> 5s
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy(1000, 30_000)
        };

        for _ in 0..100 {
            let delay = policy.jittered_delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let mut backoff = Backoff::new(RetryPolicy::immediate());
        for _ in 0..10 {
            assert_eq!(backoff.next_delay(), Some(Duration::ZERO));
        }
        assert_eq!(backoff.attempt(), 10);
    }

    #[test]
    fn test_should_retry_with_limit() {
        let policy = RetryPolicy {
            max_retries: Some(2),
            ..policy(10, 100)
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let mut backoff = Backoff::new(policy(100, 1000));

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_backoff_exhausted() {
        let mut backoff = Backoff::new(RetryPolicy {
            max_retries: Some(1),
            ..policy(10, 100)
        });

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }
}
