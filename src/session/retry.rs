use std::time::Duration;

/// Bounded retry budget with a fixed backoff
///
/// Each call to `next_delay` spends one attempt; once the budget is gone it
/// returns `None` for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
    attempts: u32,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.backoff)
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts - self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_attempt_budget() {
        let mut policy = RetryPolicy::fixed(1, Duration::from_secs(3));
        assert_eq!(policy.remaining(), 1);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.remaining(), 0);
    }

    #[test]
    fn test_zero_budget() {
        let mut policy = RetryPolicy::fixed(0, Duration::from_secs(3));
        assert_eq!(policy.next_delay(), None);
    }
}
