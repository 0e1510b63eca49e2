//! Retransmission timer and retry budget.
//!
//! Stop-and-wait needs exactly one timer: it is armed each time the
//! outstanding segment goes on the wire and cancelled when the segment is
//! acknowledged.  The timeout is fixed for the life of a connection; every
//! attempt waits the same [`crate::config::Config::timeout`].
//!
//! [`RetryBudget`] counts retransmissions of the current outstanding segment
//! and is reset whenever the sender advances to a new one.

use std::time::Duration;

use tokio::time::Instant;

/// A one-shot deadline that the connection loop waits on.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Start (or restart) the countdown from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Deadline of the running countdown.
    ///
    /// A cancelled timer reports a deadline one timeout from now so callers
    /// can always `timeout_at` on it.
    pub fn deadline(&self) -> Instant {
        self.deadline
            .unwrap_or_else(|| Instant::now() + self.timeout)
    }
}

/// Retransmissions left for the segment currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Spend one retransmission.  Returns `false` once the budget is gone,
    /// leaving the count at `max`.
    pub fn try_spend(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Retransmissions spent on the current segment.
    pub fn used(&self) -> u32 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_allows_exactly_max_retries() {
        let mut b = RetryBudget::new(3);
        assert!(b.try_spend());
        assert!(b.try_spend());
        assert!(b.try_spend());
        assert!(!b.try_spend());
        assert_eq!(b.used(), 3);
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut b = RetryBudget::new(0);
        assert!(!b.try_spend());
        assert_eq!(b.used(), 0);
    }

    #[test]
    fn reset_restores_budget() {
        let mut b = RetryBudget::new(1);
        assert!(b.try_spend());
        b.reset();
        assert_eq!(b.used(), 0);
        assert!(b.try_spend());
    }

    #[tokio::test]
    async fn armed_deadline_is_one_timeout_away() {
        let mut t = RetransmitTimer::new(Duration::from_millis(200));
        assert!(!t.is_armed());
        let before = Instant::now();
        t.arm();
        assert!(t.is_armed());
        let d = t.deadline();
        assert!(d >= before + Duration::from_millis(200));
        assert!(d <= Instant::now() + Duration::from_millis(200));
        t.cancel();
        assert!(!t.is_armed());
    }
}
