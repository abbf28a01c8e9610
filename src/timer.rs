use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;

/// Wall-clock deadline of a running verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    deadline: DateTime<Utc>,
}

impl Countdown {
    pub fn starting_at(now: DateTime<Utc>, window: Duration) -> Countdown {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        Countdown {
            deadline: now + window,
        }
    }

    pub fn until(deadline: DateTime<Utc>) -> Countdown {
        Countdown { deadline }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whole seconds left, rounded down.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        self.remaining(now).as_secs()
    }

    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_zero()
    }

    pub async fn wait(&self) {
        let remaining = self.remaining(Utc::now());
        if !remaining.is_zero() {
            sleep(remaining).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::Countdown;

    #[test]
    fn test_remaining_secs() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let countdown = Countdown::starting_at(start, Duration::from_secs(10));
        assert_eq!(countdown.remaining_secs(start), 10);
        assert_eq!(
            countdown.remaining_secs(start + chrono::Duration::milliseconds(2500)),
            7
        );
        assert!(!countdown.is_elapsed(start));
    }

    #[test]
    fn test_past_deadline_is_elapsed() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let countdown = Countdown::until(start);
        let later = start + chrono::Duration::seconds(30);
        assert!(countdown.is_elapsed(later));
        assert_eq!(countdown.remaining_secs(later), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_for_elapsed_deadline() {
        let countdown = Countdown::until(Utc::now() - chrono::Duration::seconds(5));
        tokio::time::timeout(Duration::from_millis(100), countdown.wait())
            .await
            .unwrap();
    }
}
