use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

pub const VERIFICATION_FAILED: &str = "task-verification-failed";

const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    VerificationStarted {
        task_id: String,
        deadline: DateTime<Utc>,
    },
    VerificationFailed {
        task_id: String,
    },
    VerificationApproved {
        task_id: String,
        reward: f64,
    },
    OnboardingBonusAwarded {
        amount: f64,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::VerificationStarted { .. } => "task-verification-started",
            Notification::VerificationFailed { .. } => VERIFICATION_FAILED,
            Notification::VerificationApproved { .. } => "task-verification-approved",
            Notification::OnboardingBonusAwarded { .. } => "onboarding-bonus-awarded",
        }
    }
}

/// Fire-and-forget fan-out of notifications to whoever is listening.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> EventBus {
        let (sender, _) = broadcast::channel(NOTIFICATION_BUFFER);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn emit(&self, notification: Notification) {
        debug!("Emitting {}", notification.name());
        if self.sender.send(notification).is_err() {
            debug!("No listeners for notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBus, Notification, VERIFICATION_FAILED};

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(Notification::VerificationFailed {
            task_id: "telegram".to_string(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.name(), VERIFICATION_FAILED);
    }

    #[test]
    fn test_emit_without_listeners() {
        let bus = EventBus::new();
        bus.emit(Notification::OnboardingBonusAwarded { amount: 10.0 });
    }
}
