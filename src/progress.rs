use std::collections::BTreeSet;

use crate::onboarding::DashboardTaskType;

/// Source of truth for `tasks_completed`: distinct approved catalog task
/// ids plus completed onboarding steps. Each task counts once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Progress {
    catalog: BTreeSet<String>,
    onboarding: BTreeSet<DashboardTaskType>,
}

impl Progress {
    pub fn new() -> Progress {
        Progress::default()
    }

    pub fn record_catalog(&mut self, task_id: &str) {
        self.catalog.insert(task_id.to_string());
    }

    pub fn record_onboarding(&mut self, task_type: DashboardTaskType) {
        self.onboarding.insert(task_type);
    }

    pub fn approved_catalog(&self) -> &BTreeSet<String> {
        &self.catalog
    }

    pub fn onboarding_done(&self) -> usize {
        self.onboarding.len()
    }

    pub fn total(&self) -> u32 {
        (self.catalog.len() + self.onboarding.len()) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::Progress;
    use crate::onboarding::DashboardTaskType;

    #[test]
    fn test_each_task_counts_once() {
        let mut progress = Progress::new();
        progress.record_catalog("follow-x");
        progress.record_catalog("follow-x");
        progress.record_onboarding(DashboardTaskType::Telegram);
        progress.record_onboarding(DashboardTaskType::Telegram);
        progress.record_onboarding(DashboardTaskType::Survey);
        assert_eq!(progress.total(), 3);
        assert_eq!(progress.onboarding_done(), 2);
        assert!(progress.approved_catalog().contains("follow-x"));
    }
}
