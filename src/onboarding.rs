use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    db::RowStore,
    events::{EventBus, Notification},
    kv::{self, KeyValueStore},
    profile::ProfileStore,
    progress::Progress,
    user_data::UserProfile,
};

pub const ONBOARDING_BONUS: f64 = 10.0;
const BONUS_AWARDED_PREFIX: &str = "onboarding.bonus_awarded";

const TELEGRAM_LINK: &str = "https://t.me/+atUr8L_y6nJhMWVi";
const INSTAGRAM_LINK: &str = "https://www.instagram.com/sonavo.web3/";

/// Bonus guard for one profile. A local profile rebuilt after a restart has
/// a new `created_at` and so starts without the flag.
pub fn bonus_awarded_key(profile: &UserProfile) -> String {
    format!(
        "{}.{}.{}",
        BONUS_AWARDED_PREFIX,
        profile.id,
        profile.created_at.timestamp_micros()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardTaskType {
    Telegram,
    Instagram,
    Survey,
}

impl DashboardTaskType {
    pub const ALL: [DashboardTaskType; 3] = [
        DashboardTaskType::Telegram,
        DashboardTaskType::Instagram,
        DashboardTaskType::Survey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DashboardTaskType::Telegram => "telegram",
            DashboardTaskType::Instagram => "instagram",
            DashboardTaskType::Survey => "survey",
        }
    }

    pub fn is_social(&self) -> bool {
        matches!(self, DashboardTaskType::Telegram | DashboardTaskType::Instagram)
    }

    pub fn link(&self) -> Option<&'static str> {
        match self {
            DashboardTaskType::Telegram => Some(TELEGRAM_LINK),
            DashboardTaskType::Instagram => Some(INSTAGRAM_LINK),
            DashboardTaskType::Survey => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DashboardTaskType::Telegram => "Join Telegram",
            DashboardTaskType::Instagram => "Follow on Instagram",
            DashboardTaskType::Survey => "Answer Survey",
        }
    }
}

impl FromStr for DashboardTaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(DashboardTaskType::Telegram),
            "instagram" => Ok(DashboardTaskType::Instagram),
            "survey" => Ok(DashboardTaskType::Survey),
            other => Err(format!("unknown dashboard task type {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DashboardTask {
    pub id: String,
    pub user_id: String,
    pub task_type: DashboardTaskType,
    pub completed: bool,
    pub first_click_done: bool,
    pub username_provided: Option<String>,
    pub survey_answers: Option<Vec<String>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a dashboard task. `completed` and `first_click_done`
/// only ever move from false to true.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DashboardUpdate {
    pub first_click_done: Option<bool>,
    pub completed: Option<bool>,
    pub username_provided: Option<String>,
    pub survey_answers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CompletionExtra {
    pub username: Option<String>,
    pub survey_answers: Option<Vec<String>>,
}

/// What the dashboard should do when a task button is pressed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "url", rename_all = "snake_case")]
pub enum ClickAction {
    OpenLink(String),
    PromptUsername,
    StartSurvey,
    AlreadyCompleted,
}

/// The three fixed onboarding steps of the demo profile.
pub struct OnboardingTracker {
    user_id: String,
    store: Option<Arc<dyn RowStore>>,
    profile: Arc<ProfileStore>,
    progress: Arc<Mutex<Progress>>,
    kv: Arc<dyn KeyValueStore>,
    events: EventBus,
    tasks: Mutex<Vec<DashboardTask>>,
}

impl OnboardingTracker {
    pub fn new(
        user_id: String,
        store: Option<Arc<dyn RowStore>>,
        profile: Arc<ProfileStore>,
        progress: Arc<Mutex<Progress>>,
        kv: Arc<dyn KeyValueStore>,
        events: EventBus,
        loaded: Vec<DashboardTask>,
    ) -> OnboardingTracker {
        let mut tasks: Vec<DashboardTask> = Vec::new();
        for row in loaded {
            match tasks.iter_mut().find(|t| t.task_type == row.task_type) {
                Some(kept) => {
                    if row.completed && !kept.completed {
                        *kept = row;
                    }
                }
                None => tasks.push(row),
            }
        }
        OnboardingTracker {
            user_id,
            store,
            profile,
            progress,
            kv,
            events,
            tasks: Mutex::new(tasks),
        }
    }

    pub async fn get(&self, task_type: DashboardTaskType) -> Option<DashboardTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|task| task.task_type == task_type)
            .cloned()
    }

    pub async fn all(&self) -> Vec<DashboardTask> {
        self.tasks.lock().await.clone()
    }

    pub async fn record_first_click(&self, task_type: DashboardTaskType) -> DashboardTask {
        self.update(
            task_type,
            DashboardUpdate {
                first_click_done: Some(true),
                ..DashboardUpdate::default()
            },
        )
        .await
    }

    pub async fn mark_completed(
        &self,
        task_type: DashboardTaskType,
        extra: CompletionExtra,
    ) -> DashboardTask {
        self.update(
            task_type,
            DashboardUpdate {
                completed: Some(true),
                username_provided: extra.username,
                survey_answers: extra.survey_answers,
                ..DashboardUpdate::default()
            },
        )
        .await
    }

    /// Creates the record on first use. When this update completes the task,
    /// the completed count is refreshed and the onboarding bonus is checked
    /// while the task list is still locked.
    pub async fn update(
        &self,
        task_type: DashboardTaskType,
        update: DashboardUpdate,
    ) -> DashboardTask {
        let mut tasks = self.tasks.lock().await;
        let (task, newly_completed) = self.upsert(&mut tasks, task_type, &update).await;
        if newly_completed {
            {
                let mut progress = self.progress.lock().await;
                progress.record_onboarding(task_type);
                self.profile.set_tasks_completed(progress.total()).await;
            }
            self.award_bonus_if_complete(&tasks).await;
        }
        task
    }

    pub async fn click(&self, task_type: DashboardTaskType) -> ClickAction {
        let current = self.get(task_type).await;
        if current.as_ref().map(|t| t.completed).unwrap_or(false) {
            return ClickAction::AlreadyCompleted;
        }
        match task_type.link() {
            None => ClickAction::StartSurvey,
            Some(link) => {
                if current.map(|t| t.first_click_done).unwrap_or(false) {
                    ClickAction::PromptUsername
                } else {
                    self.record_first_click(task_type).await;
                    ClickAction::OpenLink(link.to_string())
                }
            }
        }
    }

    /// Awards a bonus that is still owed, e.g. after a restart that happened
    /// between the third completion and the bonus write.
    pub async fn reconcile(&self) -> bool {
        let tasks = self.tasks.lock().await;
        self.award_bonus_if_complete(&tasks).await
    }

    async fn upsert(
        &self,
        tasks: &mut Vec<DashboardTask>,
        task_type: DashboardTaskType,
        update: &DashboardUpdate,
    ) -> (DashboardTask, bool) {
        let now = Utc::now();
        let existing = tasks.iter().position(|task| task.task_type == task_type);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                tasks.push(DashboardTask {
                    id: Uuid::new_v4().to_string(),
                    user_id: self.user_id.clone(),
                    task_type,
                    completed: false,
                    first_click_done: false,
                    username_provided: None,
                    survey_answers: None,
                    completed_at: None,
                    created_at: now,
                    updated_at: now,
                });
                tasks.len() - 1
            }
        };

        let task = &mut tasks[idx];
        let mut newly_completed = false;
        if update.first_click_done == Some(true) {
            task.first_click_done = true;
        }
        match update.completed {
            Some(true) if !task.completed => {
                task.completed = true;
                task.completed_at = Some(now);
                newly_completed = true;
            }
            Some(false) if task.completed => {
                debug!("Ignoring attempt to reopen {}", task_type.as_str());
            }
            _ => {}
        }
        if let Some(username) = &update.username_provided {
            task.username_provided = Some(username.clone());
        }
        if let Some(answers) = &update.survey_answers {
            task.survey_answers = Some(answers.clone());
        }
        task.updated_at = now;
        let task = task.clone();

        if let Some(store) = &self.store {
            let res = if existing.is_some() {
                store.update_dashboard_task(&task).await
            } else {
                store.insert_dashboard_task(&task).await
            };
            if let Err(err) = res {
                error!("Error updating dashboard task {}: {}", task_type.as_str(), err);
            }
        }
        (task, newly_completed)
    }

    async fn award_bonus_if_complete(&self, tasks: &[DashboardTask]) -> bool {
        let all_done = DashboardTaskType::ALL.iter().all(|task_type| {
            tasks
                .iter()
                .any(|task| task.task_type == *task_type && task.completed)
        });
        if !all_done {
            return false;
        }
        let Some(profile) = self.profile.profile().await else {
            return false;
        };
        if profile.congratulated {
            return false;
        }
        let key = bonus_awarded_key(&profile);
        if kv::get_bool(self.kv.as_ref(), &key) {
            // Credited and flushed earlier, but the profile row lost it.
            self.profile.set_congratulated().await;
            return false;
        }
        self.profile.credit_balance(ONBOARDING_BONUS).await;
        self.profile.set_congratulated().await;
        self.profile.flush().await;
        if let Err(err) = self.kv.set(&key, "true") {
            error!("Error persisting bonus flag: {}", err);
        }
        info!("Onboarding finished, credited bonus of {}", ONBOARDING_BONUS);
        self.events.emit(Notification::OnboardingBonusAwarded {
            amount: ONBOARDING_BONUS,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::Mutex;

    use super::{
        bonus_awarded_key, ClickAction, CompletionExtra, DashboardTaskType, DashboardUpdate,
        OnboardingTracker,
    };
    use crate::{
        db::RowStore,
        events::{EventBus, Notification},
        kv::{KeyValueStore, MemoryKv},
        memory_store::MemoryStore,
        profile::{ProfileConfig, ProfileStore},
        progress::Progress,
        user_data::{UserProfile, DEMO_USER_ID},
    };

    struct Fixture {
        backend: Arc<MemoryStore>,
        profile: Arc<ProfileStore>,
        kv: Arc<MemoryKv>,
        events: EventBus,
        tracker: OnboardingTracker,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryStore::new());
        let profile = Arc::new(ProfileStore::new(
            Some(backend.clone()),
            ProfileConfig::default(),
        ));
        profile.initialize().await;
        let kv = Arc::new(MemoryKv::new());
        let events = EventBus::new();
        let tracker = OnboardingTracker::new(
            DEMO_USER_ID.to_string(),
            Some(backend.clone()),
            profile.clone(),
            Arc::new(Mutex::new(Progress::new())),
            kv.clone(),
            events.clone(),
            Vec::new(),
        );
        Fixture {
            backend,
            profile,
            kv,
            events,
            tracker,
        }
    }

    #[tokio::test]
    async fn test_first_click_creates_record() -> Result<(), String> {
        let f = fixture().await;
        assert!(f.tracker.get(DashboardTaskType::Telegram).await.is_none());
        let task = f.tracker.record_first_click(DashboardTaskType::Telegram).await;
        assert!(task.first_click_done);
        assert!(!task.completed);
        let again = f.tracker.record_first_click(DashboardTaskType::Telegram).await;
        assert_eq!(task.id, again.id);
        let rows = f
            .backend
            .list_dashboard_tasks(DEMO_USER_ID)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_click_flow() {
        let f = fixture().await;
        assert_eq!(
            f.tracker.click(DashboardTaskType::Instagram).await,
            ClickAction::OpenLink("https://www.instagram.com/sonavo.web3/".to_string())
        );
        assert_eq!(
            f.tracker.click(DashboardTaskType::Instagram).await,
            ClickAction::PromptUsername
        );
        assert_eq!(
            f.tracker.click(DashboardTaskType::Survey).await,
            ClickAction::StartSurvey
        );
        f.tracker
            .mark_completed(DashboardTaskType::Instagram, CompletionExtra::default())
            .await;
        assert_eq!(
            f.tracker.click(DashboardTaskType::Instagram).await,
            ClickAction::AlreadyCompleted
        );
    }

    #[tokio::test]
    async fn test_completed_is_one_way() {
        let f = fixture().await;
        let done = f
            .tracker
            .mark_completed(
                DashboardTaskType::Telegram,
                CompletionExtra {
                    username: Some("@alice".to_string()),
                    survey_answers: None,
                },
            )
            .await;
        assert!(done.completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.username_provided.as_deref(), Some("@alice"));

        let after = f
            .tracker
            .update(
                DashboardTaskType::Telegram,
                DashboardUpdate {
                    completed: Some(false),
                    ..DashboardUpdate::default()
                },
            )
            .await;
        assert!(after.completed);
        assert_eq!(after.completed_at, done.completed_at);
        assert_eq!(f.profile.profile().await.unwrap().tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_bonus_fires_once_in_any_order() {
        let orders = [
            [
                DashboardTaskType::Survey,
                DashboardTaskType::Telegram,
                DashboardTaskType::Instagram,
            ],
            [
                DashboardTaskType::Instagram,
                DashboardTaskType::Survey,
                DashboardTaskType::Telegram,
            ],
        ];
        for order in orders {
            let f = fixture().await;
            let mut rx = f.events.subscribe();
            for task_type in order {
                f.tracker
                    .mark_completed(task_type, CompletionExtra::default())
                    .await;
                f.tracker
                    .mark_completed(task_type, CompletionExtra::default())
                    .await;
            }
            assert!(!f.tracker.reconcile().await);

            let profile = f.profile.profile().await.unwrap();
            assert_eq!(profile.balance, 10.0);
            assert_eq!(profile.total_earned, 10.0);
            assert_eq!(profile.tasks_completed, 3);
            assert!(profile.congratulated);
            assert_eq!(f.kv.get(&bonus_awarded_key(&profile)).as_deref(), Some("true"));

            let mut bonuses = 0;
            while let Ok(notification) = rx.try_recv() {
                if let Notification::OnboardingBonusAwarded { amount } = notification {
                    assert_eq!(amount, 10.0);
                    bonuses += 1;
                }
            }
            assert_eq!(bonuses, 1);
        }
    }

    #[tokio::test]
    async fn test_no_bonus_for_congratulated_profile() {
        let f = fixture().await;
        f.profile.set_congratulated().await;
        for task_type in DashboardTaskType::ALL {
            f.tracker
                .mark_completed(task_type, CompletionExtra::default())
                .await;
        }
        assert_eq!(f.profile.profile().await.unwrap().balance, 0.0);
    }

    #[tokio::test]
    async fn test_persisted_flag_blocks_second_payment() {
        let f = fixture().await;
        let profile = f.profile.profile().await.unwrap();
        f.kv.set(&bonus_awarded_key(&profile), "true").unwrap();
        let mut rx = f.events.subscribe();
        for task_type in DashboardTaskType::ALL {
            f.tracker
                .mark_completed(task_type, CompletionExtra::default())
                .await;
        }
        let profile = f.profile.profile().await.unwrap();
        assert_eq!(profile.balance, 0.0);
        assert!(profile.congratulated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bonus_key_is_per_profile() {
        let now = Utc::now();
        let first = UserProfile::demo(now);
        let rebuilt = UserProfile::demo(now + chrono::Duration::seconds(1));
        assert_ne!(bonus_awarded_key(&first), bonus_awarded_key(&rebuilt));
        assert!(bonus_awarded_key(&first).starts_with("onboarding.bonus_awarded.demo-user-id."));
    }

    #[test]
    fn test_task_type_names() {
        for task_type in DashboardTaskType::ALL {
            assert_eq!(task_type.as_str().parse::<DashboardTaskType>(), Ok(task_type));
        }
        assert!("discord".parse::<DashboardTaskType>().is_err());
        assert!(DashboardTaskType::Telegram.is_social());
        assert!(!DashboardTaskType::Survey.is_social());
    }
}
