use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::{
    catalog::{TaskCatalog, TaskDefinition},
    db::RowStore,
    error::{ContextError, StoreError, VerificationError},
    events::{EventBus, Notification},
    kv::KeyValueStore,
    ledger::{SubmissionLedger, SubmissionStatus, TaskSubmission},
    onboarding::{
        ClickAction, CompletionExtra, DashboardTask, DashboardTaskType, DashboardUpdate,
        OnboardingTracker,
    },
    profile::ProfileStore,
    progress::Progress,
    user_data::{UserProfile, WalletKind},
    verification::{
        FailureCallback, Outcome, PendingStatus, SimulatorConfig, VerificationPayload,
        VerificationSimulator,
    },
};

pub const MIN_WITHDRAW_BALANCE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Catalog,
    Onboarding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub reward: f64,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub kind: HistoryKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawCheck {
    pub eligible: bool,
    pub balance: f64,
    pub minimum: f64,
}

fn loaded<T>(res: Result<Vec<T>, StoreError>, what: &str) -> Option<Vec<T>> {
    match res {
        Ok(rows) => Some(rows),
        Err(err) => {
            error!("Error loading {}: {}", what, err);
            None
        }
    }
}

fn is_onboarding_id(task_id: &str) -> bool {
    task_id.parse::<DashboardTaskType>().is_ok()
}

/// Everything the presentation layer talks to for one signed-in profile.
pub struct AppSession {
    profile: Arc<ProfileStore>,
    catalog: Arc<TaskCatalog>,
    ledger: Arc<SubmissionLedger>,
    tracker: Arc<OnboardingTracker>,
    simulator: Arc<VerificationSimulator>,
    events: EventBus,
}

impl AppSession {
    /// Builds the task layer on top of an initialized profile store. A
    /// profile store that was never initialized is a wiring bug and is
    /// reported as such.
    pub async fn attach(
        profile: Arc<ProfileStore>,
        store: Option<Arc<dyn RowStore>>,
        kv: Arc<dyn KeyValueStore>,
        catalog: TaskCatalog,
        config: SimulatorConfig,
        events: EventBus,
    ) -> Result<AppSession, ContextError> {
        let Some(user) = profile.profile().await else {
            return Err(ContextError::ProfileNotInitialized);
        };
        let store = if profile.is_local_only().await {
            None
        } else {
            store
        };

        let (submissions, dashboard_tasks) = match &store {
            Some(store) => (
                loaded(store.list_submissions(&user.id).await, "task submissions"),
                loaded(store.list_dashboard_tasks(&user.id).await, "dashboard tasks"),
            ),
            None => (Some(Vec::new()), Some(Vec::new())),
        };
        let fully_loaded = submissions.is_some() && dashboard_tasks.is_some();
        let submissions = submissions.unwrap_or_default();
        let dashboard_tasks = dashboard_tasks.unwrap_or_default();

        let mut progress = Progress::new();
        for submission in &submissions {
            if submission.status == SubmissionStatus::Approved
                && !is_onboarding_id(&submission.task_id)
            {
                progress.record_catalog(&submission.task_id);
            }
        }
        for task in &dashboard_tasks {
            if task.completed {
                progress.record_onboarding(task.task_type);
            }
        }
        if fully_loaded && progress.total() != user.tasks_completed {
            info!(
                "Correcting completed task count from {} to {}",
                user.tasks_completed,
                progress.total()
            );
            profile.set_tasks_completed(progress.total()).await;
        }
        let progress = Arc::new(Mutex::new(progress));

        let catalog = Arc::new(catalog);
        let ledger = Arc::new(SubmissionLedger::new(
            user.id.clone(),
            store.clone(),
            profile.clone(),
            progress.clone(),
            submissions,
        ));
        let tracker = Arc::new(OnboardingTracker::new(
            user.id.clone(),
            store,
            profile.clone(),
            progress,
            kv.clone(),
            events.clone(),
            dashboard_tasks,
        ));
        tracker.reconcile().await;
        let simulator = Arc::new(VerificationSimulator::new(
            config,
            kv,
            events.clone(),
            catalog.clone(),
            ledger.clone(),
            tracker.clone(),
        ));
        Ok(AppSession {
            profile,
            catalog,
            ledger,
            tracker,
            simulator,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.profile.profile().await
    }

    pub fn profile_store(&self) -> &ProfileStore {
        &self.profile
    }

    pub async fn connect_wallet(&self, kind: WalletKind) -> String {
        self.profile.connect_wallet(kind).await
    }

    pub async fn disconnect_wallet(&self) {
        self.profile.disconnect_wallet().await
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        self.catalog.list_tasks()
    }

    pub fn task(&self, id: &str) -> Option<&TaskDefinition> {
        self.catalog.get_by_id(id)
    }

    pub async fn submission_for_task(&self, task_id: &str) -> Option<TaskSubmission> {
        self.ledger.get_submission_for_task(task_id).await
    }

    pub async fn submissions(&self) -> Vec<TaskSubmission> {
        self.ledger.submissions().await
    }

    pub async fn submit_task(
        &self,
        task_id: &str,
        payload: VerificationPayload,
        on_fail: Option<FailureCallback>,
    ) -> Result<Outcome, VerificationError> {
        self.simulator.submit(task_id, payload, on_fail).await
    }

    pub async fn dashboard_task(&self, task_type: DashboardTaskType) -> Option<DashboardTask> {
        self.tracker.get(task_type).await
    }

    pub async fn dashboard_tasks(&self) -> Vec<DashboardTask> {
        self.tracker.all().await
    }

    pub async fn update_dashboard_task(
        &self,
        task_type: DashboardTaskType,
        update: DashboardUpdate,
    ) -> DashboardTask {
        self.tracker.update(task_type, update).await
    }

    pub async fn complete_dashboard_task(
        &self,
        task_type: DashboardTaskType,
        extra: CompletionExtra,
    ) -> DashboardTask {
        self.tracker.mark_completed(task_type, extra).await
    }

    pub async fn click_dashboard_task(&self, task_type: DashboardTaskType) -> ClickAction {
        self.tracker.click(task_type).await
    }

    pub async fn verify_social_task(
        &self,
        task_type: DashboardTaskType,
        username: &str,
        on_fail: Option<FailureCallback>,
    ) -> Result<Outcome, VerificationError> {
        self.simulator
            .submit(
                task_type.as_str(),
                VerificationPayload::Username {
                    username: username.to_string(),
                },
                on_fail,
            )
            .await
    }

    pub async fn complete_survey(
        &self,
        answers: Vec<String>,
    ) -> Result<Outcome, VerificationError> {
        self.simulator
            .submit(
                DashboardTaskType::Survey.as_str(),
                VerificationPayload::Survey { answers },
                None,
            )
            .await
    }

    pub async fn is_verifying(&self) -> bool {
        self.simulator.is_verifying().await
    }

    pub async fn pending_verifications(&self) -> Vec<PendingStatus> {
        self.simulator.pending().await
    }

    pub async fn resume_pending(&self) -> Vec<(String, Outcome)> {
        self.simulator.resume_pending().await
    }

    /// Approved catalog submissions and completed onboarding steps, newest first.
    pub async fn task_history(&self) -> Vec<HistoryEntry> {
        let mut history: Vec<HistoryEntry> = self
            .ledger
            .submissions()
            .await
            .into_iter()
            .filter(|submission| !is_onboarding_id(&submission.task_id))
            .map(|submission| {
                let task = self.catalog.get_by_id(&submission.task_id);
                HistoryEntry {
                    title: task
                        .map(|t| t.title.clone())
                        .unwrap_or_else(|| submission.task_id.clone()),
                    reward: task.map(|t| t.reward).unwrap_or(0.0),
                    id: submission.id,
                    task_id: submission.task_id,
                    status: submission.status,
                    submitted_at: submission.submitted_at,
                    kind: HistoryKind::Catalog,
                }
            })
            .collect();
        history.extend(
            self.tracker
                .all()
                .await
                .into_iter()
                .filter(|task| task.completed)
                .map(|task| HistoryEntry {
                    id: task.id,
                    task_id: task.task_type.as_str().to_string(),
                    title: task.task_type.title().to_string(),
                    reward: 0.0,
                    status: SubmissionStatus::Approved,
                    submitted_at: task.completed_at.unwrap_or(task.created_at),
                    kind: HistoryKind::Onboarding,
                }),
        );
        history.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        history
    }

    pub async fn withdraw_check(&self) -> WithdrawCheck {
        let balance = self.profile().await.map(|p| p.balance).unwrap_or(0.0);
        WithdrawCheck {
            eligible: balance >= MIN_WITHDRAW_BALANCE,
            balance,
            minimum: MIN_WITHDRAW_BALANCE,
        }
    }
}
