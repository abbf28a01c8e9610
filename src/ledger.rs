use std::{collections::HashSet, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{catalog::TaskDefinition, db::RowStore, profile::ProfileStore, progress::Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "Pending",
            SubmissionStatus::Approved => "Approved",
            SubmissionStatus::Rejected => "Rejected",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SubmissionStatus::Pending),
            "Approved" => Ok(SubmissionStatus::Approved),
            "Rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(format!("unknown submission status {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SubmissionPayload {
    pub screenshot: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskSubmission {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub screenshot: Option<String>,
    pub text: Option<String>,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The profile's submissions, one per catalog task, newest first.
pub struct SubmissionLedger {
    user_id: String,
    store: Option<Arc<dyn RowStore>>,
    profile: Arc<ProfileStore>,
    progress: Arc<Mutex<Progress>>,
    submissions: Mutex<Vec<TaskSubmission>>,
}

impl SubmissionLedger {
    pub fn new(
        user_id: String,
        store: Option<Arc<dyn RowStore>>,
        profile: Arc<ProfileStore>,
        progress: Arc<Mutex<Progress>>,
        mut loaded: Vec<TaskSubmission>,
    ) -> SubmissionLedger {
        loaded.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        // Older duplicates from earlier append-only writes are dropped.
        let mut seen = HashSet::new();
        loaded.retain(|submission| seen.insert(submission.task_id.clone()));
        SubmissionLedger {
            user_id,
            store,
            profile,
            progress,
            submissions: Mutex::new(loaded),
        }
    }

    pub async fn get_submission_for_task(&self, task_id: &str) -> Option<TaskSubmission> {
        self.submissions
            .lock()
            .await
            .iter()
            .find(|submission| submission.task_id == task_id)
            .cloned()
    }

    pub async fn submissions(&self) -> Vec<TaskSubmission> {
        self.submissions.lock().await.clone()
    }

    pub async fn approved_task_ids(&self) -> Vec<String> {
        self.submissions
            .lock()
            .await
            .iter()
            .filter(|submission| submission.status == SubmissionStatus::Approved)
            .map(|submission| submission.task_id.clone())
            .collect()
    }

    /// Records an approved verification for `task`, updating an earlier
    /// submission in place. The completed count is refreshed before the
    /// reward is credited; a task that was already approved is not paid
    /// twice.
    pub async fn record_approved(
        &self,
        task: &TaskDefinition,
        payload: &SubmissionPayload,
    ) -> TaskSubmission {
        let now = Utc::now();
        let mut submissions = self.submissions.lock().await;
        let (submission, previous) = match submissions
            .iter_mut()
            .find(|submission| submission.task_id == task.id)
        {
            Some(existing) => {
                let previous = Some(existing.status);
                existing.screenshot = payload.screenshot.clone();
                existing.text = payload.text.clone();
                existing.status = SubmissionStatus::Approved;
                existing.submitted_at = now;
                existing.updated_at = now;
                (existing.clone(), previous)
            }
            None => {
                let created = TaskSubmission {
                    id: Uuid::new_v4().to_string(),
                    user_id: self.user_id.clone(),
                    task_id: task.id.clone(),
                    screenshot: payload.screenshot.clone(),
                    text: payload.text.clone(),
                    status: SubmissionStatus::Approved,
                    submitted_at: now,
                    created_at: now,
                    updated_at: now,
                };
                submissions.insert(0, created.clone());
                (created, None)
            }
        };

        if let Some(store) = &self.store {
            let res = if previous.is_some() {
                store.update_submission(&submission).await
            } else {
                store.insert_submission(&submission).await
            };
            if let Err(err) = res {
                error!("Error storing submission for {}: {}", task.id, err);
            }
        }

        {
            let mut progress = self.progress.lock().await;
            progress.record_catalog(&task.id);
            self.profile.set_tasks_completed(progress.total()).await;
        }

        if previous != Some(SubmissionStatus::Approved) {
            self.profile.credit_balance(task.reward).await;
        } else {
            info!("Task {} was already approved, no reward credited", task.id);
        }
        submission
    }
}
