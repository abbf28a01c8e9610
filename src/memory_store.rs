use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    db::RowStore,
    error::StoreError,
    ledger::TaskSubmission,
    onboarding::DashboardTask,
    user_data::{UserPatch, UserProfile},
};

/// In-process row store. `set_offline(true)` makes every call fail,
/// which is how an unreachable backend looks to the rest of the crate.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserProfile>>,
    submissions: RwLock<Vec<TaskSubmission>>,
    dashboard_tasks: RwLock<Vec<DashboardTask>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        self.check_online()?;
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError> {
        self.check_online()?;
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(user.clone())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<(), StoreError> {
        self.check_online()?;
        let mut users = self.users.write().await;
        match users.get_mut(id) {
            Some(user) => {
                patch.apply(user, Utc::now());
                Ok(())
            }
            None => Err(StoreError::NotFound {
                table: "users",
                id: id.to_string(),
            }),
        }
    }

    async fn list_submissions(&self, user_id: &str) -> Result<Vec<TaskSubmission>, StoreError> {
        self.check_online()?;
        let mut rows: Vec<TaskSubmission> = self
            .submissions
            .read()
            .await
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_submission(&self, submission: &TaskSubmission) -> Result<(), StoreError> {
        self.check_online()?;
        self.submissions.write().await.push(submission.clone());
        Ok(())
    }

    async fn update_submission(&self, submission: &TaskSubmission) -> Result<(), StoreError> {
        self.check_online()?;
        let mut rows = self.submissions.write().await;
        match rows.iter_mut().find(|row| row.id == submission.id) {
            Some(row) => {
                *row = submission.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                table: "task_submissions",
                id: submission.id.clone(),
            }),
        }
    }

    async fn list_dashboard_tasks(&self, user_id: &str) -> Result<Vec<DashboardTask>, StoreError> {
        self.check_online()?;
        let mut rows: Vec<DashboardTask> = self
            .dashboard_tasks
            .read()
            .await
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_dashboard_task(&self, task: &DashboardTask) -> Result<(), StoreError> {
        self.check_online()?;
        self.dashboard_tasks.write().await.push(task.clone());
        Ok(())
    }

    async fn update_dashboard_task(&self, task: &DashboardTask) -> Result<(), StoreError> {
        self.check_online()?;
        let mut rows = self.dashboard_tasks.write().await;
        match rows.iter_mut().find(|row| row.id == task.id) {
            Some(row) => {
                *row = task.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                table: "dashboard_tasks",
                id: task.id.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::MemoryStore;
    use crate::{
        db::RowStore,
        error::StoreError,
        user_data::{UserPatch, UserProfile},
    };

    #[tokio::test]
    async fn test_user_rows() -> Result<(), String> {
        let store = MemoryStore::new();
        assert!(store.get_user("demo-user-id").await.map_err(|e| e.to_string())?.is_none());
        store
            .insert_user(&UserProfile::demo(Utc::now()))
            .await
            .map_err(|e| e.to_string())?;
        let patch = UserPatch {
            balance: Some(4.0),
            ..UserPatch::default()
        };
        store
            .update_user("demo-user-id", &patch)
            .await
            .map_err(|e| e.to_string())?;
        let user = store
            .get_user("demo-user-id")
            .await
            .map_err(|e| e.to_string())?
            .unwrap();
        assert_eq!(user.balance, 4.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        match store.get_user("demo-user-id").await {
            Err(StoreError::Unavailable(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.list_submissions("demo-user-id").await.is_err());
        store.set_offline(false);
        assert!(store.list_submissions("demo-user-id").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let store = MemoryStore::new();
        let res = store.update_user("nobody", &UserPatch::default()).await;
        assert!(matches!(res, Err(StoreError::NotFound { table: "users", .. })));
    }
}
