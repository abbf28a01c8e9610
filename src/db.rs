use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use mysql::{prelude::FromValue, prelude::Queryable, Conn, Params, Pool, PooledConn, Row, Value};
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    ledger::{SubmissionStatus, TaskSubmission},
    onboarding::{DashboardTask, DashboardTaskType},
    user_data::{UserPatch, UserProfile},
};

/// Remote row store holding `users`, `task_submissions` and `dashboard_tasks`.
/// A missing row is `Ok(None)`, never an error.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<UserProfile>, StoreError>;
    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError>;
    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<(), StoreError>;

    async fn list_submissions(&self, user_id: &str) -> Result<Vec<TaskSubmission>, StoreError>;
    async fn insert_submission(&self, submission: &TaskSubmission) -> Result<(), StoreError>;
    async fn update_submission(&self, submission: &TaskSubmission) -> Result<(), StoreError>;

    async fn list_dashboard_tasks(&self, user_id: &str) -> Result<Vec<DashboardTask>, StoreError>;
    async fn insert_dashboard_task(&self, task: &DashboardTask) -> Result<(), StoreError>;
    async fn update_dashboard_task(&self, task: &DashboardTask) -> Result<(), StoreError>;
}

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS users (
        id VARCHAR(64) PRIMARY KEY,
        username VARCHAR(255) NOT NULL,
        avatar VARCHAR(255) NULL,
        balance DOUBLE NOT NULL DEFAULT 0,
        tasks_completed INT UNSIGNED NOT NULL DEFAULT 0,
        total_earned DOUBLE NOT NULL DEFAULT 0,
        level INT UNSIGNED NOT NULL DEFAULT 1,
        referral_code VARCHAR(64) NOT NULL,
        joined_at VARCHAR(40) NOT NULL,
        congratulated BOOLEAN NOT NULL DEFAULT FALSE,
        created_at VARCHAR(40) NOT NULL,
        updated_at VARCHAR(40) NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS task_submissions (
        id VARCHAR(64) PRIMARY KEY,
        user_id VARCHAR(64) NOT NULL,
        task_id VARCHAR(64) NOT NULL,
        screenshot TEXT NULL,
        text TEXT NULL,
        status VARCHAR(16) NOT NULL,
        submitted_at VARCHAR(40) NOT NULL,
        created_at VARCHAR(40) NOT NULL,
        updated_at VARCHAR(40) NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dashboard_tasks (
        id VARCHAR(64) PRIMARY KEY,
        user_id VARCHAR(64) NOT NULL,
        task_type VARCHAR(16) NOT NULL,
        completed BOOLEAN NOT NULL DEFAULT FALSE,
        first_click_done BOOLEAN NOT NULL DEFAULT FALSE,
        username_provided VARCHAR(255) NULL,
        survey_answers TEXT NULL,
        completed_at VARCHAR(40) NULL,
        created_at VARCHAR(40) NOT NULL,
        updated_at VARCHAR(40) NOT NULL
    )",
];

pub struct MySqlStore {
    conn: Arc<Mutex<PooledConn>>,
}

impl MySqlStore {
    pub fn connect(url: &str) -> Result<MySqlStore, StoreError> {
        let conn = Pool::new(url)?.get_conn()?;
        Ok(MySqlStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        for stmt in SCHEMA {
            conn.query_drop(stmt)?;
        }
        info!("Database schema is ready.");
        Ok(())
    }
}

fn check_conn(conn: &mut Conn) {
    if conn.ping().is_err() {
        let _ = conn.reset();
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn column<T: FromValue>(row: &Row, table: &'static str, name: &str) -> Result<T, StoreError> {
    match row.get_opt::<T, _>(name) {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(StoreError::Decode {
            table,
            reason: format!("column {}: {}", name, err),
        }),
        None => Err(StoreError::Decode {
            table,
            reason: format!("missing column {}", name),
        }),
    }
}

fn time_column(row: &Row, table: &'static str, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = column(row, table, name)?;
    parse_time(&raw, table)
}

fn parse_time(raw: &str, table: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StoreError::Decode {
            table,
            reason: format!("timestamp {}: {}", raw, err),
        })
}

fn user_from_row(row: &Row) -> Result<UserProfile, StoreError> {
    Ok(UserProfile {
        id: column(row, "users", "id")?,
        username: column(row, "users", "username")?,
        avatar: column(row, "users", "avatar")?,
        balance: column(row, "users", "balance")?,
        tasks_completed: column(row, "users", "tasks_completed")?,
        total_earned: column(row, "users", "total_earned")?,
        level: column(row, "users", "level")?,
        referral_code: column(row, "users", "referral_code")?,
        joined_at: time_column(row, "users", "joined_at")?,
        congratulated: column(row, "users", "congratulated")?,
        created_at: time_column(row, "users", "created_at")?,
        updated_at: time_column(row, "users", "updated_at")?,
    })
}

fn submission_from_row(row: &Row) -> Result<TaskSubmission, StoreError> {
    let status: String = column(row, "task_submissions", "status")?;
    let status = SubmissionStatus::from_str(&status).map_err(|reason| StoreError::Decode {
        table: "task_submissions",
        reason,
    })?;
    Ok(TaskSubmission {
        id: column(row, "task_submissions", "id")?,
        user_id: column(row, "task_submissions", "user_id")?,
        task_id: column(row, "task_submissions", "task_id")?,
        screenshot: column(row, "task_submissions", "screenshot")?,
        text: column(row, "task_submissions", "text")?,
        status,
        submitted_at: time_column(row, "task_submissions", "submitted_at")?,
        created_at: time_column(row, "task_submissions", "created_at")?,
        updated_at: time_column(row, "task_submissions", "updated_at")?,
    })
}

fn dashboard_task_from_row(row: &Row) -> Result<DashboardTask, StoreError> {
    let task_type: String = column(row, "dashboard_tasks", "task_type")?;
    let task_type =
        DashboardTaskType::from_str(&task_type).map_err(|reason| StoreError::Decode {
            table: "dashboard_tasks",
            reason,
        })?;
    let survey_answers: Option<String> = column(row, "dashboard_tasks", "survey_answers")?;
    let survey_answers = match survey_answers {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|err| StoreError::Decode {
            table: "dashboard_tasks",
            reason: format!("survey_answers: {}", err),
        })?),
        None => None,
    };
    let completed_at: Option<String> = column(row, "dashboard_tasks", "completed_at")?;
    let completed_at = match completed_at {
        Some(raw) => Some(parse_time(&raw, "dashboard_tasks")?),
        None => None,
    };
    Ok(DashboardTask {
        id: column(row, "dashboard_tasks", "id")?,
        user_id: column(row, "dashboard_tasks", "user_id")?,
        task_type,
        completed: column(row, "dashboard_tasks", "completed")?,
        first_click_done: column(row, "dashboard_tasks", "first_click_done")?,
        username_provided: column(row, "dashboard_tasks", "username_provided")?,
        survey_answers,
        completed_at,
        created_at: time_column(row, "dashboard_tasks", "created_at")?,
        updated_at: time_column(row, "dashboard_tasks", "updated_at")?,
    })
}

fn survey_json(task: &DashboardTask) -> Result<Option<String>, StoreError> {
    match &task.survey_answers {
        Some(answers) => serde_json::to_string(answers)
            .map(Some)
            .map_err(|err| StoreError::Decode {
                table: "dashboard_tasks",
                reason: err.to_string(),
            }),
        None => Ok(None),
    }
}

#[async_trait]
impl RowStore for MySqlStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        let row: Option<Row> =
            conn.exec_first("SELECT * FROM users WHERE id = ?", (id.to_string(),))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        conn.exec_drop(
            "INSERT INTO users (id, username, avatar, balance, tasks_completed, total_earned,
                level, referral_code, joined_at, congratulated, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &user.id,
                &user.username,
                &user.avatar,
                user.balance,
                user.tasks_completed,
                user.total_earned,
                user.level,
                &user.referral_code,
                timestamp(&user.joined_at),
                user.congratulated,
                timestamp(&user.created_at),
                timestamp(&user.updated_at),
            ),
        )?;
        Ok(user.clone())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> Result<(), StoreError> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(username) = &patch.username {
            sets.push("username = ?");
            values.push(username.clone().into());
        }
        if let Some(avatar) = &patch.avatar {
            sets.push("avatar = ?");
            values.push(avatar.clone().into());
        }
        if let Some(balance) = patch.balance {
            sets.push("balance = ?");
            values.push(balance.into());
        }
        if let Some(total_earned) = patch.total_earned {
            sets.push("total_earned = ?");
            values.push(total_earned.into());
        }
        if let Some(tasks_completed) = patch.tasks_completed {
            sets.push("tasks_completed = ?");
            values.push(tasks_completed.into());
        }
        if let Some(congratulated) = patch.congratulated {
            sets.push("congratulated = ?");
            values.push(congratulated.into());
        }
        sets.push("updated_at = ?");
        values.push(timestamp(&Utc::now()).into());
        values.push(id.to_string().into());

        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        conn.exec_drop(
            format!("UPDATE users SET {} WHERE id = ?", sets.join(", ")),
            Params::Positional(values),
        )?;
        if conn.affected_rows() == 0 {
            return Err(StoreError::NotFound {
                table: "users",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_submissions(&self, user_id: &str) -> Result<Vec<TaskSubmission>, StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        let rows: Vec<Row> = conn.exec(
            "SELECT * FROM task_submissions WHERE user_id = ? ORDER BY created_at DESC",
            (user_id.to_string(),),
        )?;
        rows.iter().map(submission_from_row).collect()
    }

    async fn insert_submission(&self, submission: &TaskSubmission) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        conn.exec_drop(
            "INSERT INTO task_submissions (id, user_id, task_id, screenshot, text, status,
                submitted_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &submission.id,
                &submission.user_id,
                &submission.task_id,
                &submission.screenshot,
                &submission.text,
                submission.status.as_str().to_string(),
                timestamp(&submission.submitted_at),
                timestamp(&submission.created_at),
                timestamp(&submission.updated_at),
            ),
        )?;
        Ok(())
    }

    async fn update_submission(&self, submission: &TaskSubmission) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        conn.exec_drop(
            "UPDATE task_submissions SET screenshot = ?, text = ?, status = ?, submitted_at = ?,
                updated_at = ? WHERE id = ?",
            (
                &submission.screenshot,
                &submission.text,
                submission.status.as_str().to_string(),
                timestamp(&submission.submitted_at),
                timestamp(&submission.updated_at),
                &submission.id,
            ),
        )?;
        if conn.affected_rows() == 0 {
            return Err(StoreError::NotFound {
                table: "task_submissions",
                id: submission.id.clone(),
            });
        }
        Ok(())
    }

    async fn list_dashboard_tasks(&self, user_id: &str) -> Result<Vec<DashboardTask>, StoreError> {
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        let rows: Vec<Row> = conn.exec(
            "SELECT * FROM dashboard_tasks WHERE user_id = ? ORDER BY created_at DESC",
            (user_id.to_string(),),
        )?;
        rows.iter().map(dashboard_task_from_row).collect()
    }

    async fn insert_dashboard_task(&self, task: &DashboardTask) -> Result<(), StoreError> {
        let survey_answers = survey_json(task)?;
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        conn.exec_drop(
            "INSERT INTO dashboard_tasks (id, user_id, task_type, completed, first_click_done,
                username_provided, survey_answers, completed_at, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &task.id,
                &task.user_id,
                task.task_type.as_str().to_string(),
                task.completed,
                task.first_click_done,
                &task.username_provided,
                survey_answers,
                task.completed_at.as_ref().map(timestamp),
                timestamp(&task.created_at),
                timestamp(&task.updated_at),
            ),
        )?;
        Ok(())
    }

    async fn update_dashboard_task(&self, task: &DashboardTask) -> Result<(), StoreError> {
        let survey_answers = survey_json(task)?;
        let mut conn = self.conn.lock().await;
        check_conn(conn.as_mut());
        conn.exec_drop(
            "UPDATE dashboard_tasks SET completed = ?, first_click_done = ?, username_provided = ?,
                survey_answers = ?, completed_at = ?, updated_at = ? WHERE id = ?",
            (
                task.completed,
                task.first_click_done,
                &task.username_provided,
                survey_answers,
                task.completed_at.as_ref().map(timestamp),
                timestamp(&task.updated_at),
                &task.id,
            ),
        )?;
        if conn.affected_rows() == 0 {
            return Err(StoreError::NotFound {
                table: "dashboard_tasks",
                id: task.id.clone(),
            });
        }
        Ok(())
    }
}
