use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Json};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::TaskDefinition,
    error::VerificationError,
    ledger::{SubmissionPayload, TaskSubmission},
    onboarding::{ClickAction, DashboardTask, DashboardTaskType},
    session::{AppSession, HistoryEntry, WithdrawCheck},
    user_data::{ProfileUpdate, UserProfile, WalletData, WalletStatus},
    verification::{Outcome, PendingStatus, VerificationPayload},
};

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitTaskData {
    pub task_id: String,
    pub screenshot: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DashboardTaskData {
    pub task_type: DashboardTaskType,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SocialVerifyData {
    pub task_type: DashboardTaskType,
    pub username: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SurveyData {
    pub answers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub task_id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct TaskDetail {
    pub task: TaskDefinition,
    pub submission: Option<TaskSubmission>,
}

fn status_for(err: &VerificationError) -> StatusCode {
    match err {
        VerificationError::UnknownTask(_) => StatusCode::NOT_FOUND,
        VerificationError::AlreadyPending(_) | VerificationError::ResolvedElsewhere(_) => {
            StatusCode::CONFLICT
        }
        VerificationError::TaskLocked { .. } => StatusCode::FORBIDDEN,
        VerificationError::InvalidSurvey(_) | VerificationError::EmptyUsername(_) => {
            StatusCode::BAD_REQUEST
        }
    }
}

fn verification_result(
    task_id: &str,
    res: Result<Outcome, VerificationError>,
) -> Result<Json<VerificationResult>, StatusCode> {
    match res {
        Ok(outcome) => Ok(Json(VerificationResult {
            task_id: task_id.to_string(),
            outcome,
        })),
        Err(err) => {
            error!("Error verifying {}: {}", task_id, err);
            Err(status_for(&err))
        }
    }
}

pub async fn handle_get_profile(session: Arc<AppSession>) -> Result<Json<UserProfile>, StatusCode> {
    match session.profile().await {
        Some(profile) => Ok(Json(profile)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn handle_update_profile(
    input_json: Json<ProfileUpdate>,
    session: Arc<AppSession>,
) -> Result<Json<UserProfile>, StatusCode> {
    if let Some(username) = &input_json.username {
        if username.trim().is_empty() {
            error!("Rejecting blank username");
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    session.profile_store().update_profile_fields(input_json.0).await;
    handle_get_profile(session).await
}

pub async fn handle_connect_wallet(
    input_json: Json<WalletData>,
    session: Arc<AppSession>,
) -> Json<WalletStatus> {
    let address = session.connect_wallet(input_json.wallet).await;
    Json(WalletStatus {
        connected: true,
        address: Some(address),
    })
}

pub async fn handle_disconnect_wallet(session: Arc<AppSession>) -> Json<WalletStatus> {
    session.disconnect_wallet().await;
    Json(WalletStatus {
        connected: false,
        address: None,
    })
}

pub async fn handle_list_tasks(session: Arc<AppSession>) -> Json<Vec<TaskDefinition>> {
    Json(session.tasks().to_vec())
}

pub async fn handle_get_task(
    Path(task_id): Path<String>,
    session: Arc<AppSession>,
) -> Result<Json<TaskDetail>, StatusCode> {
    let Some(task) = session.task(&task_id).cloned() else {
        return Err(StatusCode::NOT_FOUND);
    };
    let submission = session.submission_for_task(&task_id).await;
    Ok(Json(TaskDetail { task, submission }))
}

/// Blocks for the whole verification window, then answers with the outcome.
pub async fn handle_submit_task(
    input_json: Json<SubmitTaskData>,
    session: Arc<AppSession>,
) -> Result<Json<VerificationResult>, StatusCode> {
    let SubmitTaskData {
        task_id,
        screenshot,
        text,
    } = input_json.0;
    info!("Submission received for {}", task_id);
    let res = session
        .submit_task(
            &task_id,
            VerificationPayload::Submission(SubmissionPayload { screenshot, text }),
            None,
        )
        .await;
    verification_result(&task_id, res)
}

pub async fn handle_list_verifications(session: Arc<AppSession>) -> Json<Vec<PendingStatus>> {
    Json(session.pending_verifications().await)
}

pub async fn handle_list_dashboard_tasks(session: Arc<AppSession>) -> Json<Vec<DashboardTask>> {
    Json(session.dashboard_tasks().await)
}

pub async fn handle_click_dashboard_task(
    input_json: Json<DashboardTaskData>,
    session: Arc<AppSession>,
) -> Json<ClickAction> {
    Json(session.click_dashboard_task(input_json.task_type).await)
}

pub async fn handle_verify_social_task(
    input_json: Json<SocialVerifyData>,
    session: Arc<AppSession>,
) -> Result<Json<VerificationResult>, StatusCode> {
    let task_type = input_json.task_type;
    if !task_type.is_social() {
        error!("{} is not a social task", task_type.as_str());
        return Err(StatusCode::BAD_REQUEST);
    }
    let res = session
        .verify_social_task(task_type, &input_json.username, None)
        .await;
    verification_result(task_type.as_str(), res)
}

pub async fn handle_complete_survey(
    input_json: Json<SurveyData>,
    session: Arc<AppSession>,
) -> Result<Json<VerificationResult>, StatusCode> {
    let res = session.complete_survey(input_json.0.answers).await;
    verification_result(DashboardTaskType::Survey.as_str(), res)
}

pub async fn handle_history(session: Arc<AppSession>) -> Json<Vec<HistoryEntry>> {
    Json(session.task_history().await)
}

pub async fn handle_withdraw_check(session: Arc<AppSession>) -> Json<WithdrawCheck> {
    Json(session.withdraw_check().await)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{extract::Path, http::StatusCode, Json};

    use super::{
        handle_complete_survey, handle_get_task, handle_submit_task, handle_update_profile,
        handle_verify_social_task, handle_withdraw_check, SocialVerifyData, SubmitTaskData,
        SurveyData,
    };
    use crate::{
        catalog::TaskCatalog,
        events::EventBus,
        kv::MemoryKv,
        memory_store::MemoryStore,
        onboarding::DashboardTaskType,
        profile::{ProfileConfig, ProfileStore},
        session::AppSession,
        user_data::ProfileUpdate,
        verification::{Outcome, SimulatorConfig},
    };

    async fn session() -> Arc<AppSession> {
        let backend = Arc::new(MemoryStore::new());
        let profile = Arc::new(ProfileStore::new(
            Some(backend.clone()),
            ProfileConfig::default(),
        ));
        profile.initialize().await;
        let session = AppSession::attach(
            profile,
            Some(backend),
            Arc::new(MemoryKv::new()),
            TaskCatalog::builtin(),
            SimulatorConfig {
                window: Duration::ZERO,
                ..SimulatorConfig::default()
            },
            EventBus::new(),
        )
        .await
        .unwrap();
        Arc::new(session)
    }

    fn submit(task_id: &str) -> Json<SubmitTaskData> {
        Json(SubmitTaskData {
            task_id: task_id.to_string(),
            screenshot: None,
            text: Some("@alice".to_string()),
        })
    }

    #[tokio::test]
    async fn test_submit_status_codes() {
        let session = session().await;
        assert_eq!(
            handle_submit_task(submit("missing"), session.clone())
                .await
                .unwrap_err(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            handle_submit_task(submit("make-video"), session.clone())
                .await
                .unwrap_err(),
            StatusCode::FORBIDDEN
        );
        let first = handle_submit_task(submit("follow-x"), session.clone())
            .await
            .unwrap();
        assert_eq!(first.outcome, Outcome::Failed);
        let second = handle_submit_task(submit("follow-x"), session.clone())
            .await
            .unwrap();
        assert_eq!(second.outcome, Outcome::Approved);

        let detail = handle_get_task(Path("follow-x".to_string()), session.clone())
            .await
            .unwrap();
        assert_eq!(detail.submission.as_ref().unwrap().text.as_deref(), Some("@alice"));
        assert_eq!(handle_withdraw_check(session).await.balance, 5.0);
    }

    #[tokio::test]
    async fn test_onboarding_input_validation() {
        let session = session().await;
        let blank = handle_verify_social_task(
            Json(SocialVerifyData {
                task_type: DashboardTaskType::Telegram,
                username: " ".to_string(),
            }),
            session.clone(),
        )
        .await;
        assert_eq!(blank.unwrap_err(), StatusCode::BAD_REQUEST);

        let survey_as_social = handle_verify_social_task(
            Json(SocialVerifyData {
                task_type: DashboardTaskType::Survey,
                username: "alice".to_string(),
            }),
            session.clone(),
        )
        .await;
        assert_eq!(survey_as_social.unwrap_err(), StatusCode::BAD_REQUEST);

        let short_survey = handle_complete_survey(
            Json(SurveyData {
                answers: vec!["Friend".to_string()],
            }),
            session,
        )
        .await;
        assert_eq!(short_survey.unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_profile() {
        let session = session().await;
        let blank = handle_update_profile(
            Json(ProfileUpdate {
                username: Some("  ".to_string()),
                avatar: None,
            }),
            session.clone(),
        )
        .await;
        assert_eq!(blank.unwrap_err(), StatusCode::BAD_REQUEST);

        let updated = handle_update_profile(
            Json(ProfileUpdate {
                username: Some("alice".to_string()),
                avatar: Some("fox".to_string()),
            }),
            session,
        )
        .await
        .unwrap();
        assert_eq!(updated.username, "alice");
        assert_eq!(updated.avatar.as_deref(), Some("fox"));
    }
}
