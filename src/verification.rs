use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinSet};

use crate::{
    catalog::TaskCatalog,
    error::VerificationError,
    events::{EventBus, Notification},
    kv::{self, KeyValueStore},
    ledger::{SubmissionLedger, SubmissionPayload},
    onboarding::{CompletionExtra, DashboardTaskType, OnboardingTracker},
    survey,
    timer::Countdown,
};

pub const FIRST_FAILURE_KEY: &str = "verification.first_failure_consumed";
pub const ATTEMPT_COUNT_KEY: &str = "verification.attempt_count";
pub const PENDING_KEY: &str = "verification.pending";

pub type FailureCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// How long a verification stays in `Verifying` before it resolves.
    pub window: Duration,
    /// Catalog attempt ordinals (1-based, install-wide) that always fail.
    pub scripted_failures: Vec<u32>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            window: Duration::from_secs(10),
            scripted_failures: vec![1, 4, 5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTarget {
    Onboarding(DashboardTaskType),
    Catalog(String),
}

impl VerificationTarget {
    pub fn parse(task_id: &str) -> VerificationTarget {
        match task_id.parse::<DashboardTaskType>() {
            Ok(task_type) => VerificationTarget::Onboarding(task_type),
            Err(_) => VerificationTarget::Catalog(task_id.to_string()),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            VerificationTarget::Onboarding(task_type) => task_type.as_str(),
            VerificationTarget::Catalog(task_id) => task_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Approved,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationPayload {
    Submission(SubmissionPayload),
    Username { username: String },
    Survey { answers: Vec<String> },
}

/// Install-wide attempt bookkeeping, persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationState {
    pub first_failure_consumed: bool,
    pub attempt_count: u32,
}

impl VerificationState {
    pub fn load(kv: &dyn KeyValueStore) -> VerificationState {
        VerificationState {
            first_failure_consumed: kv::get_bool(kv, FIRST_FAILURE_KEY),
            attempt_count: kv::get_u32(kv, ATTEMPT_COUNT_KEY).unwrap_or(0),
        }
    }

    fn save(&self, kv: &dyn KeyValueStore) {
        let first = if self.first_failure_consumed { "true" } else { "false" };
        if let Err(err) = kv.set(FIRST_FAILURE_KEY, first) {
            error!("Error persisting first failure flag: {}", err);
        }
        if let Err(err) = kv.set(ATTEMPT_COUNT_KEY, &self.attempt_count.to_string()) {
            error!("Error persisting attempt count: {}", err);
        }
    }

    fn next_ordinal(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }
}

/// Simulated approval policy. Social onboarding steps fail exactly once per
/// install, the survey never fails, catalog attempts fail on scripted
/// ordinals.
pub fn decide(
    target: &VerificationTarget,
    ordinal: Option<u32>,
    state: &mut VerificationState,
    scripted_failures: &[u32],
) -> Outcome {
    match target {
        VerificationTarget::Onboarding(DashboardTaskType::Survey) => Outcome::Approved,
        VerificationTarget::Onboarding(_) => {
            if state.first_failure_consumed {
                Outcome::Approved
            } else {
                state.first_failure_consumed = true;
                Outcome::Failed
            }
        }
        VerificationTarget::Catalog(_) => match ordinal {
            Some(ordinal) if scripted_failures.contains(&ordinal) => Outcome::Failed,
            _ => Outcome::Approved,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PendingVerification {
    pub task_id: String,
    pub deadline: DateTime<Utc>,
    pub ordinal: Option<u32>,
    pub payload: VerificationPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingStatus {
    pub task_id: String,
    pub deadline: DateTime<Utc>,
    pub remaining_secs: u64,
}

struct SimulatorState {
    attempts: VerificationState,
    pending: BTreeMap<String, PendingVerification>,
    // Entries left over from an earlier run. Only these are resumed; the
    // rest belong to a live `submit`.
    resumable: BTreeSet<String>,
}

/// Drives `Idle -> Verifying -> {Approved | Failed}` for every submission.
///
/// A started verification cannot be cancelled. Its deadline, attempt
/// ordinal and payload are persisted, so a restarted process resolves it
/// with the same outcome via [`VerificationSimulator::resume_pending`].
pub struct VerificationSimulator {
    config: SimulatorConfig,
    kv: Arc<dyn KeyValueStore>,
    events: EventBus,
    catalog: Arc<TaskCatalog>,
    ledger: Arc<SubmissionLedger>,
    tracker: Arc<OnboardingTracker>,
    state: Mutex<SimulatorState>,
}

impl VerificationSimulator {
    pub fn new(
        config: SimulatorConfig,
        kv: Arc<dyn KeyValueStore>,
        events: EventBus,
        catalog: Arc<TaskCatalog>,
        ledger: Arc<SubmissionLedger>,
        tracker: Arc<OnboardingTracker>,
    ) -> VerificationSimulator {
        let attempts = VerificationState::load(kv.as_ref());
        let pending: BTreeMap<String, PendingVerification> =
            kv::get_json(kv.as_ref(), PENDING_KEY).unwrap_or_default();
        if !pending.is_empty() {
            info!("Found {} verifications to resume", pending.len());
        }
        VerificationSimulator {
            config,
            kv,
            events,
            catalog,
            ledger,
            tracker,
            state: Mutex::new(SimulatorState {
                resumable: pending.keys().cloned().collect(),
                attempts,
                pending,
            }),
        }
    }

    pub async fn state(&self) -> VerificationState {
        self.state.lock().await.attempts.clone()
    }

    pub async fn is_verifying(&self) -> bool {
        !self.state.lock().await.pending.is_empty()
    }

    pub async fn pending(&self) -> Vec<PendingStatus> {
        let now = Utc::now();
        self.state
            .lock()
            .await
            .pending
            .values()
            .map(|pending| PendingStatus {
                task_id: pending.task_id.clone(),
                deadline: pending.deadline,
                remaining_secs: Countdown::until(pending.deadline).remaining_secs(now),
            })
            .collect()
    }

    /// Runs one verification to completion. The survey resolves right away;
    /// everything else waits out the configured window first.
    pub async fn submit(
        &self,
        task_id: &str,
        payload: VerificationPayload,
        on_fail: Option<FailureCallback>,
    ) -> Result<Outcome, VerificationError> {
        let target = VerificationTarget::parse(task_id);
        let payload = self.validate(&target, payload).await?;
        let window = match target {
            VerificationTarget::Onboarding(DashboardTaskType::Survey) => Duration::ZERO,
            _ => self.config.window,
        };
        let pending = self.begin(&target, payload, window).await?;
        Countdown::until(pending.deadline).wait().await;
        let task_id = pending.task_id.clone();
        self.resolve(&pending.task_id, on_fail)
            .await
            .ok_or(VerificationError::ResolvedElsewhere(task_id))
    }

    /// Resolves every verification persisted by an earlier run, waiting out
    /// whatever is left of each window. Later calls find nothing to do.
    pub async fn resume_pending(self: &Arc<Self>) -> Vec<(String, Outcome)> {
        let pending: Vec<PendingVerification> = {
            let mut state = self.state.lock().await;
            let resumable = std::mem::take(&mut state.resumable);
            resumable
                .iter()
                .filter_map(|task_id| state.pending.get(task_id).cloned())
                .collect()
        };
        let mut exec_set: JoinSet<Option<(String, Outcome)>> = JoinSet::new();
        for entry in pending {
            let simulator = Arc::clone(self);
            exec_set.spawn(async move {
                let countdown = Countdown::until(entry.deadline);
                info!(
                    "Resuming verification of {} with {}s left",
                    entry.task_id,
                    countdown.remaining_secs(Utc::now())
                );
                countdown.wait().await;
                let task_id = entry.task_id.clone();
                simulator
                    .resolve(&entry.task_id, None)
                    .await
                    .map(|outcome| (task_id, outcome))
            });
        }
        let mut resolved = Vec::new();
        while let Some(res) = exec_set.join_next().await {
            match res {
                Ok(Some(done)) => resolved.push(done),
                Ok(None) => {}
                Err(err) => error!("Resumed verification task failed: {}", err),
            }
        }
        resolved
    }

    async fn validate(
        &self,
        target: &VerificationTarget,
        payload: VerificationPayload,
    ) -> Result<VerificationPayload, VerificationError> {
        match target {
            VerificationTarget::Catalog(task_id) => {
                let task = self
                    .catalog
                    .get_by_id(task_id)
                    .ok_or_else(|| VerificationError::UnknownTask(task_id.clone()))?;
                let required = task.required_easy_tasks();
                if required > 0 {
                    let approved = self.ledger.approved_task_ids().await;
                    let completed = self.catalog.count_easy(&approved);
                    if completed < required {
                        return Err(VerificationError::TaskLocked {
                            task_id: task_id.clone(),
                            required,
                            completed,
                        });
                    }
                }
                match payload {
                    VerificationPayload::Submission(_) => Ok(payload),
                    VerificationPayload::Username { username } => {
                        Ok(VerificationPayload::Submission(SubmissionPayload {
                            screenshot: None,
                            text: Some(username),
                        }))
                    }
                    VerificationPayload::Survey { .. } => Ok(VerificationPayload::Submission(
                        SubmissionPayload::default(),
                    )),
                }
            }
            VerificationTarget::Onboarding(DashboardTaskType::Survey) => match payload {
                VerificationPayload::Survey { answers } => {
                    survey::validate_answers(&answers)?;
                    Ok(VerificationPayload::Survey { answers })
                }
                _ => Err(VerificationError::InvalidSurvey(
                    "no answers given".to_string(),
                )),
            },
            VerificationTarget::Onboarding(task_type) => {
                let username = match payload {
                    VerificationPayload::Username { username } => Some(username),
                    VerificationPayload::Submission(SubmissionPayload { text, .. }) => text,
                    VerificationPayload::Survey { .. } => None,
                };
                match username.map(|u| u.trim().to_string()) {
                    Some(username) if !username.is_empty() => {
                        Ok(VerificationPayload::Username { username })
                    }
                    _ => Err(VerificationError::EmptyUsername(
                        task_type.as_str().to_string(),
                    )),
                }
            }
        }
    }

    async fn begin(
        &self,
        target: &VerificationTarget,
        payload: VerificationPayload,
        window: Duration,
    ) -> Result<PendingVerification, VerificationError> {
        let task_id = target.task_id().to_string();
        let mut state = self.state.lock().await;
        if state.pending.contains_key(&task_id) {
            return Err(VerificationError::AlreadyPending(task_id));
        }
        let ordinal = match target {
            VerificationTarget::Catalog(_) => Some(state.attempts.next_ordinal()),
            VerificationTarget::Onboarding(_) => None,
        };
        let pending = PendingVerification {
            task_id: task_id.clone(),
            deadline: Countdown::starting_at(Utc::now(), window).deadline(),
            ordinal,
            payload,
        };
        state.pending.insert(task_id.clone(), pending.clone());
        self.persist(&state);
        drop(state);

        info!("Verifying {} until {}", task_id, pending.deadline);
        self.events.emit(Notification::VerificationStarted {
            task_id,
            deadline: pending.deadline,
        });
        Ok(pending)
    }

    /// Takes the entry out of the pending set and applies the outcome. Only
    /// the caller that removes the entry resolves it; everyone else gets
    /// `None`.
    async fn resolve(&self, task_id: &str, on_fail: Option<FailureCallback>) -> Option<Outcome> {
        let (pending, outcome) = {
            let mut state = self.state.lock().await;
            let pending = state.pending.remove(task_id)?;
            state.resumable.remove(task_id);
            let target = VerificationTarget::parse(&pending.task_id);
            let outcome = decide(
                &target,
                pending.ordinal,
                &mut state.attempts,
                &self.config.scripted_failures,
            );
            self.persist(&state);
            (pending, outcome)
        };

        let target = VerificationTarget::parse(&pending.task_id);
        Some(match outcome {
            Outcome::Failed => self.fail(&pending.task_id, on_fail),
            Outcome::Approved => self.approve(&target, pending.payload, on_fail).await,
        })
    }

    fn fail(&self, task_id: &str, on_fail: Option<FailureCallback>) -> Outcome {
        info!("Verification of {} failed", task_id);
        if let Some(on_fail) = on_fail {
            on_fail();
        }
        self.events.emit(Notification::VerificationFailed {
            task_id: task_id.to_string(),
        });
        Outcome::Failed
    }

    async fn approve(
        &self,
        target: &VerificationTarget,
        payload: VerificationPayload,
        on_fail: Option<FailureCallback>,
    ) -> Outcome {
        let reward = match target {
            VerificationTarget::Catalog(task_id) => {
                let Some(task) = self.catalog.get_by_id(task_id) else {
                    warn!("Task {} left the catalog while verifying", task_id);
                    return self.fail(task_id, on_fail);
                };
                let payload = match payload {
                    VerificationPayload::Submission(payload) => payload,
                    _ => SubmissionPayload::default(),
                };
                self.ledger.record_approved(task, &payload).await;
                task.reward
            }
            VerificationTarget::Onboarding(task_type) => {
                let extra = match payload {
                    VerificationPayload::Username { username } => CompletionExtra {
                        username: Some(username),
                        survey_answers: None,
                    },
                    VerificationPayload::Survey { answers } => CompletionExtra {
                        username: None,
                        survey_answers: Some(answers),
                    },
                    VerificationPayload::Submission(_) => CompletionExtra::default(),
                };
                self.tracker.mark_completed(*task_type, extra).await;
                0.0
            }
        };
        info!("Verification of {} approved", target.task_id());
        self.events.emit(Notification::VerificationApproved {
            task_id: target.task_id().to_string(),
            reward,
        });
        Outcome::Approved
    }

    fn persist(&self, state: &SimulatorState) {
        state.attempts.save(self.kv.as_ref());
        let res = if state.pending.is_empty() {
            self.kv.remove(PENDING_KEY)
        } else {
            kv::set_json(self.kv.as_ref(), PENDING_KEY, &state.pending)
        };
        if let Err(err) = res {
            error!("Error persisting pending verifications: {}", err);
        }
    }
}
