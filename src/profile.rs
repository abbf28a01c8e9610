use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{error, info, warn};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    time::timeout,
};

use crate::{
    db::RowStore,
    error::StoreError,
    user_data::{
        ProfileUpdate, UserPatch, UserProfile, WalletKind, DEMO_USER_ID, DEMO_WALLET_ADDRESS,
    },
};

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Upper bound on how long startup waits for the backing store.
    pub init_timeout: Duration,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            init_timeout: Duration::from_secs(3),
        }
    }
}

enum ProfileWrite {
    Patch { user_id: String, patch: UserPatch },
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct ProfileState {
    profile: Option<UserProfile>,
    local_only: bool,
    wallet: Option<String>,
    writer: Option<mpsc::UnboundedSender<ProfileWrite>>,
}

/// Single authoritative copy of the session's user profile.
///
/// Every mutation is applied in memory first and then queued for the
/// backing store. Queued writes are applied in order by one background
/// task; a failed write is logged and the in-memory value stays.
pub struct ProfileStore {
    store: Option<Arc<dyn RowStore>>,
    config: ProfileConfig,
    state: Mutex<ProfileState>,
}

async fn fetch_or_create(store: &dyn RowStore) -> Result<UserProfile, StoreError> {
    if let Some(existing) = store.get_user(DEMO_USER_ID).await? {
        info!("Loaded profile {}", existing.id);
        return Ok(existing);
    }
    let created = store.insert_user(&UserProfile::demo(Utc::now())).await?;
    info!("Created profile {}", created.id);
    Ok(created)
}

fn spawn_writer(store: Arc<dyn RowStore>) -> mpsc::UnboundedSender<ProfileWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            match write {
                ProfileWrite::Patch { user_id, patch } => {
                    if let Err(err) = store.update_user(&user_id, &patch).await {
                        error!("Error writing profile {}: {}", user_id, err);
                    }
                }
                ProfileWrite::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    });
    tx
}

impl ProfileStore {
    pub fn new(store: Option<Arc<dyn RowStore>>, config: ProfileConfig) -> ProfileStore {
        ProfileStore {
            store,
            config,
            state: Mutex::new(ProfileState::default()),
        }
    }

    /// Loads or creates the demo profile. Never fails: an unreachable or
    /// slow backing store leaves the session on a local default profile.
    pub async fn initialize(&self) -> UserProfile {
        let mut state = self.state.lock().await;
        if let Some(profile) = &state.profile {
            return profile.clone();
        }
        let (profile, writer) = match &self.store {
            None => {
                warn!("No backing store configured, using a local profile");
                (UserProfile::demo(Utc::now()), None)
            }
            Some(store) => {
                match timeout(self.config.init_timeout, fetch_or_create(store.as_ref())).await {
                    Ok(Ok(profile)) => (profile, Some(spawn_writer(store.clone()))),
                    Ok(Err(err)) => {
                        error!("Error initializing user: {}", err);
                        warn!("Falling back to a local profile");
                        (UserProfile::demo(Utc::now()), None)
                    }
                    Err(_) => {
                        error!(
                            "Backing store did not answer within {:?}",
                            self.config.init_timeout
                        );
                        warn!("Falling back to a local profile");
                        (UserProfile::demo(Utc::now()), None)
                    }
                }
            }
        };
        state.local_only = writer.is_none();
        state.writer = writer;
        state.wallet = Some(DEMO_WALLET_ADDRESS.to_string());
        state.profile = Some(profile.clone());
        profile
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.state.lock().await.profile.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.profile.is_some()
    }

    pub async fn is_local_only(&self) -> bool {
        self.state.lock().await.local_only
    }

    /// Adds a non-negative, finite amount to both balance and total earned.
    pub async fn credit_balance(&self, amount: f64) {
        if !amount.is_finite() || amount < 0.0 {
            warn!("Ignoring credit of {}", amount);
            return;
        }
        self.mutate(|profile| UserPatch {
            balance: Some(profile.balance + amount),
            total_earned: Some(profile.total_earned + amount),
            ..UserPatch::default()
        })
        .await;
    }

    pub async fn set_tasks_completed(&self, count: u32) {
        self.mutate(|_| UserPatch {
            tasks_completed: Some(count),
            ..UserPatch::default()
        })
        .await;
    }

    pub async fn set_congratulated(&self) {
        self.mutate(|profile| {
            if profile.congratulated {
                UserPatch::default()
            } else {
                UserPatch {
                    congratulated: Some(true),
                    ..UserPatch::default()
                }
            }
        })
        .await;
    }

    pub async fn update_profile_fields(&self, update: ProfileUpdate) {
        let patch: UserPatch = update.into();
        self.mutate(move |_| patch).await;
    }

    pub async fn connect_wallet(&self, kind: WalletKind) -> String {
        let mut state = self.state.lock().await;
        info!("Connecting {:?} wallet", kind);
        let address = DEMO_WALLET_ADDRESS.to_string();
        state.wallet = Some(address.clone());
        address
    }

    pub async fn disconnect_wallet(&self) {
        self.state.lock().await.wallet = None;
    }

    pub async fn wallet(&self) -> Option<String> {
        self.state.lock().await.wallet.clone()
    }

    /// Waits until every write queued so far has reached the backing store.
    pub async fn flush(&self) {
        let writer = self.state.lock().await.writer.clone();
        if let Some(writer) = writer {
            let (done_tx, done_rx) = oneshot::channel();
            if writer.send(ProfileWrite::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Read-modify-write under the state lock; a missing profile makes
    /// this a no-op.
    async fn mutate<F>(&self, build: F)
    where
        F: FnOnce(&UserProfile) -> UserPatch,
    {
        let mut state = self.state.lock().await;
        let Some(profile) = state.profile.as_mut() else {
            return;
        };
        let patch = build(profile);
        if patch.is_empty() {
            return;
        }
        patch.apply(profile, Utc::now());
        let user_id = profile.id.clone();
        if let Some(writer) = &state.writer {
            if writer.send(ProfileWrite::Patch { user_id, patch }).is_err() {
                error!("Profile writer stopped, keeping local state only");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{ProfileConfig, ProfileStore};
    use crate::{
        db::RowStore,
        error::StoreError,
        ledger::TaskSubmission,
        memory_store::MemoryStore,
        onboarding::DashboardTask,
        user_data::{ProfileUpdate, UserPatch, UserProfile, WalletKind, DEMO_USER_ID},
    };

    async fn online() -> (Arc<MemoryStore>, ProfileStore) {
        let backend = Arc::new(MemoryStore::new());
        let store = ProfileStore::new(Some(backend.clone()), ProfileConfig::default());
        store.initialize().await;
        (backend, store)
    }

    #[tokio::test]
    async fn test_initialize_creates_then_reuses() -> Result<(), String> {
        let (backend, store) = online().await;
        assert!(!store.is_local_only().await);
        store.credit_balance(3.0).await;
        store.flush().await;

        let again = ProfileStore::new(Some(backend.clone()), ProfileConfig::default());
        let profile = again.initialize().await;
        assert_eq!(profile.balance, 3.0);
        assert_eq!(profile.id, DEMO_USER_ID);
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_falls_back_when_offline() {
        let backend = Arc::new(MemoryStore::new());
        backend.set_offline(true);
        let store = ProfileStore::new(Some(backend), ProfileConfig::default());
        let profile = store.initialize().await;
        assert!(store.is_local_only().await);
        assert_eq!(profile.balance, 0.0);
        assert_eq!(profile.level, 1);
        assert_eq!(store.wallet().await.as_deref(), Some("0x1234...5678"));
    }

    struct StalledStore;

    #[async_trait]
    impl RowStore for StalledStore {
        async fn get_user(&self, _id: &str) -> Result<Option<UserProfile>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, StoreError> {
            Ok(user.clone())
        }
        async fn update_user(&self, _id: &str, _patch: &UserPatch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn list_submissions(&self, _u: &str) -> Result<Vec<TaskSubmission>, StoreError> {
            Ok(Vec::new())
        }
        async fn insert_submission(&self, _s: &TaskSubmission) -> Result<(), StoreError> {
            Ok(())
        }
        async fn update_submission(&self, _s: &TaskSubmission) -> Result<(), StoreError> {
            Ok(())
        }
        async fn list_dashboard_tasks(&self, _u: &str) -> Result<Vec<DashboardTask>, StoreError> {
            Ok(Vec::new())
        }
        async fn insert_dashboard_task(&self, _t: &DashboardTask) -> Result<(), StoreError> {
            Ok(())
        }
        async fn update_dashboard_task(&self, _t: &DashboardTask) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_is_time_boxed() {
        let store = ProfileStore::new(
            Some(Arc::new(StalledStore)),
            ProfileConfig {
                init_timeout: Duration::from_millis(20),
            },
        );
        let profile = tokio::time::timeout(Duration::from_secs(5), store.initialize())
            .await
            .unwrap();
        assert_eq!(profile.id, DEMO_USER_ID);
        assert!(store.is_local_only().await);
    }

    #[tokio::test]
    async fn test_credit_balance_adds_to_both_totals() {
        let (_, store) = online().await;
        store.credit_balance(5.0).await;
        store.credit_balance(0.0).await;
        store.credit_balance(2.5).await;
        let profile = store.profile().await.unwrap();
        assert_eq!(profile.balance, 7.5);
        assert_eq!(profile.total_earned, 7.5);
    }

    #[tokio::test]
    async fn test_credit_balance_rejects_bad_amounts() {
        let (_, store) = online().await;
        store.credit_balance(f64::NAN).await;
        store.credit_balance(f64::INFINITY).await;
        store.credit_balance(-1.0).await;
        let profile = store.profile().await.unwrap();
        assert_eq!(profile.balance, 0.0);
        assert_eq!(profile.total_earned, 0.0);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_local_value() -> Result<(), String> {
        let (backend, store) = online().await;
        backend.set_offline(true);
        store.credit_balance(5.0).await;
        store.set_tasks_completed(4).await;
        store.flush().await;
        let profile = store.profile().await.unwrap();
        assert_eq!(profile.balance, 5.0);
        assert_eq!(profile.tasks_completed, 4);

        backend.set_offline(false);
        let remote = backend
            .get_user(DEMO_USER_ID)
            .await
            .map_err(|e| e.to_string())?
            .unwrap();
        assert_eq!(remote.balance, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_reach_backing_store() -> Result<(), String> {
        let (backend, store) = online().await;
        store.credit_balance(5.0).await;
        store.set_tasks_completed(1).await;
        store
            .update_profile_fields(ProfileUpdate {
                username: Some("alice".to_string()),
                avatar: Some("owl".to_string()),
            })
            .await;
        store.flush().await;
        let remote = backend
            .get_user(DEMO_USER_ID)
            .await
            .map_err(|e| e.to_string())?
            .unwrap();
        assert_eq!(remote.balance, 5.0);
        assert_eq!(remote.total_earned, 5.0);
        assert_eq!(remote.tasks_completed, 1);
        assert_eq!(remote.username, "alice");
        assert_eq!(remote.avatar.as_deref(), Some("owl"));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_congratulated_is_idempotent() {
        let (_, store) = online().await;
        store.credit_balance(2.0).await;
        let before = store.profile().await.unwrap();
        store.set_congratulated().await;
        let once = store.profile().await.unwrap();
        store.set_congratulated().await;
        store.set_congratulated().await;
        let thrice = store.profile().await.unwrap();
        assert!(once.congratulated);
        assert_eq!(once, thrice);
        assert_eq!(thrice.balance, before.balance);
        assert_eq!(thrice.total_earned, before.total_earned);
        assert_eq!(thrice.tasks_completed, before.tasks_completed);
    }

    #[tokio::test]
    async fn test_mutations_without_profile_are_noops() {
        let store = ProfileStore::new(None, ProfileConfig::default());
        store.credit_balance(5.0).await;
        store.set_congratulated().await;
        assert!(store.profile().await.is_none());
        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn test_wallet_stub() {
        let store = ProfileStore::new(None, ProfileConfig::default());
        let profile = store.initialize().await;
        assert!(profile.joined_at <= Utc::now());
        store.disconnect_wallet().await;
        assert!(store.wallet().await.is_none());
        let address = store.connect_wallet(WalletKind::TrustWallet).await;
        assert_eq!(address, "0x1234...5678");
        assert_eq!(store.wallet().await, Some(address));
    }
}
