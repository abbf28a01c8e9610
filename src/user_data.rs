use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEMO_USER_ID: &str = "demo-user-id";
pub const DEMO_USERNAME: &str = "Web3 User";
pub const DEMO_REFERRAL_CODE: &str = "xyz123";
pub const DEMO_WALLET_ADDRESS: &str = "0x1234...5678";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub balance: f64,
    pub tasks_completed: u32,
    pub total_earned: f64,
    pub level: u32,
    pub referral_code: String,
    pub joined_at: DateTime<Utc>,
    pub congratulated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Fresh profile for the fixed demo identity.
    pub fn demo(now: DateTime<Utc>) -> UserProfile {
        UserProfile {
            id: DEMO_USER_ID.to_string(),
            username: DEMO_USERNAME.to_string(),
            avatar: None,
            balance: 0.0,
            tasks_completed: 0,
            total_earned: 0.0,
            level: 1,
            referral_code: DEMO_REFERRAL_CODE.to_string(),
            joined_at: now,
            congratulated: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Column-level update of a `users` row. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub balance: Option<f64>,
    pub total_earned: Option<f64>,
    pub tasks_completed: Option<u32>,
    pub congratulated: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }

    pub fn apply(&self, profile: &mut UserProfile, now: DateTime<Utc>) {
        if let Some(username) = &self.username {
            profile.username = username.clone();
        }
        if let Some(avatar) = &self.avatar {
            profile.avatar = Some(avatar.clone());
        }
        if let Some(balance) = self.balance {
            profile.balance = balance;
        }
        if let Some(total_earned) = self.total_earned {
            profile.total_earned = total_earned;
        }
        if let Some(tasks_completed) = self.tasks_completed {
            profile.tasks_completed = tasks_completed;
        }
        if let Some(congratulated) = self.congratulated {
            profile.congratulated = congratulated;
        }
        profile.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub avatar: Option<String>,
}

impl From<ProfileUpdate> for UserPatch {
    fn from(update: ProfileUpdate) -> UserPatch {
        UserPatch {
            username: update.username,
            avatar: update.avatar,
            ..UserPatch::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum WalletKind {
    MetaMask,
    TrustWallet,
    WalletConnect,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WalletData {
    pub wallet: WalletKind,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WalletStatus {
    pub connected: bool,
    pub address: Option<String>,
}
