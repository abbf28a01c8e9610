pub mod catalog;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod kv;
pub mod ledger;
pub mod memory_store;
pub mod onboarding;
pub mod profile;
pub mod progress;
pub mod session;
pub mod survey;
pub mod timer;
pub mod user_data;
pub mod verification;
