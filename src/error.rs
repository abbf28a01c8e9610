use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(#[from] mysql::Error),

    #[error("Malformed {table} row: {reason}")]
    Decode { table: &'static str, reason: String },

    #[error("No {table} row with id {id}")]
    NotFound { table: &'static str, id: String },
}

#[derive(Error, Debug)]
pub enum KvError {
    #[error("State file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum VerificationError {
    #[error("Unknown task {0}")]
    UnknownTask(String),

    #[error("Task {task_id} requires {required} approved easy tasks, got {completed}")]
    TaskLocked {
        task_id: String,
        required: u32,
        completed: u32,
    },

    #[error("A verification for task {0} is already running")]
    AlreadyPending(String),

    #[error("Invalid survey answers: {0}")]
    InvalidSurvey(String),

    #[error("A username is required to verify {0}")]
    EmptyUsername(String),

    #[error("The verification for task {0} was resolved by another caller")]
    ResolvedElsewhere(String),
}

/// Wiring mistakes. These are not runtime data conditions and are
/// returned immediately instead of being absorbed.
#[derive(Error, Debug, PartialEq)]
pub enum ContextError {
    #[error("Task layer attached before the user profile was initialized")]
    ProfileNotInitialized,
}
