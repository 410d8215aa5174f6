use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{blocked} blocked sites exceed the native rule capacity of {capacity}")]
    RuleCapacityExceeded { blocked: usize, capacity: u32 },
    #[error("native rule id {0} is already installed")]
    DuplicateRuleId(u32),
    #[error("tab {0} not found")]
    TabNotFound(u64),
    #[error("{0} lock poisoned")]
    LockPoisoned(String),
}
