use std::time::Duration;

use thiserror::Error;

/// Recipient store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Backend(#[from] libsql::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Storage did not answer within {0:?}")]
    Timeout(Duration),
}

/// Failures delivering a message to a single recipient
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Recipient {0:?} is not a valid chat id")]
    InvalidRecipient(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },
}

/// Failures that make a whole dispatch run ineffective
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to fetch recipients: {0}")]
    FetchRecipients(#[source] StoreError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler has already been started")]
    AlreadyStarted,

    #[error("Task '{name}' needs a non-zero interval")]
    InvalidInterval { name: String },
}
