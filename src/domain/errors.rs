//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Protocol gateway error: {0}")]
    Gateway(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Webhook delivery failed: {0}")]
    Webhook(String),

    #[error("Profile store error: {0}")]
    Profile(String),

    #[error("Business backend error: {0}")]
    Backend(String),

    #[error("Engine control error: {0}")]
    Control(String),

    #[error("Media error: {0}")]
    Media(String),

    /// The operation is not available on the connected protocol client.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A rate-limit wait, backoff sleep or request was interrupted by shutdown.
    #[error("Operation cancelled")]
    Cancelled,
}
