use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum AlertError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding or decoding stored JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Settings update for an endpoint that was never registered
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Subscription is missing its endpoint or push keys
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// The subscription store rejected a read or write
    #[error("Store error: {0}")]
    Store(String),

    /// A pipeline stage stopped accepting input
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Convenient alias over [`Result`] using [`AlertError`]
pub type Result<T> = std::result::Result<T, AlertError>;
