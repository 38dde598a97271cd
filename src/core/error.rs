use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("wrong metric name")]
    WrongName,

    #[error("wrong metric type")]
    WrongType,

    #[error("wrong metric value")]
    WrongValue,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Unexpected response status: {0}")]
    UnexpectedStatus(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Integrity check failed")]
    Integrity,

    #[error("Transport client is not available: {0}")]
    ClientUnavailable(String),

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

impl CollectorError {
    /// Creates a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Creates a new crypto error
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        Self::Crypto(msg.into())
    }

    /// Creates a new scan error
    pub fn scan<S: Into<String>>(msg: S) -> Self {
        Self::Scan(msg.into())
    }

    /// Creates a timeout error from the elapsed budget
    pub fn timeout(budget: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns true for client-caused metric validation failures
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::WrongName | Self::WrongType | Self::WrongValue)
    }

    /// Returns true if a refused TCP connection is anywhere in the error chain.
    ///
    /// This is the only failure the agent treats as transient.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Io(err) => err.kind() == std::io::ErrorKind::ConnectionRefused,
            Self::Http(err) => chain_has_refused(err),
            Self::Grpc(status) => chain_has_refused(status),
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::WrongName | Self::WrongType | Self::WrongValue => "validation",
            Self::Storage(_) | Self::Database(_) | Self::Migration(_) => "storage",
            Self::Config(_) | Self::ClientUnavailable(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Http(_) | Self::Grpc(_) | Self::Network(_) | Self::UnexpectedStatus(_) => {
                "network"
            },
            Self::Protocol(_) => "protocol",
            Self::Scan(_) => "scan",
            Self::Crypto(_) | Self::Integrity => "security",
            Self::Timeout { .. } | Self::Cancelled => "timeout",
            Self::Join(_) => "async",
        }
    }
}

fn chain_has_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = err.source();
    }
    false
}
