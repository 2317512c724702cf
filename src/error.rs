use thiserror::Error;

use crate::domain::Chain;

/// Main error type for the flow pipeline
#[derive(Error, Debug)]
pub enum FlowError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    // Chain backend errors
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for FlowError
pub type Result<T> = std::result::Result<T, FlowError>;

/// What went wrong while talking to a chain backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Connection, TLS or timeout failure
    Transport(String),
    /// Non-2xx HTTP status
    Status { status: u16, body: String },
    /// Body was not the JSON shape we expected
    Decode(String),
    /// JSON-RPC `error` member was set
    Rpc(String),
    /// Backend answered with `null` for something that must exist
    Missing(String),
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {}", msg),
            Self::Status { status, body } => write!(f, "http {}: {}", status, body),
            Self::Decode(msg) => write!(f, "decode: {}", msg),
            Self::Rpc(msg) => write!(f, "rpc: {}", msg),
            Self::Missing(what) => write!(f, "missing: {}", what),
        }
    }
}

/// Failure of a single chain adapter call. Never retried by the adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{chain} adapter call {method} failed: {kind}")]
pub struct AdapterError {
    pub chain: Chain,
    pub method: String,
    pub kind: AdapterErrorKind,
}

impl AdapterError {
    pub fn new(chain: Chain, method: impl Into<String>, kind: AdapterErrorKind) -> Self {
        Self {
            chain,
            method: method.into(),
            kind,
        }
    }

    pub fn transport(chain: Chain, method: &str, err: impl std::fmt::Display) -> Self {
        Self::new(chain, method, AdapterErrorKind::Transport(err.to_string()))
    }

    pub fn decode(chain: Chain, method: &str, err: impl std::fmt::Display) -> Self {
        Self::new(chain, method, AdapterErrorKind::Decode(err.to_string()))
    }

    pub fn missing(chain: Chain, method: &str, what: impl Into<String>) -> Self {
        Self::new(chain, method, AdapterErrorKind::Missing(what.into()))
    }
}
