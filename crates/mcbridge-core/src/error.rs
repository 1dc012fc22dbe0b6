use thiserror::Error;

/// Errors produced by the mcbridge core, transport and registry layers.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("permission node not found: {0}")]
    PermNotFound(String),

    #[error("permission denied at {path}: {reason}")]
    PermissionDenied {
        path: String,
        explicit: bool,
        reason: String,
    },

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("endpoint already registered: {0}")]
    DuplicateEndpoint(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Codec(e.to_string())
    }
}

impl BridgeError {
    /// Whether this error is a negative authorization result rather than a fault.
    pub fn is_denial(&self) -> bool {
        matches!(self, BridgeError::PermissionDenied { .. })
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
