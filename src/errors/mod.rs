//! # Error Handling
//!
//! Custom error types for the planekit control plane using `thiserror`.
//! The variants mirror the failure taxonomy of the snapshot engine: payload
//! decoding, endpoint selection, and server lifecycle each have their own
//! hard-error class, while soft conditions (unknown discovery type, empty
//! endpoint sets) are logged and defaulted rather than surfaced here.

/// Custom result type for planekit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the planekit control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A typed payload body was not valid JSON, lacked its `@type` tag, or a
    /// recognized shape was missing a required field. Aborts the enclosing
    /// snapshot build.
    #[error("malformed typed payload: {0}")]
    MalformedPayload(String),

    /// An endpoint selector failed syntactic validation. Aborts the cluster
    /// build; treating it as "no endpoints" would silently blackhole traffic.
    #[error("invalid endpoint selector: {0}")]
    InvalidSelector(String),

    /// A duration string (health check timeout/interval, connect timeout) was
    /// present but unparsable.
    #[error("invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    /// The discovery server could not bind its listening socket.
    #[error("failed to bind discovery server: {0}")]
    Bind(String),

    /// Installing a snapshot into a server cache failed for at least one
    /// consumer identity.
    #[error("failed to publish snapshot: {0}")]
    Publish(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network transport errors (gRPC serving)
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new malformed-payload error
    pub fn malformed_payload<S: Into<String>>(message: S) -> Self {
        Self::MalformedPayload(message.into())
    }

    /// Create a new invalid-selector error
    pub fn invalid_selector<S: Into<String>>(message: S) -> Self {
        Self::InvalidSelector(message.into())
    }

    /// Create a new invalid-duration error
    pub fn invalid_duration<S: Into<String>, R: Into<String>>(value: S, reason: R) -> Self {
        Self::InvalidDuration { value: value.into(), reason: reason.into() }
    }

    /// Create a new bind error
    pub fn bind<S: Into<String>>(message: S) -> Self {
        Self::Bind(message.into())
    }

    /// Create a new publish error
    pub fn publish<S: Into<String>>(message: S) -> Self {
        Self::Publish(message.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}
