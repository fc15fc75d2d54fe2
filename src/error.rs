//! Error types for sfauth

use std::time::Duration;
use thiserror::Error;

/// Result type alias for sfauth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while connecting or listing environments
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to start callback listener on {addr}: {source}")]
    ListenerBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid callback: {0}")]
    CallbackProtocol(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("No callback received within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Interrupted before the callback arrived")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code for this error.
    ///
    /// Missing configuration exits with 1, every handshake failure with 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            _ => 2,
        }
    }
}
