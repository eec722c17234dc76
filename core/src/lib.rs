//! Loee Agent Core
//!
//! Shared primitives reused by every Loee binary: a redacted tracing
//! subscriber and the base error type for agent-side failures.

pub mod logging;

pub use logging::*;

/// Core result type used throughout the agent.
pub type Result<T> = anyhow::Result<T>;

/// Base error type for the Loee SSH agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("wire protocol error: {0}")]
    Wire(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("key not found")]
    KeyNotFound,

    #[error("IO operation failed: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}
