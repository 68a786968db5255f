//! Error types module.
//!
//! This module defines the error types used throughout the dnspolicy engine.
//! It uses `thiserror` for structured error handling and provides
//! a custom `Result` type alias for convenience.
//!
//! Two layers exist: [`ResolutionFailure`] describes a single failed lookup and
//! is always recovered by the caller (counted, or turned into a `Failed` test),
//! while [`Error`] covers everything else a library call can return.

use thiserror::Error;

/// A specialized `Result` type for dnspolicy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the dnspolicy engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, sockets, subprocess spawning)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (settings, test plans, JSON output)
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// DNS resolver construction error
    #[error("DNS resolver error: {0}")]
    Resolver(#[from] trust_dns_resolver::error::ResolveError),

    /// Network-related error (connection failures, proxy protocol errors)
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration error (invalid test plan, missing files)
    #[error("Config error: {0}")]
    Config(String),

    /// Parse error (invalid input format, malformed tool output)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unexpected failure while executing a policy procedure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Operation timeout
    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Create a new network error with a message.
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new configuration error with a message.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new parse error with a message.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a new execution error with a message.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

impl From<color_eyre::Report> for Error {
    fn from(e: color_eyre::Report) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Outcome of a single failed lookup.
///
/// Never escapes the orchestrator: weighted loops count it as a failed
/// iteration, single-shot policies turn it into a `Failed` result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionFailure {
    /// The lookup did not finish within its deadline
    #[error("lookup timed out after {0} ms")]
    Timeout(u64),

    /// The resolver answered but returned no usable address
    #[error("no addresses returned for {0}")]
    NoAnswer(String),

    /// The external lookup tool failed to run or exited unsuccessfully
    #[error("lookup tool failed: {0}")]
    Tool(String),

    /// The resolver library reported an error
    #[error("lookup failed: {0}")]
    Lookup(String),
}

impl ResolutionFailure {
    /// Check if the failure was a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        assert!(matches!(Error::config("x"), Error::Config(m) if m == "x"));
        assert!(matches!(Error::parse("y"), Error::Parse(m) if m == "y"));
        assert_eq!(
            Error::execution("boom").to_string(),
            "Execution error: boom"
        );
    }

    #[test]
    fn test_resolution_failure_display() {
        let failure = ResolutionFailure::Timeout(3000);
        assert!(failure.is_timeout());
        assert_eq!(failure.to_string(), "lookup timed out after 3000 ms");
        assert_eq!(
            ResolutionFailure::NoAnswer("example.com".into()).to_string(),
            "no addresses returned for example.com"
        );
    }
}
