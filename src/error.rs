//! Error taxonomy shared by every backend, the resilience layer and the orchestrator

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes that are worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    Timeout,
    RateLimited,
    ServerError(u16),
    Transport,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::ServerError(code) => write!(f, "server error {}", code),
            Self::Transport => write!(f, "transport error"),
        }
    }
}

/// Failure classes that will not get better by retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Malformed,
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad request"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NotFound => write!(f, "not found"),
            Self::Malformed => write!(f, "malformed response"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{dependency}: {kind}: {message}")]
    Transient {
        dependency: String,
        kind: TransientKind,
        message: String,
    },

    #[error("{dependency}: {kind}: {message}")]
    Permanent {
        dependency: String,
        kind: PermanentKind,
        message: String,
    },

    #[error("circuit for {dependency} is open")]
    CircuitOpen { dependency: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn transient(
        dependency: impl Into<String>,
        kind: TransientKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Transient {
            dependency: dependency.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(
        dependency: impl Into<String>,
        kind: PermanentKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Permanent {
            dependency: dependency.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::permanent(dependency, PermanentKind::Malformed, message)
    }

    /// Map an HTTP status code to the taxonomy.
    ///
    /// 408, 429 and 5xx are transient; every other non-success status is permanent.
    pub fn from_status(dependency: impl Into<String>, status: u16, body: &str) -> Self {
        let message = truncate_body(body);
        match status {
            408 => Self::transient(dependency, TransientKind::Timeout, message),
            429 => Self::transient(dependency, TransientKind::RateLimited, message),
            500..=599 => Self::transient(dependency, TransientKind::ServerError(status), message),
            401 | 403 => Self::permanent(dependency, PermanentKind::Unauthorized, message),
            404 => Self::permanent(dependency, PermanentKind::NotFound, message),
            _ => Self::permanent(
                dependency,
                PermanentKind::BadRequest,
                format!("HTTP {}: {}", status, message),
            ),
        }
    }

    /// Classify a reqwest failure
    pub fn from_reqwest(dependency: impl Into<String>, err: &reqwest::Error) -> Self {
        let dependency = dependency.into();
        if err.is_timeout() {
            Self::transient(dependency, TransientKind::Timeout, err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(dependency, status.as_u16(), &err.to_string())
        } else if err.is_decode() {
            Self::malformed(dependency, err.to_string())
        } else if err.is_builder() {
            Self::permanent(dependency, PermanentKind::BadRequest, err.to_string())
        } else {
            Self::transient(dependency, TransientKind::Transport, err.to_string())
        }
    }

    /// Whether the retry policy may try again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(Error::from_status("Index", 503, "").is_transient());
        assert!(Error::from_status("Index", 429, "").is_transient());
        assert!(Error::from_status("Index", 408, "").is_transient());
        assert!(!Error::from_status("Index", 400, "").is_transient());
        assert!(!Error::from_status("Index", 401, "").is_transient());

        match Error::from_status("Index", 404, "missing") {
            Error::Permanent { kind, .. } => assert_eq!(kind, PermanentKind::NotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(1000);
        let err = Error::from_status("Index", 500, &body);
        assert!(err.to_string().len() < 300);
    }

    #[test]
    fn test_cancelled_is_not_transient() {
        assert!(!Error::Cancelled.is_transient());
        assert!(Error::Cancelled.is_cancelled());
    }
}
