//! Error taxonomy shared by every spadesk layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Authentication,
    Validation,
    Database,
    BusinessRule,
    ExternalService,
    Unknown,
}

impl ErrorKind {
    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            ErrorKind::Validation | ErrorKind::BusinessRule => ErrorSeverity::Warning,
            ErrorKind::Network | ErrorKind::ExternalService => ErrorSeverity::Error,
            ErrorKind::Database | ErrorKind::Unknown => ErrorSeverity::Error,
            ErrorKind::Authentication => ErrorSeverity::Critical,
        }
    }

    /// Kinds that are worth retrying without user intervention
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::ExternalService | ErrorKind::Database
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Validation => "validation",
            ErrorKind::Database => "database",
            ErrorKind::BusinessRule => "business rule",
            ErrorKind::ExternalService => "external service",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Error severity levels, used to pick how loudly a failure is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Retry guidance attached to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHint {
    pub retryable: bool,
    /// Suggested delay before the next attempt, if the source provided one
    pub backoff: Option<Duration>,
}

/// The one error type crossing crate boundaries
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub severity: ErrorSeverity,
    pub retry: Option<RetryHint>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            severity: kind.default_severity(),
            retry: kind.is_transient().then_some(RetryHint {
                retryable: true,
                backoff: None,
            }),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, msg)
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, msg)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, msg)
    }

    pub fn business(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessRule, msg)
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalService, msg)
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, msg)
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Attach a server-provided backoff (e.g. `Retry-After`)
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry = Some(RetryHint {
            retryable: true,
            backoff: Some(backoff),
        });
        self
    }

    pub fn not_retryable(mut self) -> Self {
        self.retry = None;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retry.is_some_and(|r| r.retryable)
    }

    pub fn suggested_backoff(&self) -> Option<Duration> {
        self.retry.and_then(|r| r.backoff)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
