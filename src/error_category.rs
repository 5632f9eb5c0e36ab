//! Shared error taxonomy for pre-warm requests and task/pool failures.
//!
//! Categorizes both HTTP-status/reqwest-error outcomes and pool- and
//! task-level failures that never come from an HTTP response at all.

use std::fmt;

/// Categories of failure a [`crate::results::RequestResult`] or
/// [`crate::results::TaskResult`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Network,
    RateLimited,
    Forbidden,
    NotFound,
    ClientError,
    ServerError,
    QueueFull,
    TaskTimeout,
    TaskPanicked,
    Shutdown,
    Other,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns `None` for success/redirect statuses (< 400).
    pub fn from_status_code(status: u16) -> Option<Self> {
        match status {
            0..=399 => None,
            404 => Some(ErrorCategory::NotFound),
            403 => Some(ErrorCategory::Forbidden),
            429 => Some(ErrorCategory::RateLimited),
            500..=599 => Some(ErrorCategory::ServerError),
            400..=499 => Some(ErrorCategory::ClientError),
            _ => Some(ErrorCategory::Other),
        }
    }

    /// Categorize a transport-level error message: substring "timeout"
    /// → Timeout; "connection"/"network" → Network; else Other.
    pub fn from_transport_error(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ErrorCategory::Timeout
        } else if lower.contains("connection") || lower.contains("network") {
            ErrorCategory::Network
        } else {
            ErrorCategory::Other
        }
    }

    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::Timeout
        } else if error.is_connect() {
            ErrorCategory::Network
        } else {
            Self::from_transport_error(&error.to_string())
        }
    }

    /// Whether this category is one of the "problematic" categories the
    /// error analyzer uses to build the load-test skip-list:
    /// `{timeout, server_error, rate_limited}`.
    pub fn is_problematic(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout | ErrorCategory::ServerError | ErrorCategory::RateLimited
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Forbidden => "forbidden",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::QueueFull => "queue_full",
            ErrorCategory::TaskTimeout => "task_timeout",
            ErrorCategory::TaskPanicked => "task_panicked",
            ErrorCategory::Shutdown => "shutdown",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
