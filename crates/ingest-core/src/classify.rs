use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InsertError, InsertErrorKind};

/// Coarse failure category used to steer retry and backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    ServerSelectionTimeout,
    Timeout,
    Network,
    ReplicaSet,
    OperationCancelled,
    ConnectionPool,
    Auth,
    DataConstraint,
    Connection,
    Server,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ServerSelectionTimeout => "SERVER_SELECTION_TIMEOUT",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::ReplicaSet => "REPLICA_SET",
            ErrorCategory::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCategory::ConnectionPool => "CONNECTION_POOL",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::DataConstraint => "DATA_CONSTRAINT",
            ErrorCategory::Connection => "CONNECTION",
            ErrorCategory::Server => "SERVER",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub retriable: bool,
    pub network_like: bool,
}

impl Classification {
    pub fn is_server_selection_timeout(&self) -> bool {
        self.category == ErrorCategory::ServerSelectionTimeout
    }
}

const TIMEOUT_PHRASES: &[&str] = &["timeout", "timed out"];
const NETWORK_PHRASES: &[&str] = &["network", "connection"];
const NOT_PRIMARY_PHRASES: &[&str] = &["not primary", "not master", "primary stepped down"];
const CANCELLED_PHRASES: &[&str] = &["cancelled", "canceled"];
const POOL_PHRASES: &[&str] = &["pool"];
const AUTH_PHRASES: &[&str] = &["authentication", "auth"];
const CONSTRAINT_PHRASES: &[&str] = &["duplicate", "unique"];

const RETRIABLE_EXTRA_PHRASES: &[&str] = &["server returned", "heartbeat"];
const NETWORK_LIKE_PHRASES: &[&str] = &["network", "connection", "heartbeat", "disconnected"];

/// Message- and kind-based failure classification. Pure; performs no I/O.
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(error: &InsertError) -> Classification {
        let message = error.message.to_lowercase();
        Classification {
            category: Self::category(&message, error.kind),
            retriable: Self::is_retriable(&message, error.kind),
            network_like: Self::is_network_like(&message, error.kind),
        }
    }

    fn category(message: &str, kind: InsertErrorKind) -> ErrorCategory {
        if contains_any(message, TIMEOUT_PHRASES) {
            if message.contains("selecting a server") {
                return ErrorCategory::ServerSelectionTimeout;
            }
            return ErrorCategory::Timeout;
        }
        if contains_any(message, NETWORK_PHRASES) {
            return ErrorCategory::Network;
        }
        if contains_any(message, NOT_PRIMARY_PHRASES) {
            return ErrorCategory::ReplicaSet;
        }
        if contains_any(message, CANCELLED_PHRASES) {
            return ErrorCategory::OperationCancelled;
        }
        if contains_any(message, POOL_PHRASES) {
            return ErrorCategory::ConnectionPool;
        }
        if contains_any(message, AUTH_PHRASES) {
            return ErrorCategory::Auth;
        }
        if contains_any(message, CONSTRAINT_PHRASES) {
            return ErrorCategory::DataConstraint;
        }

        match kind {
            InsertErrorKind::Timeout => ErrorCategory::Timeout,
            InsertErrorKind::Connectivity => ErrorCategory::Connection,
            InsertErrorKind::Server => ErrorCategory::Server,
            InsertErrorKind::ConstraintViolation => ErrorCategory::DataConstraint,
            InsertErrorKind::Unknown => ErrorCategory::Unknown,
        }
    }

    fn is_retriable(message: &str, kind: InsertErrorKind) -> bool {
        contains_any(message, TIMEOUT_PHRASES)
            || contains_any(message, NETWORK_PHRASES)
            || contains_any(message, NOT_PRIMARY_PHRASES)
            || contains_any(message, POOL_PHRASES)
            || contains_any(message, RETRIABLE_EXTRA_PHRASES)
            || matches!(
                kind,
                InsertErrorKind::Timeout | InsertErrorKind::Connectivity
            )
    }

    fn is_network_like(message: &str, kind: InsertErrorKind) -> bool {
        contains_any(message, NETWORK_LIKE_PHRASES) || kind == InsertErrorKind::Connectivity
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(kind: InsertErrorKind, message: &str) -> Classification {
        ErrorClassifier::classify(&InsertError::new(kind, message))
    }

    #[test]
    fn test_timeout_categories() {
        let c = classify(
            InsertErrorKind::Timeout,
            "A timeout occurred after 30000ms selecting a server",
        );
        assert_eq!(c.category, ErrorCategory::ServerSelectionTimeout);
        assert!(c.retriable);
        assert!(!c.network_like);

        let c = classify(InsertErrorKind::Unknown, "Operation TIMED OUT");
        assert_eq!(c.category, ErrorCategory::Timeout);
        assert!(c.retriable);
    }

    #[test]
    fn test_priority_order() {
        // Timeout wins over network when both phrases appear.
        let c = classify(InsertErrorKind::Unknown, "connection timed out");
        assert_eq!(c.category, ErrorCategory::Timeout);
        assert!(c.network_like);

        // "connection pool" hits the network phrase before the pool phrase.
        let c = classify(InsertErrorKind::Unknown, "connection pool exhausted");
        assert_eq!(c.category, ErrorCategory::Network);

        let c = classify(InsertErrorKind::Unknown, "wait queue for pool is full");
        assert_eq!(c.category, ErrorCategory::ConnectionPool);
        assert!(c.retriable);
        assert!(!c.network_like);
    }

    #[test]
    fn test_replica_and_cancel() {
        let c = classify(InsertErrorKind::Server, "NotWritablePrimary: not primary");
        assert_eq!(c.category, ErrorCategory::ReplicaSet);
        assert!(c.retriable);

        let c = classify(InsertErrorKind::Unknown, "The operation was canceled");
        assert_eq!(c.category, ErrorCategory::OperationCancelled);
        assert!(!c.retriable);
    }

    #[test]
    fn test_permanent_categories() {
        let c = classify(InsertErrorKind::Server, "Authentication failed");
        assert_eq!(c.category, ErrorCategory::Auth);
        assert!(!c.retriable);

        let c = classify(
            InsertErrorKind::ConstraintViolation,
            "E11000 duplicate key error collection: medical.patients",
        );
        assert_eq!(c.category, ErrorCategory::DataConstraint);
        assert!(!c.retriable);
    }

    #[test]
    fn test_kind_fallback() {
        let c = classify(InsertErrorKind::Connectivity, "socket closed");
        assert_eq!(c.category, ErrorCategory::Connection);
        assert!(c.retriable);
        assert!(c.network_like);

        let c = classify(InsertErrorKind::Server, "internal error");
        assert_eq!(c.category, ErrorCategory::Server);
        assert!(!c.retriable);

        let c = classify(InsertErrorKind::Server, "server returned 503");
        assert_eq!(c.category, ErrorCategory::Server);
        assert!(c.retriable);

        let c = classify(InsertErrorKind::Unknown, "something odd");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(!c.retriable);
        assert!(!c.network_like);
    }

    #[test]
    fn test_heartbeat_is_network_like() {
        let c = classify(InsertErrorKind::Unknown, "heartbeat failed, node disconnected");
        assert!(c.retriable);
        assert!(c.network_like);
        assert_eq!(c.category, ErrorCategory::Unknown);
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::DataConstraint.to_string(), "DATA_CONSTRAINT");
        assert_eq!(
            serde_json::to_string(&ErrorCategory::ServerSelectionTimeout).unwrap(),
            "\"SERVER_SELECTION_TIMEOUT\""
        );
    }
}
