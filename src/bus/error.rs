// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bus error types.

use std::io;
use thiserror::Error;

/// Errors that can occur talking to the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the bus at all.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    /// Connection dropped mid-operation.
    #[error("Bus connection lost: {0}")]
    ConnectionLost(String),

    /// A command was rejected by the bus.
    #[error("Bus command failed: {0}")]
    CommandFailed(String),

    /// Consumer group does not exist for the stream.
    #[error("No such consumer group {group} on stream {stream}")]
    NoGroup { stream: String, group: String },

    /// Operation timed out.
    #[error("Bus operation timed out")]
    Timeout,

    /// Subscription channel closed.
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    /// Value on the bus could not be decoded.
    #[error("Invalid bus value: {0}")]
    InvalidValue(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BusError {
    /// Create a bus error from an IO error with context.
    pub fn from_io_error(context: &str, err: io::Error) -> Self {
        BusError::ConnectionLost(format!("{}: {}", context, err))
    }

    /// Transient errors are worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::ConnectionLost(_) | Self::Timeout
        )
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            BusError::Timeout
        } else if err.is_connection_refusal() {
            BusError::Unavailable(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() {
            BusError::ConnectionLost(err.to_string())
        } else {
            BusError::CommandFailed(err.to_string())
        }
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        let err = BusError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Bus unavailable: connection refused");

        let err = BusError::NoGroup {
            stream: "centerfire:semantic:names".to_string(),
            group: "weaviate".to_string(),
        };
        assert!(err.to_string().contains("centerfire:semantic:names"));
    }

    #[test]
    fn test_bus_error_retryable() {
        assert!(BusError::Unavailable("down".to_string()).is_retryable());
        assert!(BusError::ConnectionLost("reset".to_string()).is_retryable());
        assert!(BusError::Timeout.is_retryable());
        assert!(!BusError::CommandFailed("WRONGTYPE".to_string()).is_retryable());
        assert!(!BusError::Serialization("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = BusError::from_io_error("reading reply", io_err);
        assert!(err.to_string().contains("reading reply"));
        assert!(err.is_retryable());
    }
}
