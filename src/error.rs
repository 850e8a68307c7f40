// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the mirror sync engine.
//!
//! Every failure is classified into one of a small set of kinds, and the kind
//! decides what happens next:
//!
//! | Kind | Handling |
//! |------|----------|
//! | `TransientIo` | Retried in place with backoff |
//! | `Cancelled` | Unwinds silently |
//! | `Decode`, `ChecksumMismatch`, `InvalidIdentifier` | Row dropped for this tick, counter +1 |
//! | `FatalIo`, `Config` | Reported on the supervisor error channel, pipeline stops |

use thiserror::Error;

/// Result alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("invalid identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("checksum mismatch for {object_type}: cache key {expected}, document id {actual}")]
    ChecksumMismatch {
        object_type: String,
        expected: String,
        actual: String,
    },

    #[error("failed to decode {object_type} {id}: {reason}")]
    Decode {
        object_type: String,
        id: String,
        reason: String,
    },

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("fatal I/O error: {0}")]
    FatalIo(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Worth retrying in place.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Affects a single cache document only; the tick continues without it.
    #[must_use]
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::ChecksumMismatch { .. } | Self::InvalidIdentifier { .. }
        )
    }

    /// Must stop the whole pipeline.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalIo(_) | Self::Config(_))
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::Decode { .. } => "decode",
            Self::TransientIo(_) => "transient_io",
            Self::FatalIo(_) => "fatal_io",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }

    /// Process exit code for an error that terminated the engine.
    ///
    /// Panics are mapped to 2 by the binary, not here.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => 0,
            _ => 1,
        }
    }

    pub(crate) fn decode(object_type: &str, id: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            object_type: object_type.to_string(),
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

// SQLSTATE codes and driver messages that indicate the statement can simply
// be run again: deadlock victims, serialization failures, lock waits.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "57P01", "08006", "08003", "5", "6"];
const TRANSIENT_MESSAGES: &[&str] = &[
    "Deadlock found",
    "Lock wait timeout",
    "database is locked",
    "Connection reset",
    "server has gone away",
];

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed => Self::TransientIo(err.to_string()),
            sqlx::Error::PoolClosed => Self::Cancelled,
            sqlx::Error::Database(db) => {
                let code_transient = db
                    .code()
                    .map(|code| TRANSIENT_SQLSTATES.contains(&&*code))
                    .unwrap_or(false);
                let message = db.message();
                let message_transient = TRANSIENT_MESSAGES.iter().any(|m| message.contains(m));
                if code_transient || message_transient {
                    Self::TransientIo(err.to_string())
                } else {
                    Self::FatalIo(err.to_string())
                }
            }
            _ => Self::FatalIo(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.kind() == redis::ErrorKind::BusyLoadingError
            || err.kind() == redis::ErrorKind::TryAgain
        {
            Self::TransientIo(err.to_string())
        } else {
            Self::FatalIo(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::TransientIo(format!("deadline exceeded: {}", err))
    }
}
