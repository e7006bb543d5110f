use std::fmt::Display;

use serde::Serialize;

/// Every engine error falls into exactly one of these classes. The class decides how callers react: validation and
/// insufficient-funds errors are final, provider errors are surfaced after local compensation, conflicts are retried,
/// and fatal errors indicate a broken invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    InsufficientFunds,
    ExternalProvider,
    ConcurrencyConflict,
    Fatal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::InsufficientFunds => "insufficient_funds",
            Self::ExternalProvider => "external_provider",
            Self::ConcurrencyConflict => "concurrency_conflict",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

pub trait ClassifiedError {
    fn kind(&self) -> ErrorKind;

    fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

/// SQLite reports lock contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6), possibly as an extended code whose low
/// byte is the primary code.
pub(crate) fn is_lock_contention(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}
