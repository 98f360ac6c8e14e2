//! Failure classification for the retry executor
//!
//! This is the only place that looks inside driver errors. Everything
//! else asks the classifier whether a failure is worth another attempt.
//!
//! ## Code table
//!
//! Database errors carry a code string reported by the driver:
//!
//! - SQLite reports numeric (extended) result codes; the primary code is
//!   the low byte, e.g. `2067` (unique constraint) has primary code `19`
//! - Server engines report five-character SQLSTATE codes, e.g. `40001`
//!
//! Five-character codes go to the SQLSTATE table, shorter numeric codes to
//! the SQLite table. Unknown codes are never retried.

use std::io::ErrorKind;

use super::error::StorageError;

/// Whether a failed operation may succeed if attempted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying won't help, surface the error right away
    NonRetriable,

    /// Transient failure, eligible for another attempt
    Retriable,
}

/// Decides whether a failure is transient
///
/// Implemented by [`ErrorClassifier`] and by plain closures, so callers can
/// plug in a policy of their own (connection setup retries everything).
pub trait Classify: Send + Sync {
    fn classify(&self, err: &StorageError) -> ErrorClass;
}

impl<F> Classify for F
where
    F: Fn(&StorageError) -> ErrorClass + Send + Sync,
{
    fn classify(&self, err: &StorageError) -> ErrorClass {
        self(err)
    }
}

/// SQLite primary result codes with the highest extended code defined for each
///
/// Extended codes carry the primary code in the low byte and an index in
/// the bits above it, e.g. `2067` is `19 | 8 << 8`.
const SQLITE_CODES: &[(i32, i32, ErrorClass)] = &[
    // SQLITE_ERROR: syntax errors, missing tables and columns
    (1, 3, ErrorClass::NonRetriable),
    // SQLITE_BUSY / SQLITE_LOCKED: another connection holds the lock
    (5, 3, ErrorClass::Retriable),
    (6, 2, ErrorClass::Retriable),
    // SQLITE_IOERR / SQLITE_CANTOPEN / SQLITE_PROTOCOL: lost the database file
    (10, 33, ErrorClass::Retriable),
    (14, 6, ErrorClass::Retriable),
    (15, 0, ErrorClass::Retriable),
    // SQLITE_TOOBIG / SQLITE_MISMATCH / SQLITE_RANGE: bad data
    (18, 0, ErrorClass::NonRetriable),
    (20, 0, ErrorClass::NonRetriable),
    (25, 0, ErrorClass::NonRetriable),
    // SQLITE_CONSTRAINT and all of its extended codes
    (19, 12, ErrorClass::NonRetriable),
];

/// SQLSTATE codes, exact matches first, then two-character classes
const SQLSTATE_CODES: &[(&str, ErrorClass)] = &[
    // Class 08: connection exceptions
    ("08000", ErrorClass::Retriable),
    ("08003", ErrorClass::Retriable),
    ("08006", ErrorClass::Retriable),
    // Class 40: transaction rollback, serialization failure, deadlock
    ("40000", ErrorClass::Retriable),
    ("40001", ErrorClass::Retriable),
    ("40P01", ErrorClass::Retriable),
    // Class 57: cannot connect now
    ("57P03", ErrorClass::Retriable),
    // Class 22: data exceptions
    ("22", ErrorClass::NonRetriable),
    // Class 23: integrity constraint violations (not-null, foreign key, unique, check)
    ("23", ErrorClass::NonRetriable),
    // Class 42: syntax errors and undefined objects
    ("42", ErrorClass::NonRetriable),
];

fn classify_sqlstate(code: &str) -> ErrorClass {
    SQLSTATE_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .or_else(|| {
            SQLSTATE_CODES
                .iter()
                .find(|(known, _)| known.len() == 2 && code.starts_with(known))
        })
        .map(|(_, class)| *class)
        .unwrap_or(ErrorClass::NonRetriable)
}

fn classify_sqlite(code: i32) -> ErrorClass {
    if code <= 0 {
        return ErrorClass::NonRetriable;
    }

    let (primary, extended) = (code & 0xff, code >> 8);
    SQLITE_CODES
        .iter()
        .find(|(known, max_extended, _)| *known == primary && extended <= *max_extended)
        .map(|(_, _, class)| *class)
        .unwrap_or(ErrorClass::NonRetriable)
}

/// Classify a code reported by a database driver
///
/// Five-character codes are SQLSTATE, even when all digits. Shorter
/// numeric codes are SQLite result codes.
pub fn classify_code(code: &str) -> ErrorClass {
    if code.len() == 5 {
        return classify_sqlstate(code);
    }

    code.parse::<i32>()
        .map(classify_sqlite)
        .unwrap_or(ErrorClass::NonRetriable)
}

fn classify_io(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::UnexpectedEof
        | ErrorKind::Interrupted => ErrorClass::Retriable,
        _ => ErrorClass::NonRetriable,
    }
}

#[cfg(feature = "storage-sqlite")]
fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| classify_code(&code))
            .unwrap_or(ErrorClass::NonRetriable),
        sqlx::Error::Io(io_err) => classify_io(io_err.kind()),
        sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => ErrorClass::Retriable,
        _ => ErrorClass::NonRetriable,
    }
}

/// Default classifier for database-backed operations
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Classify for ErrorClassifier {
    fn classify(&self, err: &StorageError) -> ErrorClass {
        match err {
            #[cfg(feature = "storage-sqlite")]
            StorageError::Database { source, .. } => classify_sqlx(source),
            StorageError::Timeout { .. } => ErrorClass::Retriable,
            StorageError::Io { source, .. } => classify_io(source.kind()),
            _ => ErrorClass::NonRetriable,
        }
    }
}

/// Classifier for writes that are not idempotent
///
/// A write that missed its deadline may still commit in the engine, so a
/// timeout is never attempted again; the caller learns the outcome is
/// unknown. Everything else is classified like [`ErrorClassifier`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteClassifier;

impl Classify for WriteClassifier {
    fn classify(&self, err: &StorageError) -> ErrorClass {
        match err {
            StorageError::Timeout { .. } => ErrorClass::NonRetriable,
            _ => ErrorClassifier.classify(err),
        }
    }
}
