//! Error types for quickstream
//!
//! One flat error enum covers every failure class the runtime reports.
//! Recoverable errors are additionally captured into a thread-local
//! buffer so callers that only see an error code can still retrieve the
//! message afterwards.

use std::cell::RefCell;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("module load failed: {0}")]
    Load(String),

    #[error("name \"{0}\" is already taken")]
    NameClash(String),

    #[error("stream has no source filters")]
    NoSources,

    #[error("stream has loops in it; consider allow_loops()")]
    HasLoops,

    #[error("bad input port numbering: {0}")]
    BadPortNumbering(String),

    #[error("filter \"{filter}\" start() returned {code}")]
    StartFailure { filter: String, code: i32 },

    #[error("flow contract violation: {0}")]
    ContractViolation(String),

    #[error("parameter error: {0}")]
    Parameter(String),

    #[error("parameter type mismatch: {0}")]
    TypeMismatch(String),

    #[error("bad parameter regex: {0}")]
    BadRegex(String),

    #[error("\"{0}\" already exists")]
    AlreadyExists(String),

    #[error("API called from the wrong phase: {0}")]
    LifecycleMisuse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type that uses [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

impl Error {
    /// Record this error into the calling thread's retrievable buffer
    /// and hand it back, so error returns can be written as
    /// `Err(e.record())`.
    pub(crate) fn record(self) -> Self {
        LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(self.to_string()));
        self
    }
}

/// The last recoverable error recorded on this thread, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Clear the calling thread's error buffer.
pub fn clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_retrieve() {
        clear_error();
        assert_eq!(last_error(), None);

        let e = Error::NoSources.record();
        assert!(matches!(e, Error::NoSources));
        assert_eq!(last_error().as_deref(), Some("stream has no source filters"));

        clear_error();
        assert_eq!(last_error(), None);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}
