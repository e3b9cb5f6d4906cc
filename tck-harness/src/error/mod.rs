//! Error handling for the TCK harness
//!
//! This module defines [`Failure`], the value that travels from worker
//! threads back to the test-runner thread, and the smaller error enums
//! returned by configuration, pools and tasks.

use core::fmt;
use std::any::Any;
use std::panic::Location;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the harness
pub type Result<T, E = Failure> = core::result::Result<T, E>;

/// Classification of a test failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureKind {
    /// An assertion made by test logic did not hold
    Assertion,
    /// A panic or error nobody expected
    Unexpected,
    /// A bounded wait elapsed
    Timeout,
    /// A thread was interrupted where no interrupt was expected
    Interrupted,
    /// A worker thread outlived the test case that started it
    Leak,
    /// A teardown check failed
    Teardown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Assertion => "assertion failure",
            FailureKind::Unexpected => "unexpected failure",
            FailureKind::Timeout => "timeout",
            FailureKind::Interrupted => "unexpected interrupt",
            FailureKind::Leak => "leaked thread",
            FailureKind::Teardown => "teardown failure",
        };
        f.write_str(name)
    }
}

/// A failure raised on some thread during a test case
///
/// Failures carry the caller location captured through `#[track_caller]`
/// and the name of the thread that raised them, so a failure surfaced at
/// teardown still points at the worker code that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    kind: FailureKind,
    message: String,
    location: Option<String>,
    thread: Option<String>,
    cause: Option<Box<Failure>>,
}

impl Failure {
    /// Create a failure located at the caller
    #[track_caller]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: Some(Location::caller().to_string()),
            thread: current_thread_name(),
            cause: None,
        }
    }

    /// Create an assertion failure
    #[track_caller]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }

    /// Create an unexpected failure
    #[track_caller]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unexpected, message)
    }

    /// Create a timeout failure
    #[track_caller]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Create an unexpected-interrupt failure
    #[track_caller]
    pub fn interrupted(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Interrupted, message)
    }

    /// Attach the failure that led to this one
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Convert a caught panic payload into a failure
    ///
    /// A payload that already is a [`Failure`] (rethrown by one of the
    /// `thread_assert_*` helpers) is returned unchanged. String payloads
    /// produced by `assert!`-family macros are classified as assertions.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Failure>() {
            Ok(failure) => return *failure,
            Err(other) => other,
        };
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panicked with a non-string payload".to_string()
        };
        let kind = if message.starts_with("assertion") {
            FailureKind::Assertion
        } else {
            FailureKind::Unexpected
        };
        Self {
            kind,
            message,
            location: None,
            thread: current_thread_name(),
            cause: None,
        }
    }

    /// Rethrow this failure as a panic on the current thread
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source location as `file:line:col`, when known
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Name of the thread that raised the failure, when it had one
    pub fn thread(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        if let Some(thread) = &self.thread {
            write!(f, " [thread '{}']", thread)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "\ncaused by: {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

fn current_thread_name() -> Option<String> {
    thread::current().name().map(str::to_string)
}

/// Returned by interruptible waits when the waiting thread was interrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread interrupted")]
pub struct Interrupted;

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The environment refused the operation
    ///
    /// This reflects a privilege restriction of the host, not a defect in
    /// the code under test, and pool cleanup swallows it.
    #[error("operation denied by the environment: {0}")]
    Denied(String),
    /// The pool no longer accepts work
    #[error("task rejected: {0}")]
    Rejected(String),
    /// The caller was interrupted while waiting on the pool
    #[error("interrupted while waiting on pool")]
    Interrupted,
}

impl From<Interrupted> for PoolError {
    fn from(_: Interrupted) -> Self {
        PoolError::Interrupted
    }
}

/// Errors from waiting on a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("timed out waiting for task result")]
    Timeout,
    #[error("task was cancelled")]
    Cancelled,
    #[error("task result was already taken")]
    AlreadyTaken,
    #[error("task panicked: {0}")]
    Panicked(Failure),
    #[error("interrupted while waiting for task")]
    Interrupted,
}

impl From<Interrupted> for TaskError {
    fn from(_: Interrupted) -> Self {
        TaskError::Interrupted
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bad float value in {name}={value}")]
    InvalidFloat { name: String, value: String },
    #[error("bad integer value in {name}={value}")]
    InvalidInteger { name: String, value: String },
    #[error("delay factor must be finite and positive, got {0}")]
    InvalidDelayFactor(f32),
    #[error("bad method filter {pattern:?}: {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_records_caller_location() {
        let failure = Failure::assertion("boom");
        assert_eq!(failure.kind(), FailureKind::Assertion);
        assert!(failure.location().unwrap().contains("error/mod.rs"));
    }

    #[test]
    fn test_from_panic_keeps_rethrown_failure() {
        let original = Failure::timeout("too slow");
        let payload: Box<dyn Any + Send> = Box::new(original.clone());
        assert_eq!(Failure::from_panic(payload), original);
    }

    #[test]
    fn test_from_panic_classifies_assert_messages() {
        let payload: Box<dyn Any + Send> =
            Box::new(String::from("assertion `left == right` failed\n  left: 1\n right: 2"));
        let failure = Failure::from_panic(payload);
        assert_eq!(failure.kind(), FailureKind::Assertion);
        assert!(failure.location().is_none());

        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(Failure::from_panic(payload).kind(), FailureKind::Unexpected);

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(
            Failure::from_panic(payload).message(),
            "panicked with a non-string payload"
        );
    }

    #[test]
    fn test_display_includes_cause() {
        let failure = Failure::unexpected("outer").with_cause(Failure::interrupted("inner"));
        let text = failure.to_string();
        assert!(text.starts_with("unexpected failure: outer"));
        assert!(text.contains("caused by: unexpected interrupt: inner"));
        assert!(std::error::Error::source(&failure).is_some());
    }
}
