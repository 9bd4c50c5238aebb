//! Error types for the runtime core.
//!
//! User-catchable failures are [`RuntimeError`] values carried through
//! `Result` or accumulated in an [`ErrorSink`] while slots unwind. Contract
//! violations (LIFO misuse, `find()` misses) are debug assertions instead and
//! never show up here.
//!
//! # Structured Error Categories
//!
//! `RuntimeErrorKind` is the machine-matchable category. Factory functions
//! (e.g. [`object_already_deleted`]) are the public constructors; they fill in
//! both `kind` and `message`.

use std::fmt;

use crate::call_stack::CallRecord;

/// Result of a runtime operation.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Typed error category.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeErrorKind {
    /// Access to an object that is being or has been destroyed.
    #[error("object already deleted: cannot access {member} of class {class}")]
    ObjectAlreadyDeleted { class: String, member: String },

    /// `delete` re-entered while the destructor is still running.
    #[error("double delete: object of class {class} is already being destroyed")]
    DoubleDelete { class: String },

    /// Two classes registered native state under the same key on one object.
    #[error("duplicate private data: class {class} already attached native state to this object")]
    DuplicatePrivateData { class: String },

    /// A private member touched from code outside its class.
    #[error("private member access: {member} of class {class} is not accessible here")]
    PrivateMemberAccess { class: String, member: String },

    /// A plain closure invoked after its program edge was broken.
    #[error("program unavailable: closure {closure} outlived its program")]
    ProgramUnavailable { closure: String },

    /// Call chain deeper than the configured limit.
    #[error("maximum call depth exceeded (limit: {depth})")]
    StackOverflow { depth: usize },

    /// Errors raised by hosts and built-in classes.
    #[error("{message}")]
    Custom { message: String },
}

/// Runtime error.
#[derive(Clone, Debug)]
pub struct RuntimeError {
    /// Structured category.
    pub kind: RuntimeErrorKind,
    /// Human-readable message; equals `kind.to_string()` for factory errors.
    pub message: String,
    /// Call chain of the raising thread, most recent call first.
    pub backtrace: Option<Vec<CallRecord>>,
}

impl RuntimeError {
    /// Create an error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: RuntimeErrorKind::Custom {
                message: message.clone(),
            },
            message,
            backtrace: None,
        }
    }

    fn from_kind(kind: RuntimeErrorKind) -> Self {
        let message = kind.to_string();
        Self {
            kind,
            message,
            backtrace: None,
        }
    }

    /// Attach a backtrace to this error.
    #[must_use]
    pub fn with_backtrace(mut self, backtrace: Vec<CallRecord>) -> Self {
        self.backtrace = Some(backtrace);
        self
    }

    /// Whether this is an access to a deleted object.
    #[inline]
    pub fn is_object_deleted(&self) -> bool {
        matches!(self.kind, RuntimeErrorKind::ObjectAlreadyDeleted { .. })
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(frames) = &self.backtrace {
            for (i, frame) in frames.iter().enumerate() {
                write!(f, "\n  {i}: {} at {}:{}", frame.function, frame.file, frame.line)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

// Object errors

/// Access to an object that is no longer Live.
#[cold]
pub fn object_already_deleted(class: &str, member: &str) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::ObjectAlreadyDeleted {
        class: class.to_string(),
        member: member.to_string(),
    })
}

/// Destructor re-entrancy.
#[cold]
pub fn double_delete(class: &str) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::DoubleDelete {
        class: class.to_string(),
    })
}

/// Private-data key registered twice on one object.
#[cold]
pub fn duplicate_private_data(class: &str) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::DuplicatePrivateData {
        class: class.to_string(),
    })
}

/// Private member touched from outside its class.
#[cold]
pub fn private_member_access(class: &str, member: &str) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::PrivateMemberAccess {
        class: class.to_string(),
        member: member.to_string(),
    })
}

// Call errors

/// Plain closure called after program teardown.
#[cold]
pub fn program_unavailable(closure: &str) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::ProgramUnavailable {
        closure: closure.to_string(),
    })
}

/// Call depth limit exceeded.
#[cold]
pub fn call_depth_exceeded(limit: usize) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::StackOverflow { depth: limit })
}

/// Accumulator for errors raised where no caller can receive a `Result`.
///
/// Slot unwinding and value release happen on every exit path, including
/// paths that are already carrying an error. Failures raised there (a
/// destructor throwing while its last reference is popped) are pushed here
/// and surface after the unwinding has finished.
#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Vec<RuntimeError>,
}

impl ErrorSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn raise(&mut self, err: RuntimeError) {
        tracing::debug!(error = %err.message, "error raised into sink");
        self.errors.push(err);
    }

    /// Record the error of a failed result, passing successes through.
    pub fn absorb<T>(&mut self, result: RuntimeResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.raise(err);
                None
            }
        }
    }

    /// Whether no error has been raised.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of accumulated errors.
    #[inline]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The errors raised so far, oldest first.
    pub fn errors(&self) -> &[RuntimeError] {
        &self.errors
    }

    /// Drain every accumulated error.
    pub fn take(&mut self) -> Vec<RuntimeError> {
        std::mem::take(&mut self.errors)
    }

    /// Turn the first accumulated error into an `Err`, discarding the rest.
    pub fn into_result(mut self) -> RuntimeResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors.swap_remove(0))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests can panic")]
mod tests;
