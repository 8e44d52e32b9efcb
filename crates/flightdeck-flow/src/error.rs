use std::error::Error as StdError;

use flightdeck_saga::FailureKind;
use thiserror::Error;

/// Error raised while a flow is being put together.
///
/// None of these can happen once a flight is running: every operation,
/// compensation and argument shape is checked at the moment the step is
/// registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FlowError {
    #[error("operation set {operation_set} has no operation '{operation}'")]
    OperationNotFound {
        operation_set: &'static str,
        operation: String,
    },

    #[error("operation '{operation}' is registered twice in {operation_set}")]
    DuplicateOperation {
        operation_set: &'static str,
        operation: String,
    },

    #[error("undo '{undo}' is registered twice in {operation_set}")]
    DuplicateUndo {
        operation_set: &'static str,
        undo: String,
    },

    #[error("operation '{operation}' declares neither an undo nor no_undo")]
    CompensationUndeclared { operation: String },

    #[error("operation '{operation}' declares its compensation more than once")]
    ConflictingCompensation { operation: String },

    #[error("operation '{operation}' is undone by '{undo}', which does not exist")]
    UndoNotFound { operation: String, undo: String },

    #[error(
        "undo '{undo}' takes {registered} but operation '{operation}' takes {called}"
    )]
    UndoSignatureMismatch {
        operation: String,
        undo: String,
        registered: &'static str,
        called: &'static str,
    },

    #[error(
        "operation '{operation}' takes {registered_args} and returns {registered_output}, \
         but was called with {called_args} returning {called_output}"
    )]
    SignatureMismatch {
        operation: String,
        registered_args: &'static str,
        registered_output: &'static str,
        called_args: &'static str,
        called_output: &'static str,
    },

    #[error("operation '{operation}' returns nothing; register it with call_unit")]
    UnitOperation { operation: String },

    #[error("operation '{operation}' returns a value; register it with call")]
    ValueOperation { operation: String },

    #[error(
        "step handle was already used for '{first}' and cannot also call '{second}'"
    )]
    HandleReused { first: String, second: String },

    #[error("output of step {index} belongs to a different flow")]
    ForeignToken { index: usize },

    #[error("output of step {index} does not exist in flow '{flow}'")]
    UnknownToken { flow: String, index: usize },

    #[error("flow '{flow}' has no steps")]
    Empty { flow: String },
}

/// Failure of an operation or its undo, as returned by operation methods.
///
/// Whether the flight retries or compensates is decided by the operation's
/// classifier; [`default_classifier`] honors [`OperationError::is_retryable`].
#[derive(Debug, Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
    retryable: bool,
    code: Option<&'static str>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl OperationError {
    /// A failure that will not go away by trying again.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
            source: None,
        }
    }

    /// A transient failure worth another attempt.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::fatal(message)
        }
    }

    /// Tag the error with a machine-readable code for classifiers to match on.
    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        self.code
    }
}

/// Decides how the flight reacts to an [`OperationError`].
pub type Classifier = fn(&OperationError) -> FailureKind;

/// Retry errors that say they are retryable; everything else is fatal.
#[must_use]
pub fn default_classifier(error: &OperationError) -> FailureKind {
    if error.is_retryable() {
        FailureKind::Retryable
    } else {
        FailureKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("connection reset")]
    struct Io;

    #[test]
    fn default_classifier_follows_retryable_flag() {
        assert_eq!(
            default_classifier(&OperationError::retryable("busy")),
            FailureKind::Retryable
        );
        assert_eq!(
            default_classifier(&OperationError::fatal("bad input")),
            FailureKind::Fatal
        );
    }

    #[test]
    fn operation_error_keeps_code_and_source() {
        let err = OperationError::retryable("bucket create failed")
            .with_code("unavailable")
            .with_source(Io);

        assert_eq!(err.code(), Some("unavailable"));
        assert!(err.is_retryable());
        assert_eq!(
            StdError::source(&err).map(ToString::to_string),
            Some("connection reset".to_string())
        );
    }

    #[test]
    fn handle_reuse_names_both_operations() {
        let err = FlowError::HandleReused {
            first: "create_bucket".to_string(),
            second: "delete_bucket".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("create_bucket"));
        assert!(msg.contains("delete_bucket"));
    }
}
