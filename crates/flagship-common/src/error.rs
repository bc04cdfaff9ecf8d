//! Error types for flagship
//!
//! The taxonomy mirrors how callers react to a failure:
//! - [`Error::Validation`]: bad input, never retried, carries field-level detail
//! - [`Error::NotFound`]: lookup miss, rendered as "not found" rather than a failure
//! - [`Error::Provisioning`]: an external call failed during a named sub-step
//! - [`Error::Aggregate`]: every failure of a multi-step operation, reported together
//!
//! The remaining variants are transport failures that end up wrapped in
//! [`Error::Provisioning`] by the provisioners.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for flagship operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// HTTP transport error talking to a REST control plane
    #[error("http error: {source}")]
    Http {
        /// The underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// A REST control plane answered with a non-success status
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// User-supplied configuration failed validation
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The requested resource does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "Unleash", "database")
        kind: String,
        /// Resource name
        name: String,
    },

    /// A provisioning sub-step failed.
    ///
    /// Displays only the reason tag; the cause is available through
    /// [`std::error::Error::source`] for logging.
    #[error("{reason}")]
    Provisioning {
        /// Which sub-step failed (e.g. "failed to create database")
        reason: String,
        /// The underlying failure
        source: Box<Error>,
    },

    /// Every failure of a multi-step operation
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "deadline", "registry")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for a resource kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Wrap an underlying failure with the sub-step that produced it
    pub fn provisioning(reason: impl Into<String>, source: Error) -> Self {
        Self::Provisioning {
            reason: reason.into(),
            source: Box::new(source),
        }
    }

    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error means the target resource does not exist.
    ///
    /// Looks through provisioning wrappers. An aggregate counts as not found
    /// only when it is non-empty and every member is not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::Api { status, .. } => *status == 404,
            Error::Provisioning { source, .. } => source.is_not_found(),
            Error::Aggregate(agg) => !agg.is_empty() && agg.iter().all(Error::is_not_found),
            _ => false,
        }
    }

    /// The sub-step reason tag, if this is a provisioning failure
    pub fn reason(&self) -> Option<&str> {
        match self {
            Error::Provisioning { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Validation details, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// One rejected field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Field name as the user sees it (e.g. "name", "dbPoolMax")
    pub field: String,
    /// Which rule failed
    pub message: String,
}

/// All field errors found in one validation pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty set of validation errors
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rejected field
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// True when no field was rejected
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The rejected fields, in the order they were checked
    pub fn fields(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether the given field was rejected
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when empty, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error: ")?;
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

// =============================================================================
// Aggregation
// =============================================================================

/// Failures collected from independent steps of one operation.
///
/// An empty aggregate means every step succeeded.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// Create an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one step, keeping the error if it failed
    pub fn record<T>(&mut self, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    /// Record a failure
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Move every failure of `other` to the end of this aggregate
    pub fn append(&mut self, other: AggregateError) {
        self.errors.extend(other.errors);
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True when no step failed
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the recorded failures
    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    /// Reason tags of the provisioning failures, in step order
    pub fn reasons(&self) -> Vec<&str> {
        self.errors.iter().filter_map(Error::reason).collect()
    }

    /// A single line naming every failed step, for operator-facing output
    pub fn combined_reason(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.reason().map(str::to_string).unwrap_or_else(|| e.to_string()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `Ok(())` when empty, otherwise `Err(Error::Aggregate(self))`
    pub fn into_result(self) -> Result<(), Error> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(self))
        }
    }
}

impl IntoIterator for AggregateError {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
