//! Common types for flagship: errors, retry, and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::{AggregateError, Error, FieldError, ValidationErrors};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key for the instance a resource belongs to
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Label key for the system a resource is part of
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Label key for the component that created a resource
pub const LABEL_CREATED_BY: &str = "app.kubernetes.io/created-by";
