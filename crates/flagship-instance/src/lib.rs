//! Lifecycle orchestration for Unleash feature-flag instances
//!
//! One instance is a bundle of resources owned by two control planes:
//!
//! - **Cloud SQL**: a database and a database user ([`credentials`], [`sql_admin`])
//! - **Kubernetes**: a credential secret, an FQDN egress policy
//!   ([`network_policy`]) and an `Unleash` server descriptor ([`descriptor`], [`server`])
//!
//! The [`orchestrator`] creates, updates, lists and deletes the bundle as one
//! unit. User input goes through [`normalize`] before anything is built.

pub mod config;
pub mod crd;
pub mod credentials;
pub mod descriptor;
pub mod instance;
pub mod network_policy;
pub mod normalize;
pub mod orchestrator;
pub mod server;
pub mod sql_admin;
pub mod versions;

pub use config::{Config, GoogleConfig, OrchestratorConfig, UnleashSettings};
pub use flagship_common::{AggregateError, Error, Result, ValidationErrors};
pub use instance::{CredentialStatus, InstanceStatus, ProvisionedInstance};
pub use normalize::{InstanceConfig, LogLevel};
pub use orchestrator::{Clients, Orchestrator};
