//! Custom resources and Kubernetes-shaped types written by flagship

mod fqdn_policy;
pub mod k8s;
mod unleash;

pub use fqdn_policy::{FqdnEgressRule, FqdnNetworkPolicy, FqdnNetworkPolicySpec, FqdnPeer};
pub use unleash::{
    Condition, Unleash, UnleashDatabaseConfig, UnleashFederationConfig, UnleashIngressConfig,
    UnleashNetworkPolicyConfig, UnleashSpec, UnleashStatus,
};
