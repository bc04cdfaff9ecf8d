//! FQDNNetworkPolicy custom resource (GKE FQDN-based egress policy)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::k8s::{LabelSelector, NetworkPolicyPort};

/// Egress policy allowing pods to reach a fixed set of DNS names
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.gke.io",
    version = "v1alpha3",
    kind = "FQDNNetworkPolicy",
    root = "FqdnNetworkPolicy",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct FqdnNetworkPolicySpec {
    /// Pods the policy applies to
    pub pod_selector: LabelSelector,
    /// Allowed egress
    #[serde(default)]
    pub egress: Vec<FqdnEgressRule>,
}

/// One allowed egress destination set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct FqdnEgressRule {
    /// Destination ports
    #[serde(default)]
    pub ports: Vec<NetworkPolicyPort>,
    /// Destination names
    #[serde(default)]
    pub to: Vec<FqdnPeer>,
}

/// Destination names of an egress rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct FqdnPeer {
    /// Fully qualified domain names
    #[serde(rename = "fqdns")]
    pub fqdns: Vec<String>,
}
