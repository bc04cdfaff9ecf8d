//! Unleash custom resource (the server workload descriptor)
//!
//! Owned by the Unleash operator running in the cluster; flagship only writes
//! `spec` and reads back `status`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::k8s::{Container, EnvVar, NetworkPolicyEgressRule, ResourceRequirements};

/// Unleash server managed by the Unleash operator.
///
/// Example:
/// ```yaml
/// apiVersion: unleash.nais.io/v1
/// kind: Unleash
/// metadata:
///   name: team-a
///   namespace: bifrost-unleash
/// spec:
///   size: 1
///   customImage: europe-north1-docker.pkg.dev/nais-io/nais/images/unleash-v4:v5.10.2-20240329-070801-0180a96
///   federation:
///     enabled: true
///     namespaces: [team-a]
///     clusters: [dev-gcp, prod-gcp]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "unleash.nais.io",
    version = "v1",
    kind = "Unleash",
    namespaced,
    status = "UnleashStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UnleashSpec {
    /// Number of replicas
    pub size: i32,

    /// Database connection settings
    pub database: UnleashDatabaseConfig,

    /// Ingress for the web UI
    pub web_ingress: UnleashIngressConfig,

    /// Ingress for the API
    pub api_ingress: UnleashIngressConfig,

    /// NetworkPolicy generated by the operator
    pub network_policy: UnleashNetworkPolicyConfig,

    /// Federation with edge proxies in other clusters
    pub federation: UnleashFederationConfig,

    /// Extra environment variables for the server container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_env_vars: Vec<EnvVar>,

    /// Sidecar containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_containers: Vec<Container>,

    /// Pre-existing ServiceAccount for the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_service_account_name: Option<String>,

    /// Resources for the server container
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Overrides the operator's default image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_image: String,
}

/// Database connection settings, read from a secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnleashDatabaseConfig {
    /// Host the server connects to
    pub host: String,
    /// Port the server connects to
    pub port: String,
    /// Whether to require TLS
    pub ssl: String,
    /// Secret holding the credentials
    pub secret_name: String,
    /// Key of the user name in the secret
    pub secret_user_key: String,
    /// Key of the password in the secret
    pub secret_pass_key: String,
    /// Key of the database name in the secret
    pub secret_database_name_key: String,
}

/// Ingress settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct UnleashIngressConfig {
    /// Whether the ingress is created
    pub enabled: bool,
    /// Host name
    pub host: String,
    /// Path prefix
    pub path: String,
    /// Ingress class
    pub class: String,
}

/// NetworkPolicy settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnleashNetworkPolicyConfig {
    /// Whether a NetworkPolicy is created
    pub enabled: bool,
    /// Allow DNS lookups
    #[serde(rename = "allowDNS")]
    pub allow_dns: bool,
    /// Additional egress rules
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_egress_rules: Vec<NetworkPolicyEgressRule>,
}

/// Federation settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnleashFederationConfig {
    /// Whether federation is enabled
    pub enabled: bool,
    /// Namespaces allowed to federate
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Clusters allowed to federate
    #[serde(default)]
    pub clusters: Vec<String>,
    /// Nonce shared with downstream consumers of the federation secret
    #[serde(default)]
    pub secret_nonce: String,
}

/// Status reported by the Unleash operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnleashStatus {
    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Running server version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Whether the operator reconciled the last spec
    #[serde(default)]
    pub reconciled: bool,
    /// Whether the operator could reach the server
    #[serde(default)]
    pub connected: bool,
}

/// Status condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Reconciled", "Connected")
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Last transition time (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl UnleashStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

impl Condition {
    /// Whether the condition status is "True"
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes_operator_field_names() {
        let spec = UnleashSpec {
            network_policy: UnleashNetworkPolicyConfig {
                enabled: true,
                allow_dns: true,
                extra_egress_rules: vec![],
            },
            federation: UnleashFederationConfig {
                secret_nonce: "abc12345".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let json = serde_json::to_value(&spec).expect("serialize");
        assert_eq!(json["networkPolicy"]["allowDNS"], true);
        assert_eq!(json["federation"]["secretNonce"], "abc12345");
        assert!(json.get("customImage").is_none());
    }

    #[test]
    fn status_conditions_are_looked_up_by_type() {
        let status: UnleashStatus = serde_json::from_value(serde_json::json!({
            "conditions": [
                {"type": "Reconciled", "status": "True"},
                {"type": "Connected", "status": "False", "message": "connection refused"}
            ]
        }))
        .expect("deserialize");

        assert!(status.condition("Reconciled").is_some_and(Condition::is_true));
        assert!(!status.condition("Connected").is_some_and(Condition::is_true));
        assert!(status.condition("Missing").is_none());
    }
}
