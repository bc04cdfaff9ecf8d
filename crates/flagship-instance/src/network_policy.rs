//! FQDN egress policy for instance pods
//!
//! Each instance gets one `FQDNNetworkPolicy` named `{name}-fqdn` that pins
//! the server pods to the external hosts they need.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use flagship_common::kube_utils::{map_kube_error, ResourceIdentity};
use flagship_common::{Error, Result, LABEL_CREATED_BY, LABEL_INSTANCE, LABEL_PART_OF};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::crd::k8s::{LabelSelector, NetworkPolicyPort};
use crate::crd::{FqdnEgressRule, FqdnNetworkPolicy, FqdnNetworkPolicySpec, FqdnPeer};

/// Value of the part-of label set by the Unleash operator on server pods
pub const PART_OF_VALUE: &str = "unleasherator";
/// Value of the created-by label set by the Unleash operator on server pods
pub const CREATED_BY_VALUE: &str = "controller-manager";

const TLS_HOSTS: &[&str] = &[
    "sqladmin.googleapis.com",
    "www.gstatic.com",
    "hooks.slack.com",
    "console.nav.cloud.nais.io",
];
const METADATA_HOST: &str = "metadata.google.internal";
const METADATA_PORTS: [i32; 2] = [80, 988];
const KIND: &str = "FQDNNetworkPolicy";

/// Name of the policy owned by an instance
pub fn policy_name(name: &str) -> String {
    format!("{}-fqdn", name)
}

/// Build the desired egress policy for an instance
pub fn build_policy(name: &str, namespace: &str) -> FqdnNetworkPolicy {
    let match_labels = BTreeMap::from([
        (LABEL_INSTANCE.to_string(), name.to_string()),
        (LABEL_PART_OF.to_string(), PART_OF_VALUE.to_string()),
        (LABEL_CREATED_BY.to_string(), CREATED_BY_VALUE.to_string()),
    ]);

    FqdnNetworkPolicy {
        metadata: ObjectMeta {
            name: Some(policy_name(name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: FqdnNetworkPolicySpec {
            pod_selector: LabelSelector { match_labels },
            egress: vec![
                FqdnEgressRule {
                    ports: vec![NetworkPolicyPort::tcp(443)],
                    to: vec![FqdnPeer {
                        fqdns: TLS_HOSTS.iter().map(|h| h.to_string()).collect(),
                    }],
                },
                FqdnEgressRule {
                    ports: METADATA_PORTS.into_iter().map(NetworkPolicyPort::tcp).collect(),
                    to: vec![FqdnPeer {
                        fqdns: vec![METADATA_HOST.to_string()],
                    }],
                },
            ],
        },
    }
}

/// Access to FQDN policies in the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkPolicyApi: Send + Sync {
    /// Get a policy; a missing policy is [`Error::NotFound`]
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<FqdnNetworkPolicy>;

    /// Create a policy; fails if it already exists
    async fn create_policy(&self, policy: &FqdnNetworkPolicy) -> Result<()>;

    /// Replace a policy; the identity fields must match the stored object
    async fn replace_policy(&self, policy: &FqdnNetworkPolicy) -> Result<()>;

    /// Delete a policy
    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`NetworkPolicyApi`] backed by the Kubernetes API
pub struct KubeNetworkPolicyClient {
    client: Client,
}

impl KubeNetworkPolicyClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<FqdnNetworkPolicy> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl NetworkPolicyApi for KubeNetworkPolicyClient {
    async fn get_policy(&self, namespace: &str, name: &str) -> Result<FqdnNetworkPolicy> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(KIND, name, e))
    }

    async fn create_policy(&self, policy: &FqdnNetworkPolicy) -> Result<()> {
        let namespace = policy.metadata.namespace.as_deref().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), policy)
            .await?;
        Ok(())
    }

    async fn replace_policy(&self, policy: &FqdnNetworkPolicy) -> Result<()> {
        let namespace = policy.metadata.namespace.as_deref().unwrap_or_default();
        let name = policy.metadata.name.as_deref().unwrap_or_default();
        self.api(namespace)
            .replace(name, &PostParams::default(), policy)
            .await
            .map_err(|e| map_kube_error(KIND, name, e))?;
        Ok(())
    }

    async fn delete_policy(&self, namespace: &str, name: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(KIND, name, e))?;
        Ok(())
    }
}

/// Creates, updates and deletes the policy of an instance, tagging failures
/// with the step that failed
#[derive(Clone)]
pub struct NetworkPolicyProvisioner {
    api: Arc<dyn NetworkPolicyApi>,
    namespace: String,
}

impl NetworkPolicyProvisioner {
    /// Provisioner writing into `namespace`
    pub fn new(api: Arc<dyn NetworkPolicyApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    /// Fetch the policy of an instance
    pub async fn get(&self, name: &str) -> Result<FqdnNetworkPolicy> {
        self.api
            .get_policy(&self.namespace, &policy_name(name))
            .await
            .map_err(|e| Error::provisioning("failed to get network policy", e))
    }

    /// Create the policy of a new instance
    pub async fn create(&self, name: &str) -> Result<()> {
        let policy = build_policy(name, &self.namespace);
        self.api
            .create_policy(&policy)
            .await
            .map_err(|e| Error::provisioning("failed to create network policy", e))?;
        debug!(instance = %name, "created network policy");
        Ok(())
    }

    /// Rebuild the policy of an existing instance and write it over the
    /// stored one, carrying the stored identity across
    pub async fn update(&self, name: &str) -> Result<()> {
        let result = async {
            let existing = self.api.get_policy(&self.namespace, &policy_name(name)).await?;
            let mut policy = build_policy(name, &self.namespace);
            ResourceIdentity::read(&existing.metadata).stitch_into(&mut policy.metadata);
            self.api.replace_policy(&policy).await
        }
        .await;

        result.map_err(|e| Error::provisioning("failed to update network policy", e))?;
        debug!(instance = %name, "updated network policy");
        Ok(())
    }

    /// Delete the policy of an instance
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.api
            .delete_policy(&self.namespace, &policy_name(name))
            .await
            .map_err(|e| Error::provisioning("failed to delete network policy", e))?;
        debug!(instance = %name, "deleted network policy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(name: &str) -> FqdnNetworkPolicy {
        let mut policy = build_policy(name, "unleash");
        policy.metadata.resource_version = Some("42".to_string());
        policy.metadata.uid = Some("uid-1".to_string());
        policy
    }

    #[test]
    fn policy_selects_instance_pods() {
        let policy = build_policy("team-a", "unleash");
        assert_eq!(policy.metadata.name.as_deref(), Some("team-a-fqdn"));
        assert_eq!(policy.metadata.namespace.as_deref(), Some("unleash"));

        let labels = &policy.spec.pod_selector.match_labels;
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(LABEL_INSTANCE).map(String::as_str), Some("team-a"));
        assert_eq!(labels.get(LABEL_PART_OF).map(String::as_str), Some("unleasherator"));
        assert_eq!(
            labels.get(LABEL_CREATED_BY).map(String::as_str),
            Some("controller-manager")
        );
    }

    #[test]
    fn policy_allows_only_the_known_hosts() {
        let egress = build_policy("team-a", "unleash").spec.egress;
        assert_eq!(egress.len(), 2);

        assert_eq!(egress[0].ports, vec![NetworkPolicyPort::tcp(443)]);
        assert_eq!(egress[0].to[0].fqdns, TLS_HOSTS);

        assert_eq!(
            egress[1].ports,
            vec![NetworkPolicyPort::tcp(80), NetworkPolicyPort::tcp(988)]
        );
        assert_eq!(egress[1].to[0].fqdns, ["metadata.google.internal"]);
    }

    /// The replaced object must carry the stored resourceVersion, otherwise
    /// the API server rejects the write.
    #[tokio::test]
    async fn update_carries_identity_from_the_stored_policy() {
        let mut api = MockNetworkPolicyApi::new();
        api.expect_get_policy()
            .withf(|ns, name| ns == "unleash" && name == "team-a-fqdn")
            .returning(|_, _| Ok(stored("team-a")));
        api.expect_replace_policy()
            .withf(|p| {
                p.metadata.resource_version.as_deref() == Some("42")
                    && p.metadata.uid.as_deref() == Some("uid-1")
            })
            .times(1)
            .returning(|_| Ok(()));

        let provisioner = NetworkPolicyProvisioner::new(Arc::new(api), "unleash");
        assert!(provisioner.update("team-a").await.is_ok());
    }

    #[tokio::test]
    async fn update_of_missing_policy_is_tagged_and_not_found() {
        let mut api = MockNetworkPolicyApi::new();
        api.expect_get_policy()
            .returning(|_, name| Err(Error::not_found(KIND, name)));
        api.expect_replace_policy().never();

        let provisioner = NetworkPolicyProvisioner::new(Arc::new(api), "unleash");
        let err = provisioner.update("team-a").await.expect_err("missing policy");

        assert_eq!(err.reason(), Some("failed to update network policy"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn create_failure_is_tagged() {
        let mut api = MockNetworkPolicyApi::new();
        api.expect_create_policy()
            .returning(|_| Err(Error::api(409, "already exists")));

        let provisioner = NetworkPolicyProvisioner::new(Arc::new(api), "unleash");
        let err = provisioner.create("team-a").await.expect_err("conflict");
        assert_eq!(err.reason(), Some("failed to create network policy"));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn delete_targets_the_instance_policy() {
        let mut api = MockNetworkPolicyApi::new();
        api.expect_delete_policy()
            .withf(|ns, name| ns == "unleash" && name == "team-a-fqdn")
            .times(1)
            .returning(|_, _| Ok(()));

        let provisioner = NetworkPolicyProvisioner::new(Arc::new(api), "unleash");
        assert!(provisioner.delete("team-a").await.is_ok());
    }

    #[tokio::test]
    async fn get_looks_up_the_instance_policy() {
        let mut api = MockNetworkPolicyApi::new();
        api.expect_get_policy()
            .withf(|ns, name| ns == "unleash" && name == "team-a-fqdn")
            .times(1)
            .returning(|_, _| Ok(stored("team-a")));
        api.expect_get_policy()
            .withf(|_, name| name == "team-b-fqdn")
            .returning(|_, name| Err(Error::not_found(KIND, name)));

        let provisioner = NetworkPolicyProvisioner::new(Arc::new(api), "unleash");

        let policy = provisioner.get("team-a").await.expect("stored policy");
        assert_eq!(policy.metadata.name.as_deref(), Some("team-a-fqdn"));
        assert_eq!(policy.metadata.resource_version.as_deref(), Some("42"));

        let err = provisioner.get("team-b").await.expect_err("missing policy");
        assert_eq!(err.reason(), Some("failed to get network policy"));
        assert!(err.is_not_found());
    }
}
