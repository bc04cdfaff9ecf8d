//! Kubernetes helpers shared by the provisioners
//!
//! Client construction, API error mapping, and the identity carry-over used
//! to satisfy optimistic concurrency on replace.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `$KUBECONFIG`, then `~/.kube/config`).
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Map a kube error for a named object, turning 404 into [`Error::NotFound`]
pub fn map_kube_error(kind: &str, name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        other => Error::from(other),
    }
}

/// Control-plane-assigned metadata required to overwrite an existing object.
///
/// The API server rejects a replace whose `resourceVersion` does not match
/// the stored object, so a freshly built object must carry these values over
/// from the last read before it is written back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceIdentity {
    /// Version stamp checked by the API server on write
    pub resource_version: Option<String>,
    /// Unique object identifier
    pub uid: Option<String>,
    /// Time the object was first created
    pub creation_timestamp: Option<Time>,
    /// Spec generation counter
    pub generation: Option<i64>,
}

impl ResourceIdentity {
    /// Read the identity fields from the metadata of a fetched object
    pub fn read(meta: &ObjectMeta) -> Self {
        Self {
            resource_version: meta.resource_version.clone(),
            uid: meta.uid.clone(),
            creation_timestamp: meta.creation_timestamp.clone(),
            generation: meta.generation,
        }
    }

    /// Write the identity fields into the metadata of a freshly built object
    pub fn stitch_into(self, meta: &mut ObjectMeta) {
        meta.resource_version = self.resource_version;
        meta.uid = self.uid;
        meta.creation_timestamp = self.creation_timestamp;
        meta.generation = self.generation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Whatever".to_string(),
            code,
        })
    }

    #[test]
    fn not_found_maps_to_typed_variant() {
        let err = map_kube_error("Unleash", "team-a", api_error(404));
        assert!(matches!(err, Error::NotFound { ref kind, ref name } if kind == "Unleash" && name == "team-a"));
    }

    #[test]
    fn other_api_errors_stay_kube_errors() {
        let err = map_kube_error("Unleash", "team-a", api_error(409));
        assert!(matches!(err, Error::Kube { .. }));
        assert!(!err.is_not_found());
    }

    /// Story: a rebuilt object inherits identity from the stored one
    #[test]
    fn story_identity_carries_over_to_rebuilt_object() {
        let stored = ObjectMeta {
            name: Some("team-a".to_string()),
            resource_version: Some("4711".to_string()),
            uid: Some("0f3c".to_string()),
            generation: Some(3),
            creation_timestamp: Some(Time(chrono_epoch())),
            ..Default::default()
        };
        let mut rebuilt = ObjectMeta {
            name: Some("team-a".to_string()),
            ..Default::default()
        };

        ResourceIdentity::read(&stored).stitch_into(&mut rebuilt);

        assert_eq!(rebuilt.resource_version.as_deref(), Some("4711"));
        assert_eq!(rebuilt.uid.as_deref(), Some("0f3c"));
        assert_eq!(rebuilt.generation, Some(3));
        assert_eq!(rebuilt.creation_timestamp, stored.creation_timestamp);
        assert_eq!(rebuilt.name.as_deref(), Some("team-a"));
    }

    fn chrono_epoch() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
        k8s_openapi::chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
    }
}
