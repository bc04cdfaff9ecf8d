//! Access to `Unleash` server descriptors in the cluster

use async_trait::async_trait;
use flagship_common::kube_utils::map_kube_error;
use flagship_common::Result;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

use crate::crd::Unleash;

const KIND: &str = "Unleash";

/// Server descriptors
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Every server in a namespace
    async fn list_servers(&self, namespace: &str) -> Result<Vec<Unleash>>;

    /// Get a server; a missing server is [`Error::NotFound`](flagship_common::Error::NotFound)
    async fn get_server(&self, namespace: &str, name: &str) -> Result<Unleash>;

    /// Create a server; fails if it already exists
    async fn create_server(&self, server: &Unleash) -> Result<()>;

    /// Replace a server; the identity fields must match the stored object
    async fn replace_server(&self, server: &Unleash) -> Result<()>;

    /// Delete a server
    async fn delete_server(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`ServerApi`] backed by the Kubernetes API
pub struct KubeServerClient {
    client: Client,
}

impl KubeServerClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Unleash> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ServerApi for KubeServerClient {
    async fn list_servers(&self, namespace: &str) -> Result<Vec<Unleash>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_server(&self, namespace: &str, name: &str) -> Result<Unleash> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(KIND, name, e))
    }

    async fn create_server(&self, server: &Unleash) -> Result<()> {
        let namespace = server.metadata.namespace.as_deref().unwrap_or_default();
        self.api(namespace)
            .create(&PostParams::default(), server)
            .await?;
        Ok(())
    }

    async fn replace_server(&self, server: &Unleash) -> Result<()> {
        let namespace = server.metadata.namespace.as_deref().unwrap_or_default();
        let name = server.metadata.name.as_deref().unwrap_or_default();
        self.api(namespace)
            .replace(name, &PostParams::default(), server)
            .await
            .map_err(|e| map_kube_error(KIND, name, e))?;
        Ok(())
    }

    async fn delete_server(&self, namespace: &str, name: &str) -> Result<()> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(KIND, name, e))?;
        Ok(())
    }
}
