//! Database, database user and credential secret of an instance
//!
//! All three are named after the instance. Creation happens once, when the
//! instance is created; updates never touch credentials.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use flagship_common::kube_utils::map_kube_error;
use flagship_common::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{
    SECRET_DATABASE_KEY, SECRET_HOST_KEY, SECRET_PASSWORD_KEY, SECRET_USER_KEY,
};

/// Raw bytes of entropy in a generated password
pub const PASSWORD_BYTES: usize = 16;

/// A database on the SQL instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    /// Database name
    pub name: String,
    /// Character set, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    /// Collation, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
}

impl Database {
    /// Database with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A built-in user on the SQL instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseUser {
    /// User name
    pub name: String,
    /// Host restriction, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Password; only known right after creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Databases on the SQL instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseApi: Send + Sync {
    /// Create a database
    async fn create_database(&self, name: &str) -> Result<Database>;

    /// Get a database; a missing database is [`Error::NotFound`]
    async fn get_database(&self, name: &str) -> Result<Database>;

    /// List every database, system databases included
    async fn list_databases(&self) -> Result<Vec<Database>>;

    /// Delete a database
    async fn delete_database(&self, name: &str) -> Result<()>;
}

/// Users on the SQL instance
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseUserApi: Send + Sync {
    /// Create a user with the given password
    async fn create_user(&self, name: &str, password: &str) -> Result<DatabaseUser>;

    /// Get a user; a missing user is [`Error::NotFound`]
    async fn get_user(&self, name: &str) -> Result<DatabaseUser>;

    /// Delete a user
    async fn delete_user(&self, name: &str) -> Result<()>;
}

/// Secrets in the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretApi: Send + Sync {
    /// Create a secret; fails if it already exists
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Delete a secret
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// [`SecretApi`] backed by the Kubernetes API
pub struct KubeSecretClient {
    client: Client,
}

impl KubeSecretClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretApi for KubeSecretClient {
    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("Secret", name, e))?;
        Ok(())
    }
}

/// Random password: 16 bytes from the OS-seeded CSPRNG, base64url encoded
pub fn random_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Build the secret the server and its proxy read the database login from
pub fn build_credential_secret(
    namespace: &str,
    database: &Database,
    user: &DatabaseUser,
    host: &str,
) -> Secret {
    let entry = |v: &str| ByteString(v.as_bytes().to_vec());
    let data = BTreeMap::from([
        (SECRET_USER_KEY.to_string(), entry(&user.name)),
        (
            SECRET_PASSWORD_KEY.to_string(),
            entry(user.password.as_deref().unwrap_or_default()),
        ),
        (SECRET_DATABASE_KEY.to_string(), entry(&database.name)),
        (SECRET_HOST_KEY.to_string(), entry(host)),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(database.name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// The capability clients the credential chain needs
#[derive(Clone)]
pub struct CredentialClients {
    /// Databases
    pub databases: Arc<dyn DatabaseApi>,
    /// Users
    pub users: Arc<dyn DatabaseUserApi>,
    /// Secrets
    pub secrets: Arc<dyn SecretApi>,
}

/// Provisions the credential chain of an instance, tagging each failure with
/// the step that failed
#[derive(Clone)]
pub struct CredentialProvisioner {
    clients: CredentialClients,
    namespace: String,
    sql_host: String,
}

impl CredentialProvisioner {
    /// Provisioner writing secrets into `namespace`, pointing them at `sql_host`
    pub fn new(
        clients: CredentialClients,
        namespace: impl Into<String>,
        sql_host: impl Into<String>,
    ) -> Self {
        Self {
            clients,
            namespace: namespace.into(),
            sql_host: sql_host.into(),
        }
    }

    /// Create the database of an instance
    pub async fn create_database(&self, name: &str) -> Result<Database> {
        let database = self
            .clients
            .databases
            .create_database(name)
            .await
            .map_err(|e| Error::provisioning("failed to create database", e))?;
        debug!(instance = %name, "created database");
        Ok(database)
    }

    /// Create the database user of an instance with a fresh random password.
    ///
    /// The returned user always carries the generated password.
    pub async fn create_user(&self, name: &str) -> Result<DatabaseUser> {
        let password = random_password();
        let mut user = self
            .clients
            .users
            .create_user(name, &password)
            .await
            .map_err(|e| Error::provisioning("failed to create database user", e))?;
        user.password = Some(password);
        debug!(instance = %name, "created database user");
        Ok(user)
    }

    /// Write the credential secret for a database and user
    pub async fn create_secret(&self, database: &Database, user: &DatabaseUser) -> Result<()> {
        let secret = build_credential_secret(&self.namespace, database, user, &self.sql_host);
        self.clients
            .secrets
            .create_secret(&secret)
            .await
            .map_err(|e| Error::provisioning("failed to create database secret", e))?;
        debug!(instance = %database.name, "created database secret");
        Ok(())
    }

    /// Look up the database of an instance
    pub async fn get_database(&self, name: &str) -> Result<Database> {
        self.clients
            .databases
            .get_database(name)
            .await
            .map_err(|e| Error::provisioning("failed to get database", e))
    }

    /// Look up the database user of an instance
    pub async fn get_user(&self, name: &str) -> Result<DatabaseUser> {
        self.clients
            .users
            .get_user(name)
            .await
            .map_err(|e| Error::provisioning("failed to get database user", e))
    }

    /// Every database on the instance, system databases included
    pub async fn list_databases(&self) -> Result<Vec<Database>> {
        self.clients
            .databases
            .list_databases()
            .await
            .map_err(|e| Error::provisioning("failed to list databases", e))
    }

    /// Delete the database of an instance
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.clients
            .databases
            .delete_database(name)
            .await
            .map_err(|e| Error::provisioning("failed to delete database", e))
    }

    /// Delete the database user of an instance
    pub async fn delete_user(&self, name: &str) -> Result<()> {
        self.clients
            .users
            .delete_user(name)
            .await
            .map_err(|e| Error::provisioning("failed to delete database user", e))
    }

    /// Delete the credential secret of an instance
    pub async fn delete_secret(&self, name: &str) -> Result<()> {
        self.clients
            .secrets
            .delete_secret(&self.namespace, name)
            .await
            .map_err(|e| Error::provisioning("failed to delete database secret", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(
        databases: MockDatabaseApi,
        users: MockDatabaseUserApi,
        secrets: MockSecretApi,
    ) -> CredentialProvisioner {
        CredentialProvisioner::new(
            CredentialClients {
                databases: Arc::new(databases),
                users: Arc::new(users),
                secrets: Arc::new(secrets),
            },
            "unleash",
            "10.0.0.5",
        )
    }

    fn secret_value<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .map(|v| v.0.as_slice())
    }

    #[test]
    fn passwords_are_16_random_bytes_base64url() {
        let a = random_password();
        let b = random_password();

        assert_ne!(a, b);
        // 16 bytes encode to 22 symbols plus two padding characters
        assert_eq!(a.len(), 24);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=')));
        assert_eq!(URL_SAFE.decode(&a).map(|v| v.len()).ok(), Some(PASSWORD_BYTES));
    }

    #[test]
    fn secret_carries_the_four_fixed_keys() {
        let user = DatabaseUser {
            name: "team-a".to_string(),
            host: None,
            password: Some("s3cret".to_string()),
        };
        let secret =
            build_credential_secret("unleash", &Database::named("team-a"), &user, "10.0.0.5");

        assert_eq!(secret.metadata.name.as_deref(), Some("team-a"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("unleash"));
        assert_eq!(secret.data.as_ref().map(BTreeMap::len), Some(4));
        assert_eq!(secret_value(&secret, "POSTGRES_USER"), Some(&b"team-a"[..]));
        assert_eq!(secret_value(&secret, "POSTGRES_PASSWORD"), Some(&b"s3cret"[..]));
        assert_eq!(secret_value(&secret, "POSTGRES_DB"), Some(&b"team-a"[..]));
        assert_eq!(secret_value(&secret, "POSTGRES_HOST"), Some(&b"10.0.0.5"[..]));
    }

    /// The password sent to the SQL admin API is the one that ends up in
    /// the secret.
    #[tokio::test]
    async fn created_user_carries_the_password_it_was_created_with() {
        let mut users = MockDatabaseUserApi::new();
        users
            .expect_create_user()
            .withf(|name, password| name == "team-a" && password.len() == 24)
            .times(1)
            .returning(|name, _| {
                Ok(DatabaseUser {
                    name: name.to_string(),
                    ..Default::default()
                })
            });

        let p = provisioner(MockDatabaseApi::new(), users, MockSecretApi::new());
        let user = p.create_user("team-a").await.expect("user");

        assert_eq!(user.name, "team-a");
        assert_eq!(user.password.as_deref().map(str::len), Some(24));
    }

    #[tokio::test]
    async fn failures_are_tagged_with_the_step() {
        let mut databases = MockDatabaseApi::new();
        databases
            .expect_create_database()
            .returning(|_| Err(Error::api(409, "database exists")));
        databases
            .expect_delete_database()
            .returning(|name| Err(Error::not_found("Database", name)));
        let mut users = MockDatabaseUserApi::new();
        users
            .expect_create_user()
            .returning(|_, _| Err(Error::api(500, "boom")));
        let mut secrets = MockSecretApi::new();
        secrets
            .expect_create_secret()
            .returning(|_| Err(Error::api(409, "secret exists")));

        let p = provisioner(databases, users, secrets);

        let err = p.create_database("team-a").await.expect_err("db");
        assert_eq!(err.reason(), Some("failed to create database"));

        let err = p.create_user("team-a").await.expect_err("user");
        assert_eq!(err.reason(), Some("failed to create database user"));

        let err = p
            .create_secret(&Database::named("team-a"), &DatabaseUser::default())
            .await
            .expect_err("secret");
        assert_eq!(err.reason(), Some("failed to create database secret"));

        let err = p.delete_database("team-a").await.expect_err("delete");
        assert_eq!(err.reason(), Some("failed to delete database"));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn secret_is_written_to_the_configured_namespace() {
        let mut secrets = MockSecretApi::new();
        secrets
            .expect_create_secret()
            .withf(|s| {
                s.metadata.namespace.as_deref() == Some("unleash")
                    && s.metadata.name.as_deref() == Some("team-a")
            })
            .times(1)
            .returning(|_| Ok(()));

        let p = provisioner(MockDatabaseApi::new(), MockDatabaseUserApi::new(), secrets);
        let user = DatabaseUser {
            name: "team-a".to_string(),
            password: Some("pw".to_string()),
            ..Default::default()
        };
        assert!(p.create_secret(&Database::named("team-a"), &user).await.is_ok());
    }
}
