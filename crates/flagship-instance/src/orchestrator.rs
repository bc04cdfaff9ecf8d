//! Instance lifecycle orchestrator
//!
//! Sequences the credential, network policy and server steps of an instance
//! as one logical operation. There is no transaction underneath: every step
//! is attempted, independent steps run concurrently, and every failure is
//! collected into one [`AggregateError`]. Nothing is rolled back.

use std::future::Future;
use std::sync::Arc;

use flagship_common::kube_utils::ResourceIdentity;
use flagship_common::{AggregateError, Error, Result};
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, OrchestratorConfig};
use crate::credentials::{
    CredentialClients, CredentialProvisioner, Database, DatabaseApi, DatabaseUserApi, SecretApi,
};
use crate::crd::Unleash;
use crate::descriptor::build_server;
use crate::instance::{CredentialStatus, ProvisionedInstance};
use crate::network_policy::{NetworkPolicyApi, NetworkPolicyProvisioner};
use crate::normalize::{validate_name, InstanceConfig, RESERVED_NAME};
use crate::server::ServerApi;
use crate::versions::{available_versions, VersionSource};

/// Every control-plane capability the orchestrator drives
#[derive(Clone)]
pub struct Clients {
    /// Databases on the SQL instance
    pub databases: Arc<dyn DatabaseApi>,
    /// Users on the SQL instance
    pub users: Arc<dyn DatabaseUserApi>,
    /// Secrets in the instance namespace
    pub secrets: Arc<dyn SecretApi>,
    /// FQDN policies in the instance namespace
    pub policies: Arc<dyn NetworkPolicyApi>,
    /// Server descriptors in the instance namespace
    pub servers: Arc<dyn ServerApi>,
    /// Release versions, for the default version pin
    pub versions: Arc<dyn VersionSource>,
}

/// Creates, updates, lists and deletes instances.
///
/// Holds no mutable state: every read goes to the control planes and two
/// concurrent operations on one name race there.
#[derive(Clone)]
pub struct Orchestrator {
    config: Config,
    settings: OrchestratorConfig,
    credentials: CredentialProvisioner,
    policies: NetworkPolicyProvisioner,
    servers: Arc<dyn ServerApi>,
    versions: Arc<dyn VersionSource>,
}

impl Orchestrator {
    /// Wire an orchestrator from global configuration and clients
    pub fn new(config: Config, clients: Clients, settings: OrchestratorConfig) -> Self {
        let namespace = config.unleash.instance_namespace.clone();
        let credentials = CredentialProvisioner::new(
            CredentialClients {
                databases: clients.databases,
                users: clients.users,
                secrets: clients.secrets,
            },
            namespace.clone(),
            config.unleash.sql_instance_address.clone(),
        );
        let policies = NetworkPolicyProvisioner::new(clients.policies, namespace);

        Self {
            config,
            settings,
            credentials,
            policies,
            servers: clients.servers,
            versions: clients.versions,
        }
    }

    /// Namespace the instances live in
    pub fn namespace(&self) -> &str {
        &self.config.unleash.instance_namespace
    }

    /// Global configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every instance in the namespace. Only server descriptors are read.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<ProvisionedInstance>> {
        self.bounded("list", async {
            let servers = self.servers.list_servers(self.namespace()).await?;
            let instances: Vec<ProvisionedInstance> = servers
                .into_iter()
                .filter(|s| s.metadata.name.as_deref() != Some(RESERVED_NAME))
                .map(ProvisionedInstance::from_server)
                .collect();
            debug!(count = instances.len(), "listed instances");
            Ok(instances)
        })
        .await
    }

    /// One instance; [`Error::NotFound`] when it has no server descriptor
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<ProvisionedInstance> {
        validate_name(name)?;
        self.bounded("get", async {
            let server = self.servers.get_server(self.namespace(), name).await?;
            Ok(ProvisionedInstance::from_server(server))
        })
        .await
    }

    /// Provision a new instance.
    ///
    /// The config is defaulted, merged and validated first; a validation
    /// failure touches no control plane. After that the credential chain,
    /// the network policy and the server are created concurrently and every
    /// failure is reported.
    #[instrument(skip(self, config), fields(name = %config.name))]
    pub async fn create(&self, mut config: InstanceConfig) -> Result<()> {
        self.bounded("create", async {
            prepare(&mut config, self.versions.as_ref()).await?;
            let name = config.name.as_str();

            let (mut errors, policy, server) = tokio::join!(
                self.create_credentials(name),
                self.policies.create(name),
                self.create_server(&config),
            );
            errors.record(policy);
            errors.record(server);

            finish("create", name, errors)
        })
        .await
    }

    /// Rewrite the network policy and server of an existing instance.
    ///
    /// Credentials are never touched. When the config carries no nonce the
    /// stored one is kept, so federation consumers stay valid.
    #[instrument(skip(self, config), fields(name = %config.name))]
    pub async fn update(&self, mut config: InstanceConfig) -> Result<()> {
        self.bounded("update", async {
            config.prepare_for_update()?;
            let name = config.name.as_str();

            let (policy, server) =
                tokio::join!(self.policies.update(name), self.update_server(&config));

            let mut errors = AggregateError::new();
            errors.record(policy);
            errors.record(server);

            finish("update", name, errors)
        })
        .await
    }

    /// Tear down every resource of an instance.
    ///
    /// The server goes first so no running pod references credentials that
    /// are being removed; every other step is still attempted if it fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.bounded("delete", async {
            let mut errors = AggregateError::new();

            errors.record(
                self.servers
                    .delete_server(self.namespace(), name)
                    .await
                    .map_err(|e| Error::provisioning("failed to delete unleash", e)),
            );

            let (policy, secret, (user, database)) = tokio::join!(
                self.policies.delete(name),
                self.credentials.delete_secret(name),
                async {
                    let user = self.credentials.delete_user(name).await;
                    let database = self.credentials.delete_database(name).await;
                    (user, database)
                },
            );
            errors.record(policy);
            errors.record(secret);
            errors.record(user);
            errors.record(database);

            finish("delete", name, errors)
        })
        .await
    }

    /// Database and user of an instance, for display.
    ///
    /// Missing pieces read as `None`; only other failures are errors.
    #[instrument(skip(self))]
    pub async fn credentials(&self, name: &str) -> Result<CredentialStatus> {
        validate_name(name)?;
        self.bounded("credentials", async {
            let (database, user) = tokio::join!(
                self.credentials.get_database(name),
                self.credentials.get_user(name),
            );

            let mut errors = AggregateError::new();
            let status = CredentialStatus {
                database: errors.record(absent_as_none(database)).flatten(),
                user: errors.record(absent_as_none(user)).flatten(),
            };
            errors.into_result().map(|_| status)
        })
        .await
    }

    /// Instance databases on the SQL instance, the system database excluded
    #[instrument(skip(self))]
    pub async fn databases(&self) -> Result<Vec<Database>> {
        self.bounded("databases", async {
            let databases = self.credentials.list_databases().await?;
            Ok(databases
                .into_iter()
                .filter(|d| d.name != RESERVED_NAME)
                .collect())
        })
        .await
    }

    /// The server descriptor `create` would write for a config
    pub async fn render(&self, config: InstanceConfig) -> Result<Unleash> {
        render(&self.config, self.versions.as_ref(), config).await
    }

    async fn create_credentials(&self, name: &str) -> AggregateError {
        let mut errors = AggregateError::new();

        let (database, user) = tokio::join!(
            self.credentials.create_database(name),
            self.credentials.create_user(name),
        );
        let database = errors.record(database);

        // Without the user there is no password to write
        if let Some(user) = errors.record(user) {
            let database = database.unwrap_or_else(|| Database::named(name));
            errors.record(self.credentials.create_secret(&database, &user).await);
        }

        errors
    }

    async fn create_server(&self, config: &InstanceConfig) -> Result<()> {
        let server = build_server(&self.config, config);
        self.servers
            .create_server(&server)
            .await
            .map_err(|e| Error::provisioning("failed to create unleash", e))?;
        debug!(instance = %config.name, "created unleash");
        Ok(())
    }

    async fn update_server(&self, config: &InstanceConfig) -> Result<()> {
        let result = async {
            let existing = self
                .servers
                .get_server(self.namespace(), &config.name)
                .await?;

            let mut desired_config = config.clone();
            if desired_config.federation_nonce.is_empty() {
                desired_config.federation_nonce = existing.spec.federation.secret_nonce.clone();
            }

            let mut desired = build_server(&self.config, &desired_config);
            ResourceIdentity::read(&existing.metadata).stitch_into(&mut desired.metadata);
            self.servers.replace_server(&desired).await
        }
        .await;

        result.map_err(|e| Error::provisioning("failed to update unleash", e))?;
        debug!(instance = %config.name, "updated unleash");
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.settings.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fut).await.map_err(|_| {
                warn!(operation, ?deadline, "operation exceeded its deadline");
                Error::internal_with_context(
                    "deadline",
                    format!("{} did not finish within {:?}", operation, deadline),
                )
            })?,
            None => fut.await,
        }
    }
}

fn absent_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn finish(operation: &str, name: &str, errors: AggregateError) -> Result<()> {
    if errors.is_empty() {
        info!(instance = %name, operation, "instance operation completed");
    } else {
        for e in errors.iter() {
            let cause = std::error::Error::source(e).map(|s| s.to_string());
            warn!(
                instance = %name,
                operation,
                error = %e,
                cause = cause.as_deref().unwrap_or("-"),
                "instance step failed"
            );
        }
    }
    errors.into_result()
}

/// Default, merge and validate a config for creation. The version registry
/// is only asked when no version is pinned and the name is acceptable.
async fn prepare(config: &mut InstanceConfig, versions: &dyn VersionSource) -> Result<()> {
    validate_name(&config.name)?;
    let versions = if config.version_pin.is_empty() {
        available_versions(versions).await
    } else {
        Vec::new()
    };
    config.prepare_for_create(&versions)?;
    Ok(())
}

/// Build the server descriptor `create` would write, touching no control
/// plane other than the version registry
#[instrument(skip_all, fields(name = %instance.name))]
pub async fn render(
    config: &Config,
    versions: &dyn VersionSource,
    mut instance: InstanceConfig,
) -> Result<Unleash> {
    prepare(&mut instance, versions).await?;
    Ok(build_server(config, &instance))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::UnleashSettings;
    use crate::credentials::{DatabaseUser, MockDatabaseApi, MockDatabaseUserApi, MockSecretApi};
    use crate::network_policy::{build_policy, MockNetworkPolicyApi};
    use crate::server::MockServerApi;
    use crate::versions::{MockVersionSource, ReleaseVersion};

    struct Mocks {
        databases: MockDatabaseApi,
        users: MockDatabaseUserApi,
        secrets: MockSecretApi,
        policies: MockNetworkPolicyApi,
        servers: MockServerApi,
        versions: MockVersionSource,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                databases: MockDatabaseApi::new(),
                users: MockDatabaseUserApi::new(),
                secrets: MockSecretApi::new(),
                policies: MockNetworkPolicyApi::new(),
                servers: MockServerApi::new(),
                versions: MockVersionSource::new(),
            }
        }

        fn build(self, settings: OrchestratorConfig) -> Orchestrator {
            let config = Config {
                unleash: UnleashSettings {
                    instance_namespace: "unleash".to_string(),
                    sql_instance_address: "10.0.0.5".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            };
            Orchestrator::new(
                config,
                Clients {
                    databases: Arc::new(self.databases),
                    users: Arc::new(self.users),
                    secrets: Arc::new(self.secrets),
                    policies: Arc::new(self.policies),
                    servers: Arc::new(self.servers),
                    versions: Arc::new(self.versions),
                },
                settings,
            )
        }
    }

    fn stored_server(name: &str, nonce: &str) -> Unleash {
        let mut cfg = InstanceConfig::new(name);
        cfg.federation_nonce = nonce.to_string();
        let mut server = build_server(&Config::default(), &cfg);
        server.metadata.namespace = Some("unleash".to_string());
        server.metadata.resource_version = Some("7".to_string());
        server.metadata.uid = Some("server-uid".to_string());
        server.metadata.generation = Some(3);
        server
    }

    /// Bad input must be rejected before any control plane is touched,
    /// the version registry included; the mocks fail the test on any
    /// unexpected call.
    #[tokio::test]
    async fn invalid_create_touches_nothing() {
        let orchestrator = Mocks::new().build(OrchestratorConfig::default());

        let err = orchestrator
            .create(InstanceConfig::new("team a"))
            .await
            .expect_err("invalid name");

        assert!(err
            .validation_errors()
            .is_some_and(|v| v.has_field("name")));
    }

    /// Names end up in REST paths and resource keys, so reads and deletes
    /// reject a malformed one before any call is made.
    #[tokio::test]
    async fn unsafe_names_are_rejected_before_any_call() {
        let orchestrator = Mocks::new().build(OrchestratorConfig::default());

        for name in ["a/b", "x/../../../prod-db/databases/payments", ""] {
            let err = orchestrator.delete(name).await.expect_err("delete");
            assert!(err.validation_errors().is_some_and(|v| v.has_field("name")));

            let err = orchestrator.get(name).await.expect_err("get");
            assert!(err.validation_errors().is_some());

            let err = orchestrator.credentials(name).await.expect_err("credentials");
            assert!(err.validation_errors().is_some());
        }
    }

    #[tokio::test]
    async fn create_uses_latest_release_when_no_version_pinned() {
        let mut mocks = Mocks::new();
        mocks.versions.expect_list_versions().times(1).returning(|| {
            Ok(vec![
                ReleaseVersion::parse_tag("v5.2.0-20240301-100000-aaaaaaa").expect("tag"),
            ])
        });
        mocks
            .databases
            .expect_create_database()
            .returning(|name| Ok(Database::named(name)));
        mocks.users.expect_create_user().returning(|name, _| {
            Ok(DatabaseUser {
                name: name.to_string(),
                ..Default::default()
            })
        });
        mocks.secrets.expect_create_secret().returning(|_| Ok(()));
        mocks.policies.expect_create_policy().returning(|_| Ok(()));
        mocks
            .servers
            .expect_create_server()
            .withf(|s| s.spec.custom_image.ends_with(":v5.2.0-20240301-100000-aaaaaaa"))
            .times(1)
            .returning(|_| Ok(()));

        let orchestrator = mocks.build(OrchestratorConfig::default());
        assert!(orchestrator.create(InstanceConfig::new("team-a")).await.is_ok());
    }

    /// A failed user creation leaves nothing to put in the secret, so the
    /// secret step is skipped rather than written with an empty password.
    #[tokio::test]
    async fn secret_is_skipped_when_user_creation_fails() {
        let mut mocks = Mocks::new();
        mocks.versions.expect_list_versions().returning(|| Ok(vec![]));
        mocks
            .databases
            .expect_create_database()
            .returning(|name| Ok(Database::named(name)));
        mocks
            .users
            .expect_create_user()
            .returning(|_, _| Err(Error::api(500, "boom")));
        mocks.secrets.expect_create_secret().never();
        mocks.policies.expect_create_policy().returning(|_| Ok(()));
        mocks.servers.expect_create_server().returning(|_| Ok(()));

        let orchestrator = mocks.build(OrchestratorConfig::default());
        let err = orchestrator
            .create(InstanceConfig::new("team-a"))
            .await
            .expect_err("user failure");

        match err {
            Error::Aggregate(agg) => {
                assert_eq!(agg.reasons(), ["failed to create database user"]);
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_keeps_stored_nonce_and_identity() {
        let mut mocks = Mocks::new();
        mocks
            .policies
            .expect_get_policy()
            .returning(|ns, _| Ok(build_policy("team-a", ns)));
        mocks.policies.expect_replace_policy().returning(|_| Ok(()));
        mocks
            .servers
            .expect_get_server()
            .returning(|_, name| Ok(stored_server(name, "stored42")));
        mocks
            .servers
            .expect_replace_server()
            .withf(|s| {
                s.spec.federation.secret_nonce == "stored42"
                    && s.metadata.resource_version.as_deref() == Some("7")
                    && s.metadata.uid.as_deref() == Some("server-uid")
                    && s.metadata.generation == Some(3)
                    && s.spec.federation.namespaces == ["team-a", "team-b"]
            })
            .times(1)
            .returning(|_| Ok(()));

        let orchestrator = mocks.build(OrchestratorConfig::default());
        let mut cfg = InstanceConfig::new("team-a");
        cfg.allowed_principals = "team-b".to_string();
        cfg.allowed_namespaces = "team-a".to_string();
        cfg.log_level = "info".to_string();
        cfg.db_pool_max = 3;
        cfg.db_pool_idle_timeout_ms = 1000;

        assert!(orchestrator.update(cfg).await.is_ok());
    }

    #[tokio::test]
    async fn credentials_treat_missing_pieces_as_absent() {
        let mut mocks = Mocks::new();
        mocks
            .databases
            .expect_get_database()
            .returning(|name| Ok(Database::named(name)));
        mocks
            .users
            .expect_get_user()
            .returning(|name| Err(Error::not_found("DatabaseUser", name)));

        let orchestrator = mocks.build(OrchestratorConfig::default());
        let status = orchestrator.credentials("team-a").await.expect("status");

        assert_eq!(status.database, Some(Database::named("team-a")));
        assert!(status.user.is_none());
        assert!(!status.is_complete());
    }

    #[tokio::test]
    async fn databases_exclude_the_system_database() {
        let mut mocks = Mocks::new();
        mocks.databases.expect_list_databases().returning(|| {
            Ok(vec![
                Database::named("postgres"),
                Database::named("team-a"),
                Database::named("team-b"),
            ])
        });

        let orchestrator = mocks.build(OrchestratorConfig::default());
        let names: Vec<String> = orchestrator
            .databases()
            .await
            .expect("databases")
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["team-a", "team-b"]);
    }

    #[tokio::test]
    async fn operations_past_the_deadline_are_abandoned() {
        let mut mocks = Mocks::new();
        mocks.servers.expect_list_servers().returning(|_| Ok(vec![]));
        let orchestrator =
            mocks.build(OrchestratorConfig::with_deadline(Duration::from_millis(10)));

        // A future that never resolves stands in for a hung control plane
        let err = orchestrator
            .bounded("hang", std::future::pending::<Result<()>>())
            .await
            .expect_err("deadline");
        assert!(matches!(err, Error::Internal { ref context, .. } if context == "deadline"));

        assert!(orchestrator.list().await.is_ok());
    }

    #[tokio::test]
    async fn render_builds_without_provisioning() {
        let mut mocks = Mocks::new();
        mocks.versions.expect_list_versions().returning(|| Ok(vec![]));
        let orchestrator = mocks.build(OrchestratorConfig::default());

        let server = orchestrator
            .render(InstanceConfig::new("team-a"))
            .await
            .expect("render");

        assert_eq!(server.metadata.name.as_deref(), Some("team-a"));
        assert_eq!(server.spec.federation.secret_nonce.len(), 8);
    }

    /// A pinned version never reaches the registry; the mock has no
    /// expectations and would panic if asked.
    #[tokio::test]
    async fn render_with_pin_skips_registry() {
        let versions = MockVersionSource::new();
        let mut instance = InstanceConfig::new("team-a");
        instance.version_pin = "v5.1.0-20240101-120000-abcdef1".to_string();

        let server = render(&Config::default(), &versions, instance)
            .await
            .expect("render");

        assert!(server.spec.custom_image.ends_with(":v5.1.0-20240101-120000-abcdef1"));
    }
}
