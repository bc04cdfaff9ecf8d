//! Server descriptor builder
//!
//! Turns global configuration plus a prepared [`InstanceConfig`] into the
//! desired `Unleash` resource. Pure: no I/O, no randomness, no identity
//! fields. The orchestrator stitches identity in before a replace.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::Config;
use crate::crd::k8s::{
    Capabilities, Container, EnvVar, IpBlock, NetworkPolicyEgressRule, NetworkPolicyPeer,
    NetworkPolicyPort, ResourceQuantity, ResourceRequirements, SecurityContext,
};
use crate::crd::{
    Unleash, UnleashDatabaseConfig, UnleashFederationConfig, UnleashIngressConfig,
    UnleashNetworkPolicyConfig, UnleashSpec,
};
use crate::normalize::{
    split_list, InstanceConfig, DEFAULT_DB_POOL_IDLE_TIMEOUT_MS, DEFAULT_DB_POOL_MAX,
    DEFAULT_FEDERATION_CLUSTERS, DEFAULT_LOG_LEVEL,
};

/// Registry path of the custom server image
pub const CUSTOM_IMAGE_REPO: &str = "europe-north1-docker.pkg.dev/nais-io/nais/images";
/// Name of the custom server image
pub const CUSTOM_IMAGE_NAME: &str = "unleash-v4";

/// Name of the Cloud SQL proxy sidecar
pub const SQL_PROXY_CONTAINER: &str = "sql-proxy";
/// UID the sidecar runs as (distroless nonroot)
pub const SQL_PROXY_UID: i64 = 65532;
/// Port the sidecar listens on inside the pod
pub const SQL_PROXY_PORT: u16 = 5432;
/// Port of the Cloud SQL server-side proxy
pub const CLOUD_SQL_PORT: i32 = 3307;

/// Secret key holding the database user
pub const SECRET_USER_KEY: &str = "POSTGRES_USER";
/// Secret key holding the database password
pub const SECRET_PASSWORD_KEY: &str = "POSTGRES_PASSWORD";
/// Secret key holding the database name
pub const SECRET_DATABASE_KEY: &str = "POSTGRES_DB";
/// Secret key holding the database host
pub const SECRET_HOST_KEY: &str = "POSTGRES_HOST";

const ENV_IAP_AUDIENCE: &str = "GOOGLE_IAP_AUDIENCE";
const ENV_TEAMS_API_URL: &str = "TEAMS_API_URL";
const ENV_TEAMS_API_TOKEN: &str = "TEAMS_API_TOKEN";
const ENV_ALLOWED_TEAMS: &str = "TEAMS_ALLOWED_TEAMS";
const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
const ENV_POOL_MAX: &str = "DATABASE_POOL_MAX";
const ENV_POOL_IDLE_TIMEOUT: &str = "DATABASE_POOL_IDLE_TIMEOUT_MS";

const SERVER_REQUEST_CPU: &str = "100m";
const SERVER_REQUEST_MEMORY: &str = "128Mi";
const SERVER_LIMIT_MEMORY: &str = "256Mi";
const PROXY_REQUEST_CPU: &str = "10m";
const PROXY_REQUEST_MEMORY: &str = "100Mi";
const PROXY_LIMIT_MEMORY: &str = "100Mi";

/// Image reference for a version pin
pub fn image_for_version(version: &str) -> String {
    format!("{}/{}:{}", CUSTOM_IMAGE_REPO, CUSTOM_IMAGE_NAME, version)
}

/// Version pin of an image reference (text after the last `:`)
pub fn version_from_image(image: &str) -> Option<&str> {
    image.rsplit_once(':').map(|(_, tag)| tag).filter(|t| !t.contains('/'))
}

/// Build the desired server for an instance
pub fn build_server(config: &Config, instance: &InstanceConfig) -> Unleash {
    let name = &instance.name;

    let spec = UnleashSpec {
        size: 1,
        database: UnleashDatabaseConfig {
            host: "localhost".to_string(),
            port: SQL_PROXY_PORT.to_string(),
            ssl: "false".to_string(),
            secret_name: name.clone(),
            secret_user_key: SECRET_USER_KEY.to_string(),
            secret_pass_key: SECRET_PASSWORD_KEY.to_string(),
            secret_database_name_key: SECRET_DATABASE_KEY.to_string(),
        },
        web_ingress: UnleashIngressConfig {
            enabled: true,
            host: format!("{}-{}", name, config.unleash.web_ingress_host),
            path: "/".to_string(),
            class: config.unleash.web_ingress_class.clone(),
        },
        api_ingress: UnleashIngressConfig {
            enabled: true,
            host: format!("{}-{}", name, config.unleash.api_ingress_host),
            path: "/".to_string(),
            class: config.unleash.api_ingress_class.clone(),
        },
        network_policy: UnleashNetworkPolicyConfig {
            enabled: true,
            allow_dns: true,
            extra_egress_rules: vec![NetworkPolicyEgressRule {
                ports: vec![NetworkPolicyPort::tcp(CLOUD_SQL_PORT)],
                to: vec![NetworkPolicyPeer {
                    ip_block: Some(IpBlock {
                        cidr: format!("{}/32", config.unleash.sql_instance_address),
                    }),
                }],
            }],
        },
        federation: UnleashFederationConfig {
            enabled: instance.federation_enabled,
            namespaces: instance.namespaces(),
            clusters: instance.clusters(),
            secret_nonce: instance.federation_nonce.clone(),
        },
        extra_env_vars: env_vars(config, instance),
        extra_containers: vec![sql_proxy(config)],
        existing_service_account_name: Some(config.unleash.instance_service_account.clone()),
        resources: ResourceRequirements {
            requests: Some(ResourceQuantity::cpu_memory(
                SERVER_REQUEST_CPU,
                SERVER_REQUEST_MEMORY,
            )),
            limits: Some(ResourceQuantity::memory(SERVER_LIMIT_MEMORY)),
        },
        custom_image: if instance.version_pin.is_empty() {
            String::new()
        } else {
            image_for_version(&instance.version_pin)
        },
    };

    Unleash {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(config.unleash.instance_namespace.clone()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

fn env_vars(config: &Config, instance: &InstanceConfig) -> Vec<EnvVar> {
    vec![
        EnvVar::literal(ENV_IAP_AUDIENCE, config.iap_audience()),
        EnvVar::literal(ENV_TEAMS_API_URL, &config.unleash.teams_api_url),
        EnvVar::from_secret(
            ENV_TEAMS_API_TOKEN,
            &config.unleash.teams_api_secret_name,
            &config.unleash.teams_api_secret_token_key,
        ),
        EnvVar::literal(ENV_ALLOWED_TEAMS, &instance.allowed_principals),
        EnvVar::literal(ENV_LOG_LEVEL, &instance.log_level),
        EnvVar::literal(ENV_POOL_MAX, instance.db_pool_max.to_string()),
        EnvVar::literal(
            ENV_POOL_IDLE_TIMEOUT,
            instance.db_pool_idle_timeout_ms.to_string(),
        ),
    ]
}

fn sql_proxy(config: &Config) -> Container {
    Container {
        name: SQL_PROXY_CONTAINER.to_string(),
        image: config.cloud_connector_proxy_image.clone(),
        args: vec![
            "--structured-logs".to_string(),
            format!("--port={}", SQL_PROXY_PORT),
            config.sql_connection_name(),
        ],
        resources: Some(ResourceRequirements {
            requests: Some(ResourceQuantity::cpu_memory(
                PROXY_REQUEST_CPU,
                PROXY_REQUEST_MEMORY,
            )),
            limits: Some(ResourceQuantity::memory(PROXY_LIMIT_MEMORY)),
        }),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: vec![],
                drop: vec!["ALL".to_string()],
            }),
            privileged: Some(false),
            run_as_user: Some(SQL_PROXY_UID),
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
        }),
    }
}

impl InstanceConfig {
    /// Read the configuration back out of a server descriptor.
    ///
    /// Values stored as environment variables fall back to their defaults
    /// only when `with_defaults` is set; otherwise a missing variable reads
    /// as empty/zero.
    pub fn from_server(server: &Unleash, with_defaults: bool) -> Self {
        let name = server.metadata.name.clone().unwrap_or_default();
        let spec = &server.spec;

        let env = |key: &str, default: String| -> String {
            spec.extra_env_vars
                .iter()
                .find(|e| e.name == key)
                .and_then(|e| e.value.clone())
                .or_else(|| with_defaults.then_some(default))
                .unwrap_or_default()
        };

        let mut clusters = join_list(&spec.federation.clusters);
        if spec.federation.enabled && clusters.is_empty() {
            clusters = DEFAULT_FEDERATION_CLUSTERS.join(",");
        }

        Self {
            allowed_principals: env(ENV_ALLOWED_TEAMS, name.clone()),
            log_level: env(ENV_LOG_LEVEL, DEFAULT_LOG_LEVEL.to_string()),
            db_pool_max: env(ENV_POOL_MAX, DEFAULT_DB_POOL_MAX.to_string())
                .parse()
                .unwrap_or(0),
            db_pool_idle_timeout_ms: env(
                ENV_POOL_IDLE_TIMEOUT,
                DEFAULT_DB_POOL_IDLE_TIMEOUT_MS.to_string(),
            )
            .parse()
            .unwrap_or(0),
            version_pin: version_from_image(&spec.custom_image)
                .unwrap_or_default()
                .to_string(),
            federation_enabled: spec.federation.enabled,
            federation_nonce: spec.federation.secret_nonce.clone(),
            allowed_namespaces: join_list(&spec.federation.namespaces),
            allowed_clusters: clusters,
            name,
        }
    }
}

fn join_list(items: &[String]) -> String {
    items
        .iter()
        .flat_map(|s| split_list(s))
        .collect::<Vec<_>>()
        .join(",")
}
